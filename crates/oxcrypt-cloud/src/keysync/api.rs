//! Wire models and client seam of the key-exchange service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

use super::KeySyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: u64,
    pub user_name: String,
    pub is_encryption_enabled: bool,
}

/// Passphrase-protected private key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeyContainer {
    pub version: String,
    /// X25519 secret, RFC 3394-wrapped under the scrypt KEK
    #[serde_as(as = "Base64")]
    pub private_key: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub salt: Vec<u8>,
    pub scrypt_cost_log2: u8,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyContainer {
    pub version: String,
    #[serde_as(as = "Base64")]
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKeyPairContainer {
    pub private_key_container: PrivateKeyContainer,
    pub public_key_container: PublicKeyContainer,
}

/// A file key wrapped for one user.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileKeyContainer {
    pub version: String,
    #[serde_as(as = "Base64")]
    pub key: Vec<u8>,
    /// Sender side of the key agreement
    #[serde_as(as = "Base64")]
    pub ephemeral_public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUserPublicKey {
    pub id: u64,
    pub public_key_container: PublicKeyContainer,
}

/// The caller's own wrapped key of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFileKeys {
    pub id: u64,
    pub file_key_container: FileKeyContainer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdFileIdItem {
    pub user_id: u64,
    pub file_id: u64,
}

/// Missing `(user, file)` pairs, ordered by priority, with the public keys
/// and file keys needed to fill them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingKeysResponse {
    pub items: Vec<UserIdFileIdItem>,
    pub users: Vec<UserUserPublicKey>,
    pub files: Vec<FileFileKeys>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFileKeySetRequest {
    pub user_id: u64,
    pub file_id: u64,
    pub file_key: FileKeyContainer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFileKeySetBatchRequest {
    pub items: Vec<UserFileKeySetRequest>,
}

/// Client of the key-exchange service.
#[async_trait]
pub trait KeyExchangeApi: Send + Sync {
    async fn user_account(&self) -> Result<UserAccount, KeySyncError>;

    async fn user_key_pair(&self) -> Result<UserKeyPairContainer, KeySyncError>;

    async fn missing_file_keys(&self) -> Result<MissingKeysResponse, KeySyncError>;

    async fn set_user_file_keys(&self, request: UserFileKeySetBatchRequest) -> Result<(), KeySyncError>;
}
