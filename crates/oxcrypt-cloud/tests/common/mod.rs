//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Once;

use oxcrypt_cloud::{MemoryStorage, Path, Session, VaultOptions};

pub const PASSPHRASE: &str = "correct horse battery staple";

/// Cheap scrypt so vault creation stays fast.
pub fn test_options() -> VaultOptions {
    VaultOptions::default().scrypt_cost_log2(10)
}

/// Install a fmt subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A session over an in-memory backend with an unlocked vault at `/c/v`.
pub async fn session_with_vault(options: VaultOptions) -> (MemoryStorage, Session<MemoryStorage>) {
    init_tracing();
    let storage = MemoryStorage::new();
    let session = Session::new(storage.clone());
    session
        .create_vault(&Path::directory("/c/v"), PASSPHRASE, options)
        .await
        .expect("vault creation");
    (storage, session)
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
