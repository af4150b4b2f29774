#![forbid(unsafe_code)]

//! AES key wrap as defined in [RFC 3394](https://datatracker.ietf.org/doc/html/rfc3394),
//! restricted to 256-bit key encryption keys.
//!
//! Used for the vault master keys (KEK derived with scrypt) and for per-file
//! keys shared with other users (KEK derived from an X25519 agreement).

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use generic_array::GenericArray;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Default initial value, RFC 3394 section 2.2.3.1.
const IV_3394: [u8; 8] = [0xa6; 8];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WrapError {
    #[error("The plaintext length is not a multiple of 64 bits per RFC3394.")]
    InvalidPlaintextLength,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UnwrapError {
    #[error("The ciphertext length is not a multiple of 64 bits per RFC3394.")]
    InvalidCiphertextLength,
    #[error("The ciphertext is too short to contain a wrapped key.")]
    CiphertextTooShort,
    #[error("The integrity check failed.")]
    InvalidIntegrityCheck,
}

/// Wrap `plaintext` (a multiple of 8 bytes, at least 16) under `kek`.
pub fn wrap_key(plaintext: &[u8], kek: &[u8; 32]) -> Result<Vec<u8>, WrapError> {
    if plaintext.len() % 8 != 0 || plaintext.len() < 16 {
        return Err(WrapError::InvalidPlaintextLength);
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek));
    let n = plaintext.len() / 8;
    let mut a = IV_3394;
    let mut registers = Zeroizing::new(plaintext.to_vec());
    let mut block = GenericArray::from([0u8; 16]);

    for j in 0..6 {
        for (i, r) in registers.chunks_mut(8).enumerate() {
            // B = AES(K, A | R[i])
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(r);
            cipher.encrypt_block(&mut block);

            // A = MSB(64, B) ^ t, t = (n * j) + i, with i starting at 1
            let t = ((n * j) + i + 1) as u64;
            a.copy_from_slice(&block[..8]);
            for (byte, t_byte) in a.iter_mut().zip(t.to_be_bytes()) {
                *byte ^= t_byte;
            }
            r.copy_from_slice(&block[8..]);
        }
    }

    let mut ciphertext = Vec::with_capacity(plaintext.len() + 8);
    ciphertext.extend_from_slice(&a);
    ciphertext.extend_from_slice(&registers);
    Ok(ciphertext)
}

/// Unwrap `ciphertext` under `kek`.
///
/// A wrong KEK surfaces as [`UnwrapError::InvalidIntegrityCheck`]; the
/// algorithm cannot tell it apart from a tampered ciphertext.
pub fn unwrap_key(ciphertext: &[u8], kek: &[u8; 32]) -> Result<Vec<u8>, UnwrapError> {
    if ciphertext.len() % 8 != 0 {
        return Err(UnwrapError::InvalidCiphertextLength);
    }
    if ciphertext.len() < 24 {
        return Err(UnwrapError::CiphertextTooShort);
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek));
    let n = (ciphertext.len() / 8) - 1;
    let mut a = [0u8; 8];
    a.copy_from_slice(&ciphertext[..8]);
    let mut registers = Zeroizing::new(ciphertext[8..].to_vec());
    let mut block = GenericArray::from([0u8; 16]);

    for j in (0..6).rev() {
        for (i, r) in registers.chunks_mut(8).enumerate().rev() {
            // B = AES-1(K, (A ^ t) | R[i])
            let t = ((n * j) + i + 1) as u64;
            for (byte, t_byte) in a.iter_mut().zip(t.to_be_bytes()) {
                *byte ^= t_byte;
            }
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(r);
            cipher.decrypt_block(&mut block);

            a.copy_from_slice(&block[..8]);
            r.copy_from_slice(&block[8..]);
        }
    }
    block.iter_mut().for_each(|b| *b = 0);

    if a.ct_eq(&IV_3394).unwrap_u8() != 1 {
        return Err(UnwrapError::InvalidIntegrityCheck);
    }

    Ok(registers.to_vec())
}

#[cfg(test)]
mod tests {
    //! RFC 3394 section 4 test vectors.

    use super::*;
    use hex_literal::hex;

    const KEK: [u8; 32] = hex!("000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F");

    #[test]
    fn test_wrap_128_key_with_256_kek() {
        let key_data = hex!("00112233445566778899AABBCCDDEEFF");
        let expected = hex!("64E8C3F9CE0F5BA2 63E9777905818A2A 93C8191E7D6E8AE7");
        assert_eq!(wrap_key(&key_data, &KEK).unwrap(), expected);
        assert_eq!(unwrap_key(&expected, &KEK).unwrap(), key_data);
    }

    #[test]
    fn test_wrap_192_key_with_256_kek() {
        let key_data = hex!("00112233445566778899AABBCCDDEEFF0001020304050607");
        let expected =
            hex!("A8F9BC1612C68B3F F6E6F4FBE30E71E4 769C8B80A32CB895 8CD5D17D6B254DA1");
        assert_eq!(wrap_key(&key_data, &KEK).unwrap(), expected);
        assert_eq!(unwrap_key(&expected, &KEK).unwrap(), key_data);
    }

    #[test]
    fn test_wrap_256_key_with_256_kek() {
        let key_data = hex!("00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F");
        let expected = hex!(
            "28C9F404C4B810F4 CBCCB35CFB87F826 3F5786E2D80ED326 CBC7F0E71A99F43B FB988B9B7A02DD21"
        );
        assert_eq!(wrap_key(&key_data, &KEK).unwrap(), expected);
        assert_eq!(unwrap_key(&expected, &KEK).unwrap(), key_data);
    }

    #[test]
    fn test_invalid_lengths() {
        assert_eq!(
            wrap_key(&hex!("00112233445566778899AABBCCDDEEFFF123"), &KEK),
            Err(WrapError::InvalidPlaintextLength)
        );
        assert_eq!(
            unwrap_key(&hex!("A8F9BC1612C68B3F F6E6F4FBE30E"), &KEK),
            Err(UnwrapError::InvalidCiphertextLength)
        );
        assert_eq!(
            unwrap_key(&hex!("A8F9BC1612C68B3F F6E6F4FBE30E71E4"), &KEK),
            Err(UnwrapError::CiphertextTooShort)
        );
    }

    #[test]
    fn test_unwrap_with_wrong_kek() {
        let wrong = hex!("36b0144a13d0b5c1950c435762ff47789ab64258763f6f980f66dc00c11697cd");
        let ciphertext =
            hex!("A8F9BC1612C68B3F F6E6F4FBE30E71E4 769C8B80A32CB895 8CD5D17D6B254DA1");
        assert_eq!(
            unwrap_key(&ciphertext, &wrong),
            Err(UnwrapError::InvalidIntegrityCheck)
        );
    }
}
