// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential encryption.
//!
//! AES-256-GCM with a random 96-bit nonce per call. Keys are derived from the
//! master passphrase and a per-version salt with Argon2id.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use ivory_common_secret::SecretString;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{SecretsError, SecretsResult};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

pub const SALT_SIZE: usize = 16;

/// Encrypted data with nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
	pub ciphertext: Vec<u8>,
	pub nonce: [u8; NONCE_SIZE],
}

impl EncryptedData {
	/// Rebuild from stored columns. A nonce of the wrong length means the row
	/// is corrupt and is reported as a decryption failure.
	pub fn from_parts(ciphertext: Vec<u8>, nonce: &[u8]) -> SecretsResult<Self> {
		let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| {
			SecretsError::Decryption(format!(
				"stored nonce has {} bytes, expected {NONCE_SIZE}",
				nonce.len()
			))
		})?;
		Ok(Self { ciphertext, nonce })
	}
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
	pub memory_kib: u32,
	pub iterations: u32,
	pub parallelism: u32,
}

impl Default for KdfParams {
	/// Argon2id with memory=19456 KiB, iterations=2, parallelism=1.
	fn default() -> Self {
		Self {
			memory_kib: 19456,
			iterations: 2,
			parallelism: 1,
		}
	}
}

impl KdfParams {
	/// Minimal cost. MUST NOT be used outside tests.
	pub fn insecure_fast() -> Self {
		Self {
			memory_kib: 1024,
			iterations: 1,
			parallelism: 1,
		}
	}
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
	let mut salt = [0u8; SALT_SIZE];
	OsRng.fill_bytes(&mut salt);
	salt
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
	let mut nonce = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut nonce);
	nonce
}

/// Derive a 256-bit key from a passphrase. CPU bound; call from
/// `spawn_blocking` in async contexts.
pub fn derive_key(
	passphrase: &SecretString,
	salt: &[u8],
	params: KdfParams,
) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
	let params = Params::new(
		params.memory_kib,
		params.iterations,
		params.parallelism,
		Some(KEY_SIZE),
	)
	.map_err(|e| SecretsError::Derivation(format!("invalid Argon2 params: {e}")))?;
	let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	argon2
		.hash_password_into(passphrase.expose().as_bytes(), salt, key.as_mut())
		.map_err(|e| SecretsError::Derivation(format!("Argon2id hash failed: {e}")))?;
	Ok(key)
}

pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> SecretsResult<EncryptedData> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

	let nonce_bytes = generate_nonce();
	let ciphertext = cipher
		.encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
		.map_err(|e| SecretsError::Encryption(format!("credential encryption failed: {e}")))?;

	Ok(EncryptedData {
		ciphertext,
		nonce: nonce_bytes,
	})
}

pub fn decrypt(key: &[u8; KEY_SIZE], encrypted: &EncryptedData) -> SecretsResult<Zeroizing<Vec<u8>>> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

	let plaintext = cipher
		.decrypt(
			Nonce::from_slice(&encrypted.nonce),
			encrypted.ciphertext.as_slice(),
		)
		.map_err(|e| SecretsError::Decryption(format!("credential decryption failed: {e}")))?;

	Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn random_key() -> Zeroizing<[u8; KEY_SIZE]> {
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(key.as_mut());
		key
	}

	#[test]
	fn derivation_is_deterministic_per_salt() {
		let passphrase = SecretString::from("correct horse battery staple");
		let salt = generate_salt();

		let k1 = derive_key(&passphrase, &salt, KdfParams::insecure_fast()).unwrap();
		let k2 = derive_key(&passphrase, &salt, KdfParams::insecure_fast()).unwrap();
		let k3 = derive_key(&passphrase, &generate_salt(), KdfParams::insecure_fast()).unwrap();

		assert_eq!(k1.as_slice(), k2.as_slice());
		assert_ne!(k1.as_slice(), k3.as_slice());
	}

	#[test]
	fn different_passphrases_derive_different_keys() {
		let salt = generate_salt();
		let k1 = derive_key(&SecretString::from("one"), &salt, KdfParams::insecure_fast()).unwrap();
		let k2 = derive_key(&SecretString::from("two"), &salt, KdfParams::insecure_fast()).unwrap();
		assert_ne!(k1.as_slice(), k2.as_slice());
	}

	#[test]
	fn short_salt_is_a_derivation_error() {
		let result = derive_key(&SecretString::from("pw"), b"abc", KdfParams::insecure_fast());
		assert!(matches!(result, Err(SecretsError::Derivation(_))));
	}

	#[test]
	fn tampered_ciphertext_fails() {
		let key = random_key();
		let mut encrypted = encrypt(&key, b"secret").unwrap();
		encrypted.ciphertext[0] ^= 0xFF;

		assert!(matches!(
			decrypt(&key, &encrypted),
			Err(SecretsError::Decryption(_))
		));
	}

	#[test]
	fn from_parts_rejects_bad_nonce() {
		let result = EncryptedData::from_parts(vec![1, 2, 3], &[0u8; 8]);
		assert!(matches!(result, Err(SecretsError::Decryption(_))));
	}

	proptest! {
		#[test]
		fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096)) {
			let key = random_key();
			let encrypted = encrypt(&key, &plaintext).unwrap();
			let decrypted = decrypt(&key, &encrypted).unwrap();
			prop_assert_eq!(plaintext, decrypted.as_slice());
		}

		#[test]
		fn prop_wrong_key_fails(plaintext in proptest::collection::vec(any::<u8>(), 0..1024)) {
			let key = random_key();
			let other = random_key();
			let encrypted = encrypt(&key, &plaintext).unwrap();
			prop_assert!(decrypt(&other, &encrypted).is_err());
		}

		#[test]
		fn prop_fresh_nonce_per_encryption(plaintext in proptest::collection::vec(any::<u8>(), 1..512)) {
			let key = random_key();
			let a = encrypt(&key, &plaintext).unwrap();
			let b = encrypt(&key, &plaintext).unwrap();
			prop_assert_ne!(a.nonce, b.nonce);
			prop_assert_ne!(a.ciphertext, b.ciphertext);
		}

		#[test]
		fn prop_tampering_any_byte_fails(
			plaintext in proptest::collection::vec(any::<u8>(), 1..512),
			idx in 0usize..4096,
		) {
			let key = random_key();
			let mut encrypted = encrypt(&key, &plaintext).unwrap();
			let i = idx % encrypted.ciphertext.len();
			encrypted.ciphertext[i] ^= 0x01;
			prop_assert!(decrypt(&key, &encrypted).is_err());
		}
	}
}
