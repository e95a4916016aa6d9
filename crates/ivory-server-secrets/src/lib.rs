// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # ivory-server-secrets
//!
//! Master secret lifecycle and encrypted storage of role passwords.
//!
//! ## Key hierarchy
//!
//! ```text
//! passphrase ──Argon2id(salt_v)──▶ MasterSecret v
//!                                      │
//!                                      └── AES-256-GCM ──▶ credential ciphertexts
//! ```
//!
//! Each credential records the master secret version that encrypted it.
//! Replacing the master secret does not touch credentials; they stay
//! undecryptable until [`PasswordService::reencrypt_all`] moves them onto
//! the new version.

pub mod encryption;
pub mod error;
pub mod password;
pub mod secret;

pub use encryption::{EncryptedData, KdfParams};
pub use error::{SecretsError, SecretsResult};
pub use password::{CredentialInfo, PasswordService, ReencryptReport};
pub use secret::{MasterSecret, SecretService, SecretStatus};
