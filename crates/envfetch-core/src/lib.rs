//! # envfetch-core
//!
//! Cryptographic payload processing for envkey-fetch.
//!
//! Given the JSON envelope returned by an env server, this crate:
//! - unlocks the credential's private key with the credential passphrase,
//! - verifies the cleartext-signed trusted-key documents,
//! - validates the environment signer against a web of invitation
//!   signatures rooted in the creator-trusted keyset,
//! - decrypts and verifies the environment body (and, if present, the
//!   inheritance overrides, which are then overlaid on top of it),
//! - dereferences indirect payload pointers, at most once per field.
//!
//! All OpenPGP operations are abstracted behind the [`PgpEngine`] trait,
//! with a concrete implementation backed by Sequoia-PGP.
//!
//! This crate performs no network or disk I/O of its own. The single HTTP
//! fetch an indirect pointer requires is delegated through the
//! [`IndirectFetch`] trait, implemented by the caller.

pub mod engine;
pub mod error;
pub mod payload;
pub mod sequoia_engine;
pub mod trust;
pub mod types;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use engine::{DecryptRing, KeyInfo, PgpEngine};
pub use error::{Error, Result, TrustError};
pub use payload::{IndirectFetch, PayloadVerifier};
pub use sequoia_engine::SequoiaEngine;
pub use types::{Envelope, Keyable, Signer, SignerRole, TrustedKeyables};
