//! Envelope parsing and verification.
//!
//! The pipeline runs in fixed stages: key extraction, trusted-keyset
//! extraction, signer trust validation, body decryption, indirect-pointer
//! dereference, and output assembly. The first failure in a stage aborts
//! the whole run.

use std::future::Future;

use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::engine::{DecryptRing, PgpEngine};
use crate::error::{Error, Result, TrustError};
use crate::trust::{self, TrustChain};
use crate::types::{Envelope, Signer, SignerRole, TrustedKeyables};

/// Fetches the ciphertext an indirect payload pointer refers to.
///
/// Implemented by the network layer; the verifier calls it at most once
/// per encrypted field.
pub trait IndirectFetch {
    fn fetch(&self, url: &str) -> impl Future<Output = std::result::Result<Vec<u8>, String>> + Send;
}

/// Verifies an envelope and produces the final environment JSON.
pub struct PayloadVerifier<'a, E, F> {
    engine: &'a E,
    fetcher: &'a F,
}

impl<'a, E, F> PayloadVerifier<'a, E, F>
where
    E: PgpEngine,
    F: IndirectFetch,
{
    pub fn new(engine: &'a E, fetcher: &'a F) -> Self {
        Self { engine, fetcher }
    }

    /// Run all stages over a validated envelope and return the flat
    /// environment-variable JSON object as a string.
    pub async fn process(&self, envelope: &Envelope, passphrase: &str) -> Result<String> {
        envelope.validate()?;

        // Stage 1: key extraction. The creator pair is checked before any
        // signature on the body is even looked at.
        self.engine.read_public_key(&envelope.pubkey)?;
        self.engine.verify_public_matches_private(
            &envelope.pubkey,
            &envelope.encrypted_privkey,
            passphrase,
        )?;

        let env_signer = self.signer(
            &envelope.signed_by_id,
            &envelope.signed_by_pubkey,
            SignerRole::Environment,
        )?;
        let overrides_signer = if envelope.has_inheritance() {
            Some(self.signer(
                &envelope.inheritance_overrides_signed_by_id,
                &envelope.inheritance_overrides_signed_by_pubkey,
                SignerRole::Overrides,
            )?)
        } else {
            None
        };

        // Stage 2: trusted-keyset extraction.
        let creator_trusted =
            self.trusted_keyables(&envelope.signed_trusted_pubkeys, &envelope.pubkey)?;
        let signer_trusted =
            self.trusted_keyables(&envelope.signed_by_trusted_pubkeys, &envelope.signed_by_pubkey)?;
        let overrides_trusted = if envelope.has_inheritance() {
            Some(self.trusted_keyables(
                &envelope.inheritance_overrides_signed_by_trusted_pubkeys,
                &envelope.inheritance_overrides_signed_by_pubkey,
            )?)
        } else {
            None
        };

        // Stage 3: signer trust.
        let chain = TrustChain {
            creator: &creator_trusted,
            signer: Some(&signer_trusted),
            overrides: overrides_trusted.as_ref(),
        };
        trust::verify_signer_trusted(self.engine, &env_signer, &chain)?;
        if let Some(signer) = &overrides_signer {
            trust::verify_signer_trusted(self.engine, signer, &chain)?;
        }

        // Stages 4 and 5: decryption, with one indirect dereference per
        // field if the plaintext turns out to be a URL pointer.
        let env_ring = DecryptRing {
            encrypted_privkey: &envelope.encrypted_privkey,
            passphrase,
            signer_pubkey: &envelope.signed_by_pubkey,
        };
        let env_bytes = self.decrypt_with_deref(&envelope.env, &env_ring).await?;

        let overrides_bytes = if overrides_signer.is_some() {
            let overrides_ring = DecryptRing {
                encrypted_privkey: &envelope.encrypted_privkey,
                passphrase,
                signer_pubkey: &envelope.inheritance_overrides_signed_by_pubkey,
            };
            Some(
                self.decrypt_with_deref(&envelope.inheritance_overrides, &overrides_ring)
                    .await?,
            )
        } else {
            None
        };

        // Stage 6: output assembly. Only the returned output survives;
        // the decrypted buffers are wiped on drop.
        match overrides_bytes {
            None => String::from_utf8(env_bytes.to_vec()).map_err(|_| Error::EnvelopeInvalid {
                reason: "environment payload is not valid UTF-8".into(),
            }),
            Some(overrides) => merge_overrides(&env_bytes, &overrides),
        }
    }

    fn signer(&self, id: &str, pubkey: &str, role: SignerRole) -> Result<Signer> {
        let info = self.engine.read_public_key(pubkey)?;
        Ok(Signer {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            fingerprint: info.fingerprint,
            role,
        })
    }

    fn trusted_keyables(&self, signed_document: &str, signer_pubkey: &str) -> Result<TrustedKeyables> {
        let plaintext = self
            .engine
            .verify_cleartext_signed(signed_document, signer_pubkey)
            .map_err(|e| TrustError::KeysetSignature {
                reason: e.to_string(),
            })?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    async fn decrypt_with_deref(
        &self,
        ciphertext: &str,
        ring: &DecryptRing<'_>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let plaintext = Zeroizing::new(self.engine.decrypt_and_verify(ciphertext, ring)?);

        // A plaintext opening with a double-quote is a JSON-encoded URL
        // pointing at the actual ciphertext, never an env object.
        if plaintext.first() != Some(&b'"') {
            return Ok(plaintext);
        }
        let url: String = serde_json::from_slice(&plaintext)?;

        let fetched = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|reason| Error::IndirectFetch {
                url: url.clone(),
                reason,
            })?;
        let fetched = String::from_utf8(fetched).map_err(|_| Error::IndirectFetch {
            url,
            reason: "fetched ciphertext is not valid UTF-8".into(),
        })?;

        // Dereference applies at most once per field; whatever the second
        // decryption yields is final.
        self.engine
            .decrypt_and_verify(&fetched, ring)
            .map(Zeroizing::new)
    }
}

/// Overlay the override keys onto the env object; overrides win on
/// collision.
fn merge_overrides(env: &[u8], overrides: &[u8]) -> Result<String> {
    let mut merged: Map<String, Value> = serde_json::from_slice(env)?;
    let overrides: Map<String, Value> = serde_json::from_slice(overrides)?;
    for (key, value) in overrides {
        merged.insert(key, value);
    }
    Ok(serde_json::to_string(&merged)?)
}
