use std::io::Read;

use sequoia_openpgp::Cert;
use sequoia_openpgp::crypto::{Password, SessionKey};
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::parse::stream::*;
use sequoia_openpgp::policy::StandardPolicy;

use crate::engine::{DecryptRing, KeyInfo, PgpEngine};
use crate::error::{Error, Result};

/// Sequoia-PGP backed implementation of [`PgpEngine`].
pub struct SequoiaEngine {
    policy: StandardPolicy<'static>,
}

impl SequoiaEngine {
    /// Create a new `SequoiaEngine` with the standard policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: StandardPolicy::new(),
        }
    }

    fn parse_cert(armored: &str) -> Result<Cert> {
        Cert::from_bytes(armored.as_bytes()).map_err(|e| Error::InvalidArmor {
            reason: e.to_string(),
        })
    }
}

impl Default for SequoiaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PgpEngine for SequoiaEngine {
    fn read_public_key(&self, armored: &str) -> Result<KeyInfo> {
        let cert = Self::parse_cert(armored)?;
        Ok(KeyInfo {
            fingerprint: cert.fingerprint().to_hex(),
        })
    }

    fn read_private_key(&self, armored: &str, passphrase: &str) -> Result<KeyInfo> {
        let cert = Self::parse_cert(armored)?;
        if !cert.is_tsk() {
            return Err(Error::KeyUnlock {
                reason: "key carries no secret material".into(),
            });
        }

        let password = Password::from(passphrase);
        let unlocked = cert.keys().secret().any(|ka| {
            let key = ka.key();
            key.has_unencrypted_secret() || key.clone().decrypt_secret(&password).is_ok()
        });
        if !unlocked {
            return Err(Error::KeyUnlock {
                reason: "passphrase does not unlock any secret key".into(),
            });
        }

        Ok(KeyInfo {
            fingerprint: cert.fingerprint().to_hex(),
        })
    }

    fn verify_public_matches_private(
        &self,
        pubkey: &str,
        encrypted_privkey: &str,
        passphrase: &str,
    ) -> Result<()> {
        let public = self.read_public_key(pubkey)?;
        let private = self.read_private_key(encrypted_privkey, passphrase)?;

        // The fingerprint hashes the public key material, so equality is
        // sufficient to establish the pair without a sign/verify round trip.
        if public.fingerprint != private.fingerprint {
            return Err(Error::KeyPairMismatch);
        }
        Ok(())
    }

    fn verify_key_signed_by(&self, signed: &str, signer: &str) -> Result<()> {
        let signed_cert = Self::parse_cert(signed)?;
        let signer_cert = Self::parse_cert(signer)?;

        let signer_keys: Vec<_> = signer_cert
            .keys()
            .with_policy(&self.policy, None)
            .alive()
            .revoked(false)
            .for_certification()
            .collect();
        let signer_fp = signer_cert.fingerprint();

        let pk = signed_cert.primary_key();
        for uidb in signed_cert.userids() {
            for sig in uidb.certifications() {
                // Only attempt verification of signatures that claim to be
                // issued by the expected signer.
                if !sig.issuer_fingerprints().any(|issuer| issuer == &signer_fp) {
                    continue;
                }
                if signer_keys.iter().any(|signer_key| {
                    sig.clone()
                        .verify_userid_binding(signer_key.key(), pk.key(), uidb.userid())
                        .is_ok()
                }) {
                    return Ok(());
                }
            }
        }

        Err(Error::Verification {
            reason: format!("no valid certification by {}", signer_fp.to_hex()),
        })
    }

    fn verify_cleartext_signed(&self, document: &str, signer_pubkey: &str) -> Result<Vec<u8>> {
        let cert = Self::parse_cert(signer_pubkey)?;
        let helper = VerifyHelper { cert: &cert };

        let mut verifier = VerifierBuilder::from_bytes(document.as_bytes())
            .map_err(|e| Error::Verification {
                reason: e.to_string(),
            })?
            .with_policy(&self.policy, None, helper)
            .map_err(|e| Error::Verification {
                reason: e.to_string(),
            })?;

        let mut plaintext = Vec::new();
        verifier
            .read_to_end(&mut plaintext)
            .map_err(|e| Error::Verification {
                reason: e.to_string(),
            })?;
        Ok(plaintext)
    }

    fn decrypt_and_verify(&self, message: &str, ring: &DecryptRing<'_>) -> Result<Vec<u8>> {
        let decryption_cert = Self::parse_cert(ring.encrypted_privkey)?;
        let verification_cert = Self::parse_cert(ring.signer_pubkey)?;

        let helper = DecryptVerifyHelper {
            policy: &self.policy,
            decryption_cert,
            verification_cert,
            passphrase: ring.passphrase,
        };

        let mut decryptor = DecryptorBuilder::from_bytes(message.as_bytes())
            .map_err(|e| Error::Decryption {
                reason: e.to_string(),
            })?
            .with_policy(&self.policy, None, helper)
            .map_err(|e| Error::Decryption {
                reason: e.to_string(),
            })?;

        let mut plaintext = Vec::new();
        std::io::copy(&mut decryptor, &mut plaintext).map_err(|e| Error::Decryption {
            reason: e.to_string(),
        })?;
        Ok(plaintext)
    }
}

/// Helper for the streaming verifier: accepts exactly one signer and
/// requires at least one good signature from it.
struct VerifyHelper<'a> {
    cert: &'a Cert,
}

impl VerificationHelper for VerifyHelper<'_> {
    fn get_certs(
        &mut self,
        _ids: &[sequoia_openpgp::KeyHandle],
    ) -> sequoia_openpgp::Result<Vec<Cert>> {
        Ok(vec![self.cert.clone()])
    }

    fn check(&mut self, structure: MessageStructure) -> sequoia_openpgp::Result<()> {
        require_good_signature(structure)
    }
}

/// Helper combining decryption with mandatory signature verification.
/// The decryptor key may be passphrase-protected.
struct DecryptVerifyHelper<'a> {
    policy: &'a StandardPolicy<'static>,
    decryption_cert: Cert,
    verification_cert: Cert,
    passphrase: &'a str,
}

impl VerificationHelper for DecryptVerifyHelper<'_> {
    fn get_certs(
        &mut self,
        _ids: &[sequoia_openpgp::KeyHandle],
    ) -> sequoia_openpgp::Result<Vec<Cert>> {
        Ok(vec![self.verification_cert.clone()])
    }

    fn check(&mut self, structure: MessageStructure) -> sequoia_openpgp::Result<()> {
        require_good_signature(structure)
    }
}

impl DecryptionHelper for DecryptVerifyHelper<'_> {
    fn decrypt(
        &mut self,
        pkesks: &[sequoia_openpgp::packet::PKESK],
        _skesks: &[sequoia_openpgp::packet::SKESK],
        sym_algo: Option<sequoia_openpgp::types::SymmetricAlgorithm>,
        decrypt: &mut dyn FnMut(Option<sequoia_openpgp::types::SymmetricAlgorithm>, &SessionKey) -> bool,
    ) -> sequoia_openpgp::Result<Option<Cert>> {
        let valid_cert = self.decryption_cert.with_policy(self.policy, None)?;

        // Try unencrypted secret keys first
        for ka in valid_cert
            .keys()
            .supported()
            .unencrypted_secret()
            .for_transport_encryption()
            .for_storage_encryption()
        {
            let mut keypair = ka.key().clone().into_keypair()?;
            for pkesk in pkesks {
                if pkesk
                    .decrypt(&mut keypair, sym_algo)
                    .map(|(algo, sk)| decrypt(algo, &sk))
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
            }
        }

        // Then keys unlocked with the credential passphrase
        let password = Password::from(self.passphrase);
        for ka in valid_cert
            .keys()
            .supported()
            .secret()
            .for_transport_encryption()
            .for_storage_encryption()
        {
            let key = ka.key().clone();
            if let Ok(decrypted) = key.decrypt_secret(&password) {
                if let Ok(mut keypair) = decrypted.into_keypair() {
                    for pkesk in pkesks {
                        if pkesk
                            .decrypt(&mut keypair, sym_algo)
                            .map(|(algo, sk)| decrypt(algo, &sk))
                            .unwrap_or(false)
                        {
                            return Ok(None);
                        }
                    }
                }
            }
        }

        Err(sequoia_openpgp::Error::MissingSessionKey(
            "no suitable decryption key found".into(),
        )
        .into())
    }
}

fn require_good_signature(structure: MessageStructure) -> sequoia_openpgp::Result<()> {
    for layer in structure {
        if let MessageLayer::SignatureGroup { results } = layer {
            if results.iter().any(std::result::Result::is_ok) {
                return Ok(());
            }
        }
    }
    Err(sequoia_openpgp::Error::InvalidOperation(
        "no valid signature from the declared signer".into(),
    )
    .into())
}
