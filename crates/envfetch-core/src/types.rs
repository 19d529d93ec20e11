use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The JSON envelope returned by an env server.
///
/// Every field defaults to empty so that presence validation is a uniform
/// non-empty check; [`Envelope::validate`] enforces the required set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Armored encrypted+signed environment body, or an indirect URL
    /// pointer once decrypted.
    #[serde(default)]
    pub env: String,

    /// Armored passphrase-encrypted private key of the credential.
    #[serde(default)]
    pub encrypted_privkey: String,

    /// Armored public key paired with `encrypted_privkey` (the creator key).
    #[serde(default)]
    pub pubkey: String,

    /// Cleartext-signed JSON keyset signed by the creator key.
    #[serde(default)]
    pub signed_trusted_pubkeys: String,

    /// Identifier of the environment signer.
    #[serde(default)]
    pub signed_by_id: String,

    /// Armored public key of the environment signer.
    #[serde(default)]
    pub signed_by_pubkey: String,

    /// Cleartext-signed JSON keyset signed by the environment signer.
    #[serde(default)]
    pub signed_by_trusted_pubkeys: String,

    #[serde(default)]
    pub inheritance_overrides: String,

    #[serde(default)]
    pub inheritance_overrides_signed_by_id: String,

    #[serde(default)]
    pub inheritance_overrides_signed_by_pubkey: String,

    #[serde(default)]
    pub inheritance_overrides_signed_by_trusted_pubkeys: String,

    /// Server permission to persist the raw envelope to the local cache.
    #[serde(default)]
    pub allow_caching: bool,
}

impl Envelope {
    /// Whether the envelope carries an inheritance-overrides body.
    ///
    /// Only meaningful after [`Envelope::validate`], which rejects
    /// envelopes where the four inheritance fields are not all-or-none.
    pub fn has_inheritance(&self) -> bool {
        !self.inheritance_overrides.is_empty()
    }

    /// Check that the seven required fields are non-empty and the four
    /// inheritance fields are consistently all present or all absent.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("env", &self.env),
            ("encrypted_privkey", &self.encrypted_privkey),
            ("pubkey", &self.pubkey),
            ("signed_trusted_pubkeys", &self.signed_trusted_pubkeys),
            ("signed_by_id", &self.signed_by_id),
            ("signed_by_pubkey", &self.signed_by_pubkey),
            ("signed_by_trusted_pubkeys", &self.signed_by_trusted_pubkeys),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(Error::EnvelopeInvalid {
                    reason: format!("missing required field {name}"),
                });
            }
        }

        let inheritance = [
            &self.inheritance_overrides,
            &self.inheritance_overrides_signed_by_id,
            &self.inheritance_overrides_signed_by_pubkey,
            &self.inheritance_overrides_signed_by_trusted_pubkeys,
        ];
        let present = inheritance.iter().filter(|f| !f.is_empty()).count();
        if present != 0 && present != inheritance.len() {
            return Err(Error::EnvelopeInvalid {
                reason: "inheritance fields must be all present or all absent".into(),
            });
        }

        Ok(())
    }
}

/// One entry in a signed trusted-keys document: a user or device with a
/// public key and, if onboarded via invitation, the transient invite key
/// plus the id of the keyable that issued the invitation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyable {
    pub pubkey: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_pubkey: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_by_id: Option<String>,
}

/// Mapping from keyable identifier to [`Keyable`], decoded from the
/// plaintext of one cleartext-signed trusted-keys document.
pub type TrustedKeyables = HashMap<String, Keyable>;

/// Which trusted pool a signer may chain through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerRole {
    /// Signed the environment body; chains through the signer-trusted pool.
    Environment,
    /// Signed the inheritance overrides; chains through the
    /// overrides-trusted pool.
    Overrides,
}

/// A signer identity whose declared pubkey has been parsed.
#[derive(Debug, Clone)]
pub struct Signer {
    pub id: String,
    /// Armored public key as declared in the envelope.
    pub pubkey: String,
    /// Primary-key fingerprint of the parsed pubkey, hex.
    pub fingerprint: String,
    pub role: SignerRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Envelope {
        Envelope {
            env: "e".into(),
            encrypted_privkey: "k".into(),
            pubkey: "p".into(),
            signed_trusted_pubkeys: "t".into(),
            signed_by_id: "id".into(),
            signed_by_pubkey: "sp".into(),
            signed_by_trusted_pubkeys: "st".into(),
            ..Envelope::default()
        }
    }

    #[test]
    fn test_complete_envelope_validates() {
        assert!(complete().validate().is_ok());
        assert!(!complete().has_inheritance());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        for strip in 0..7 {
            let mut envelope = complete();
            match strip {
                0 => envelope.env.clear(),
                1 => envelope.encrypted_privkey.clear(),
                2 => envelope.pubkey.clear(),
                3 => envelope.signed_trusted_pubkeys.clear(),
                4 => envelope.signed_by_id.clear(),
                5 => envelope.signed_by_pubkey.clear(),
                _ => envelope.signed_by_trusted_pubkeys.clear(),
            }
            assert!(matches!(
                envelope.validate(),
                Err(Error::EnvelopeInvalid { .. })
            ));
        }
    }

    #[test]
    fn test_full_inheritance_validates() {
        let mut envelope = complete();
        envelope.inheritance_overrides = "o".into();
        envelope.inheritance_overrides_signed_by_id = "oid".into();
        envelope.inheritance_overrides_signed_by_pubkey = "op".into();
        envelope.inheritance_overrides_signed_by_trusted_pubkeys = "ot".into();
        assert!(envelope.validate().is_ok());
        assert!(envelope.has_inheritance());
    }

    #[test]
    fn test_partial_inheritance_rejected() {
        let mut envelope = complete();
        envelope.inheritance_overrides = "o".into();
        envelope.inheritance_overrides_signed_by_id = "oid".into();
        assert!(matches!(
            envelope.validate(),
            Err(Error::EnvelopeInvalid { .. })
        ));
    }

    #[test]
    fn test_keyable_wire_names() {
        let keyable: Keyable = serde_json::from_str(
            r#"{"pubkey":"PK","invitePubkey":"IK","invitedById":"alice"}"#,
        )
        .unwrap();
        assert_eq!(keyable.pubkey, "PK");
        assert_eq!(keyable.invite_pubkey.as_deref(), Some("IK"));
        assert_eq!(keyable.invited_by_id.as_deref(), Some("alice"));

        let bare: Keyable = serde_json::from_str(r#"{"pubkey":"PK"}"#).unwrap();
        assert!(bare.invite_pubkey.is_none());
        assert!(bare.invited_by_id.is_none());
    }
}
