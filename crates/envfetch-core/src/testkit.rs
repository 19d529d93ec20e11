//! Real-key fixtures for tests.
//!
//! Everything here runs actual Sequoia operations: generated Cv25519
//! certs, genuine third-party certifications, cleartext signatures, and
//! encrypt+sign messages. No canned armor blobs.

use std::io::Write;

use sequoia_openpgp::Cert;
use sequoia_openpgp::cert::prelude::*;
use sequoia_openpgp::crypto::{KeyPair, Password};
use sequoia_openpgp::packet::signature::SignatureBuilder;
use sequoia_openpgp::packet::{Packet, UserID};
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::policy::StandardPolicy;
use sequoia_openpgp::serialize::Marshal;
use sequoia_openpgp::serialize::stream::{Armorer, Encryptor, LiteralWriter, Message, Signer};
use sequoia_openpgp::types::{KeyFlags, SignatureType};

use crate::types::{Envelope, Keyable, TrustedKeyables};

/// An armored key pair for one simulated user or device.
#[derive(Debug, Clone)]
pub struct TestKey {
    pub public: String,
    pub secret: String,
}

/// Generate a fresh Cv25519 key pair with signing and encryption subkeys,
/// optionally passphrase-protected.
pub fn generate(name: &str, passphrase: Option<&str>) -> TestKey {
    let mut builder = CertBuilder::new()
        .add_userid(format!("{name} <{name}@fixtures.test>"))
        .set_cipher_suite(CipherSuite::Cv25519)
        .add_signing_subkey()
        .add_subkey(KeyFlags::empty().set_transport_encryption(), None, None);

    if let Some(passphrase) = passphrase {
        builder = builder.set_password(Some(Password::from(passphrase)));
    }

    let (cert, _revocation) = builder.generate().expect("key generation");
    TestKey {
        public: armor_public(&cert),
        secret: armor_secret(&cert),
    }
}

/// Return `subject_public` with a third-party certification by the signer
/// added to its first user id.
pub fn certify(subject_public: &str, signer_secret: &str, signer_passphrase: Option<&str>) -> String {
    let subject = Cert::from_bytes(subject_public.as_bytes()).expect("subject cert");
    let mut signer = certification_keypair(signer_secret, signer_passphrase);

    let userid: UserID = subject
        .userids()
        .next()
        .expect("subject has a userid")
        .userid()
        .clone();
    let sig = userid
        .bind(
            &mut signer,
            &subject,
            SignatureBuilder::new(SignatureType::GenericCertification),
        )
        .expect("certification");

    let (signed, _) = subject
        .insert_packets(vec![Packet::from(sig)])
        .expect("insert certification");
    armor_public(&signed)
}

/// Build a keyable whose trust derives from an invitation: the inviter
/// certifies a fresh invite key, and the invite key certifies the
/// subject's own key.
pub fn invite_keyable(
    subject: &TestKey,
    inviter: &TestKey,
    inviter_passphrase: Option<&str>,
    inviter_id: &str,
) -> Keyable {
    let invite = generate("invite", None);
    let invite_pubkey = certify(&invite.public, &inviter.secret, inviter_passphrase);
    let pubkey = certify(&subject.public, &invite.secret, None);
    Keyable {
        pubkey,
        invite_pubkey: Some(invite_pubkey),
        invited_by_id: Some(inviter_id.to_string()),
    }
}

/// Build a keyable trusted directly, with no invitation chain.
pub fn direct_keyable(key: &TestKey) -> Keyable {
    Keyable {
        pubkey: key.public.clone(),
        invite_pubkey: None,
        invited_by_id: None,
    }
}

/// Cleartext-sign `data` with the signer's signing subkey.
pub fn cleartext_sign(data: &[u8], signer_secret: &str, passphrase: Option<&str>) -> String {
    let keypair = signing_keypair(signer_secret, passphrase);

    let mut sink = Vec::new();
    {
        let message = Message::new(&mut sink);
        let mut signer = Signer::new(message, keypair)
            .expect("signer")
            .cleartext()
            .build()
            .expect("cleartext signer");
        signer.write_all(data).expect("write");
        signer.finalize().expect("finalize");
    }
    String::from_utf8(sink).expect("cleartext output is utf-8")
}

/// Serialize a trusted keyset and cleartext-sign it.
pub fn sign_keyables(
    keyables: &TrustedKeyables,
    signer_secret: &str,
    passphrase: Option<&str>,
) -> String {
    let json = serde_json::to_vec(keyables).expect("keyset json");
    cleartext_sign(&json, signer_secret, passphrase)
}

/// Encrypt `data` to the recipient and sign it with the signer, producing
/// an armored message.
pub fn encrypt_and_sign(
    data: &[u8],
    recipient_public: &str,
    signer_secret: &str,
    signer_passphrase: Option<&str>,
) -> String {
    let policy = StandardPolicy::new();
    let recipient = Cert::from_bytes(recipient_public.as_bytes()).expect("recipient cert");
    let recipients = recipient
        .keys()
        .with_policy(&policy, None)
        .supported()
        .alive()
        .revoked(false)
        .for_transport_encryption()
        .collect::<Vec<_>>();
    assert!(!recipients.is_empty(), "recipient has an encryption subkey");

    let signing_keypair = signing_keypair(signer_secret, signer_passphrase);

    let mut sink = Vec::new();
    {
        let message = Message::new(&mut sink);
        let message = Armorer::new(message).build().expect("armorer");
        let message = Encryptor::for_recipients(message, recipients)
            .build()
            .expect("encryptor");
        let message = Signer::new(message, signing_keypair)
            .expect("signer")
            .build()
            .expect("signer build");
        let mut message = LiteralWriter::new(message).build().expect("literal writer");
        message.write_all(data).expect("write");
        message.finalize().expect("finalize");
    }
    String::from_utf8(sink).expect("armored output is utf-8")
}

/// A fully-formed envelope plus the key material behind it.
pub struct EnvelopeFixture {
    pub envelope: Envelope,
    pub passphrase: String,
    pub creator: TestKey,
    pub env_signer: TestKey,
}

pub const CREATOR_ID: &str = "creator-id";
pub const SIGNER_ID: &str = "signer-id";
pub const ROOT_ID: &str = "root-id";
pub const OVERRIDES_SIGNER_ID: &str = "overrides-signer-id";

impl EnvelopeFixture {
    /// Envelope whose env signer sits directly in the creator-trusted
    /// keyset. `env_json` becomes the plaintext of the `env` body.
    pub fn basic(env_json: &str) -> Self {
        let passphrase = "swordfish".to_string();
        let creator = generate("creator", Some(&passphrase));
        let env_signer = generate("env-signer", None);

        let mut creator_trusted = TrustedKeyables::new();
        creator_trusted.insert(CREATOR_ID.into(), direct_keyable(&creator));
        creator_trusted.insert(SIGNER_ID.into(), direct_keyable(&env_signer));

        let signer_trusted = TrustedKeyables::new();

        let envelope = Envelope {
            env: encrypt_and_sign(env_json.as_bytes(), &creator.public, &env_signer.secret, None),
            encrypted_privkey: creator.secret.clone(),
            pubkey: creator.public.clone(),
            signed_trusted_pubkeys: sign_keyables(
                &creator_trusted,
                &creator.secret,
                Some(&passphrase),
            ),
            signed_by_id: SIGNER_ID.into(),
            signed_by_pubkey: env_signer.public.clone(),
            signed_by_trusted_pubkeys: sign_keyables(&signer_trusted, &env_signer.secret, None),
            ..Envelope::default()
        };

        Self {
            envelope,
            passphrase,
            creator,
            env_signer,
        }
    }

    /// [`EnvelopeFixture::basic`] plus an inheritance-overrides body from
    /// a second directly-trusted signer.
    pub fn with_inheritance(env_json: &str, overrides_json: &str) -> Self {
        let mut fixture = Self::basic(env_json);
        let overrides_signer = generate("overrides-signer", None);

        let mut creator_trusted = TrustedKeyables::new();
        creator_trusted.insert(CREATOR_ID.into(), direct_keyable(&fixture.creator));
        creator_trusted.insert(SIGNER_ID.into(), direct_keyable(&fixture.env_signer));
        creator_trusted.insert(OVERRIDES_SIGNER_ID.into(), direct_keyable(&overrides_signer));
        fixture.envelope.signed_trusted_pubkeys = sign_keyables(
            &creator_trusted,
            &fixture.creator.secret,
            Some(&fixture.passphrase),
        );

        fixture.envelope.inheritance_overrides = encrypt_and_sign(
            overrides_json.as_bytes(),
            &fixture.creator.public,
            &overrides_signer.secret,
            None,
        );
        fixture.envelope.inheritance_overrides_signed_by_id = OVERRIDES_SIGNER_ID.into();
        fixture.envelope.inheritance_overrides_signed_by_pubkey = overrides_signer.public.clone();
        fixture.envelope.inheritance_overrides_signed_by_trusted_pubkeys =
            sign_keyables(&TrustedKeyables::new(), &overrides_signer.secret, None);

        fixture
    }

    /// Envelope whose env signer is NOT in the creator-trusted keyset and
    /// must chain through `hops` invitations (signer included) to a root
    /// that is.
    pub fn with_chained_signer(env_json: &str, hops: usize) -> Self {
        assert!(hops >= 1, "chain needs at least the signer itself");

        let passphrase = "swordfish".to_string();
        let creator = generate("creator", Some(&passphrase));
        let root = generate("root", None);

        let mut creator_trusted = TrustedKeyables::new();
        creator_trusted.insert(CREATOR_ID.into(), direct_keyable(&creator));
        creator_trusted.insert(ROOT_ID.into(), direct_keyable(&root));

        // Build the chain top-down: root invites the first member, each
        // member invites the next, the last member is the env signer.
        let mut signer_trusted = TrustedKeyables::new();
        let mut inviter = root.clone();
        let mut inviter_id = ROOT_ID.to_string();
        let mut env_signer = root.clone();
        for hop in 0..hops {
            let member = generate(&format!("member-{hop}"), None);
            let member_id = if hop + 1 == hops {
                SIGNER_ID.to_string()
            } else {
                format!("member-{hop}")
            };
            signer_trusted.insert(
                member_id.clone(),
                invite_keyable(&member, &inviter, None, &inviter_id),
            );
            inviter = member.clone();
            inviter_id = member_id;
            env_signer = member;
        }

        let envelope = Envelope {
            env: encrypt_and_sign(env_json.as_bytes(), &creator.public, &env_signer.secret, None),
            encrypted_privkey: creator.secret.clone(),
            pubkey: creator.public.clone(),
            signed_trusted_pubkeys: sign_keyables(
                &creator_trusted,
                &creator.secret,
                Some(&passphrase),
            ),
            signed_by_id: SIGNER_ID.into(),
            signed_by_pubkey: env_signer.public.clone(),
            signed_by_trusted_pubkeys: sign_keyables(&signer_trusted, &env_signer.secret, None),
            ..Envelope::default()
        };

        Self {
            envelope,
            passphrase,
            creator,
            env_signer,
        }
    }
}

fn armor_public(cert: &Cert) -> String {
    let mut buf = Vec::new();
    {
        let mut writer =
            sequoia_openpgp::armor::Writer::new(&mut buf, sequoia_openpgp::armor::Kind::PublicKey)
                .expect("armor writer");
        cert.serialize(&mut writer).expect("serialize");
        writer.finalize().expect("finalize");
    }
    String::from_utf8(buf).expect("armor is utf-8")
}

fn armor_secret(cert: &Cert) -> String {
    let mut buf = Vec::new();
    {
        let mut writer =
            sequoia_openpgp::armor::Writer::new(&mut buf, sequoia_openpgp::armor::Kind::SecretKey)
                .expect("armor writer");
        cert.as_tsk().serialize(&mut writer).expect("serialize");
        writer.finalize().expect("finalize");
    }
    String::from_utf8(buf).expect("armor is utf-8")
}

/// Unlock the primary (certification-capable) key for signing.
fn certification_keypair(secret_armored: &str, passphrase: Option<&str>) -> KeyPair {
    let cert = Cert::from_bytes(secret_armored.as_bytes()).expect("secret cert");
    let key = cert
        .primary_key()
        .key()
        .clone()
        .parts_into_secret()
        .expect("primary has secret material");
    unlock(key, passphrase).into_keypair().expect("keypair")
}

/// Unlock the signing subkey.
fn signing_keypair(secret_armored: &str, passphrase: Option<&str>) -> KeyPair {
    let policy = StandardPolicy::new();
    let cert = Cert::from_bytes(secret_armored.as_bytes()).expect("secret cert");
    let ka = cert
        .keys()
        .with_policy(&policy, None)
        .supported()
        .for_signing()
        .secret()
        .next()
        .expect("cert has a signing key");
    unlock(ka.key().clone(), passphrase)
        .into_keypair()
        .expect("keypair")
}

fn unlock<R>(
    key: sequoia_openpgp::packet::Key<sequoia_openpgp::packet::key::SecretParts, R>,
    passphrase: Option<&str>,
) -> sequoia_openpgp::packet::Key<sequoia_openpgp::packet::key::SecretParts, R>
where
    R: sequoia_openpgp::packet::key::KeyRole,
{
    if key.has_unencrypted_secret() {
        key
    } else {
        let passphrase = passphrase.expect("protected key needs a passphrase");
        key.decrypt_secret(&Password::from(passphrase))
            .expect("unlock secret key")
    }
}
