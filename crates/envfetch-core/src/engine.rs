use crate::error::Result;

/// Identifying metadata extracted from a parsed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Primary-key fingerprint, hex.
    pub fingerprint: String,
}

/// The decryptor/signer pair one decrypt-and-verify call operates on:
/// the credential's passphrase-encrypted private key plus the public key
/// of whoever signed the message.
#[derive(Debug, Clone, Copy)]
pub struct DecryptRing<'a> {
    pub encrypted_privkey: &'a str,
    pub passphrase: &'a str,
    pub signer_pubkey: &'a str,
}

/// Trait abstracting the OpenPGP operations the payload pipeline needs.
///
/// This allows the crypto backend to be swapped (e.g. for testing with
/// a mock implementation) without affecting the rest of the pipeline.
/// Implementations must treat [`decrypt_and_verify`](Self::decrypt_and_verify)
/// as atomic: no plaintext is ever returned without a verified signature.
pub trait PgpEngine: Send + Sync {
    /// Parse an ASCII-armored public key.
    fn read_public_key(&self, armored: &str) -> Result<KeyInfo>;

    /// Parse an ASCII-armored private key and unlock its secret material
    /// with the given passphrase.
    fn read_private_key(&self, armored: &str, passphrase: &str) -> Result<KeyInfo>;

    /// Check that the public key and the (unlockable) private key form a
    /// valid pair.
    fn verify_public_matches_private(
        &self,
        pubkey: &str,
        encrypted_privkey: &str,
        passphrase: &str,
    ) -> Result<()>;

    /// Check that the `signed` armored key carries a valid certification
    /// issued by the `signer` armored key.
    fn verify_key_signed_by(&self, signed: &str, signer: &str) -> Result<()>;

    /// Verify a cleartext-signed document against the signer's public key
    /// and return the embedded plaintext.
    fn verify_cleartext_signed(&self, document: &str, signer_pubkey: &str) -> Result<Vec<u8>>;

    /// Decrypt an armored message with the ring's private key and verify
    /// its signature against the ring's signer key, in one operation.
    fn decrypt_and_verify(&self, message: &str, ring: &DecryptRing<'_>) -> Result<Vec<u8>>;
}
