/// Errors that can occur while decoding and verifying a fetched payload.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An armored key or message could not be parsed.
    #[error("invalid ASCII armor: {reason}")]
    InvalidArmor { reason: String },

    /// The credential passphrase could not unlock the private key.
    #[error("failed to unlock private key: {reason}")]
    KeyUnlock { reason: String },

    /// The envelope's public key does not belong to its private key.
    #[error("public key does not match the encrypted private key")]
    KeyPairMismatch,

    /// Decryption failed, or the decrypted message carried no valid
    /// signature from the declared signer.
    #[error("failed to decrypt and verify message: {reason}")]
    Decryption { reason: String },

    /// A signature check on a key or document failed.
    #[error("signature verification failed: {reason}")]
    Verification { reason: String },

    /// The envelope is missing required fields or mixes inheritance
    /// fields inconsistently.
    #[error("invalid response envelope: {reason}")]
    EnvelopeInvalid { reason: String },

    /// A signer could not be chained back to the creator-trusted keyset.
    #[error(transparent)]
    Trust(#[from] TrustError),

    /// An indirect payload pointer could not be resolved.
    #[error("failed to fetch indirect payload from {url}: {reason}")]
    IndirectFetch { url: String, reason: String },

    /// A plaintext that should have been JSON was not.
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures produced while walking the invitation trust graph.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// A signed trusted-keys document did not verify against its declared
    /// signer, so its keyset was never materialized.
    #[error("trusted keyset signature is invalid: {reason}")]
    KeysetSignature { reason: String },

    /// The signer id is absent from every keyset it could legally chain
    /// through.
    #[error("signer {id} is not present in any trusted keyset")]
    NotTrusted { id: String },

    /// The keyset entry for the id carries a different key than the
    /// signer declared.
    #[error("pubkey for {id} does not match the trusted keyset entry")]
    FingerprintMismatch { id: String },

    /// A keyable on the chain has no `invitedById`.
    #[error("keyable {id} has no inviter")]
    MissingInviter { id: String },

    /// A keyable on the chain has no invite pubkey to check.
    #[error("keyable {id} has no invite pubkey")]
    MissingInviteKey { id: String },

    /// The chain revisited an id it already walked.
    #[error("invitation chain revisits {id}")]
    CircularChain { id: String },

    /// The chain ran off the end of the pool without reaching the
    /// creator-trusted keyset.
    #[error("invitation chain for {id} does not terminate at a trusted root")]
    NoTrustedRoot { id: String },

    /// The invite pubkey is not certified by the inviter.
    #[error("invite pubkey for {id} is not signed by its inviter")]
    InviteNotSigned { id: String },

    /// The keyable's pubkey is not certified by its own invite pubkey.
    #[error("pubkey for {id} is not signed by its invite pubkey")]
    PubkeyNotSigned { id: String },
}

/// Convenience type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
