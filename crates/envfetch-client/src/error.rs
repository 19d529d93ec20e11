use envfetch_core::TrustError;

/// Errors surfaced by a fetch invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The credential string has fewer than two segments.
    #[error("malformed ENVKEY: expected at least <id>-<passphrase>")]
    CredentialMalformed,

    /// 404 from any tier, or a post-fetch decryption/signature failure.
    #[error("ENVKEY has been revoked or cannot be decrypted")]
    CredentialInvalid,

    /// The server answered with a status that is neither success, 404,
    /// nor a retriable server error.
    #[error("fetch failed: {reason}")]
    Fetch { reason: String },

    /// Primary, backups, and cache all failed.
    #[error("all fetch attempts failed: {summary}")]
    NetworkExhausted { summary: String },

    /// The environment signer could not be chained to a trusted root.
    #[error(transparent)]
    Trust(TrustError),

    /// The response was not a complete envelope.
    #[error("invalid response envelope: {reason}")]
    EnvelopeInvalid { reason: String },

    /// An indirect payload pointer could not be resolved.
    #[error("failed to resolve indirect payload: {reason}")]
    IndirectFetch { reason: String },

    /// The cache directory could not be opened.
    #[error("cache unavailable: {0}")]
    Cache(#[from] std::io::Error),
}

impl Error {
    /// The single line shown to the user. `CredentialInvalid` collapses to
    /// an opaque string so the message does not reveal which layer failed.
    pub fn user_message(&self) -> String {
        match self {
            Error::CredentialInvalid => "ENVKEY invalid".into(),
            other => other.to_string(),
        }
    }
}

impl From<envfetch_core::Error> for Error {
    fn from(err: envfetch_core::Error) -> Self {
        use envfetch_core::Error as Core;
        match err {
            Core::Trust(trust) => Error::Trust(trust),
            Core::EnvelopeInvalid { reason } => Error::EnvelopeInvalid { reason },
            Core::Json(json) => Error::EnvelopeInvalid {
                reason: json.to_string(),
            },
            Core::IndirectFetch { url, reason } => Error::IndirectFetch {
                reason: format!("{url}: {reason}"),
            },
            other => {
                tracing::debug!(error = %other, "payload verification failed");
                Error::CredentialInvalid
            }
        }
    }
}
