//! # envfetch-client
//!
//! Network retrieval and caching for envkey-fetch.
//!
//! [`fetch_env`] runs the whole invocation: it splits the credential,
//! retrieves the JSON envelope (primary fetch, then a race against the
//! backup endpoints, then the local disk cache), hands the envelope to
//! `envfetch-core` for verification and decryption, and returns the flat
//! environment-variable JSON object.
//!
//! A 404 from any tier means the credential has been revoked: the cache
//! entry is invalidated and no fallback applies. Cache writes happen off
//! the return path and are gated on the server's `allow_caching` flag.

pub mod cache;
pub mod credential;
pub mod error;
pub mod fetch;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::ExposeSecret;

use envfetch_core::{Envelope, PayloadVerifier, SequoiaEngine};

pub use cache::Cache;
pub use credential::Credential;
pub use error::Error;
pub use fetch::{ClientInfo, Endpoints};
use fetch::{FetchError, Fetcher};

/// Tunables for one fetch invocation.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Persist and fall back to the local disk cache.
    pub cache_enabled: bool,
    /// Cache directory override; defaults to `$HOME/.envkey/cache`.
    pub cache_dir: Option<PathBuf>,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    /// Per-request timeout, applied to connect and to the full request.
    pub timeout: Duration,
    /// Attempts for the primary fetch. Backups and the cache get one.
    pub retries: u8,
    /// Base backoff in seconds; attempt `n` waits `backoff * 2^(n-1)`.
    pub retry_backoff: f64,
    pub endpoints: Endpoints,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_enabled: false,
            cache_dir: None,
            client_name: None,
            client_version: None,
            timeout: Duration::from_secs(10),
            retries: 3,
            retry_backoff: 1.0,
            endpoints: Endpoints::default(),
        }
    }
}

/// Fetch, verify, and decrypt the environment for `raw_credential`.
///
/// On success the returned string is the final JSON object of environment
/// variables, inheritance overrides already applied.
pub async fn fetch_env(raw_credential: &str, options: &FetchOptions) -> Result<String, Error> {
    let credential = Credential::parse(raw_credential)?;
    let cache = if options.cache_enabled {
        Some(Cache::new(options.cache_dir.clone())?)
    } else {
        None
    };
    let fetcher = Fetcher::new(options)?;

    let (body, from_cache) = match fetcher.fetch(&credential).await {
        Ok(bytes) => (bytes, false),
        Err(FetchError::Revoked) => {
            if let Some(cache) = &cache {
                let _ = cache.delete(&credential.id).await;
            }
            return Err(Error::CredentialInvalid);
        }
        Err(FetchError::Fatal(reason)) => return Err(Error::Fetch { reason }),
        Err(FetchError::Network(summary)) => match &cache {
            Some(cache) => match cache.read(&credential.id).await {
                Ok(bytes) => {
                    tracing::warn!("network unavailable, falling back to cached envelope");
                    (bytes, true)
                }
                Err(cache_error) => {
                    return Err(Error::NetworkExhausted {
                        summary: format!("{summary}; cache: {cache_error}"),
                    });
                }
            },
            None => return Err(Error::NetworkExhausted { summary }),
        },
    };

    let envelope: Envelope = serde_json::from_slice(&body).map_err(|e| Error::EnvelopeInvalid {
        reason: e.to_string(),
    })?;

    // Persisted off the return path; completion is only polled, never
    // awaited.
    let mut write_done = None;
    if let Some(cache) = &cache {
        if envelope.allow_caching && !from_cache {
            write_done = Some(cache.write(&credential.id, body.clone()));
        }
    }

    let engine = SequoiaEngine::new();
    let indirect = fetcher.indirect();
    let verifier = PayloadVerifier::new(&engine, &indirect);
    let output = match verifier
        .process(&envelope, credential.passphrase.expose_secret())
        .await
    {
        Ok(json) => json,
        Err(core_error) => {
            let error = Error::from(core_error);
            if matches!(error, Error::CredentialInvalid) {
                if let Some(cache) = &cache {
                    let _ = cache.delete(&credential.id).await;
                }
            }
            return Err(error);
        }
    };

    if let Some(mut done) = write_done {
        let _ = done.try_recv();
    }
    Ok(output)
}
