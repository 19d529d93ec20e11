//! Resilient envelope retrieval: a primary fetch with retries, a
//! concurrent race against the fixed backup endpoints when the primary
//! fails, and a one-shot switch to bundled root CAs when the system
//! trust store is unusable.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use envfetch_core::IndirectFetch;
use reqwest::StatusCode;
use tokio::task::JoinSet;

use crate::FetchOptions;
use crate::credential::Credential;
use crate::error::Error;

pub(crate) const API_VERSION: u32 = 1;

/// Hosts and base URLs the pipeline talks to. Overridable for failover
/// drills and tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Host used when the credential does not carry a host suffix.
    pub default_host: String,
    /// Backup tier one: S3-style, path format `/v1/<id>`.
    pub backup_s3_base: String,
    /// Backup tier two: gateway-style, query format `?v=1&id=<id>`.
    pub backup_gateway_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            default_host: "env.envkey.com".into(),
            backup_s3_base: "https://envkey-failover.s3.amazonaws.com".into(),
            backup_gateway_base: "https://failover.envkey.com/fetch".into(),
        }
    }
}

/// Client identity appended as query parameters on every request tier.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "envkey-fetch".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl ClientInfo {
    fn query(&self) -> [(&'static str, String); 4] {
        [
            ("clientName", self.name.clone()),
            ("clientVersion", self.version.clone()),
            ("clientOs", std::env::consts::OS.to_string()),
            ("clientArch", std::env::consts::ARCH.to_string()),
        ]
    }
}

/// How a fetch ultimately failed.
#[derive(Debug)]
pub(crate) enum FetchError {
    /// 404 from any tier: the credential has been revoked.
    Revoked,
    /// Transport failure or server error; eligible for cache fallback.
    Network(String),
    /// Unexpected status; not eligible for any fallback.
    Fatal(String),
}

enum PrimaryOutcome {
    Body(Vec<u8>),
    Revoked,
    Fatal(String),
}

pub(crate) struct Fetcher {
    client: reqwest::Client,
    // Once set, every subsequent request in the process uses the bundled
    // root store instead of the native one.
    bundled_roots: OnceLock<reqwest::Client>,
    timeout: Duration,
    retries: u8,
    retry_backoff: f64,
    endpoints: Endpoints,
    info: ClientInfo,
}

impl Fetcher {
    pub(crate) fn new(options: &FetchOptions) -> Result<Self, Error> {
        let client = build_client(options.timeout, false).map_err(|e| Error::Fetch {
            reason: format!("could not build http client: {e}"),
        })?;

        let defaults = ClientInfo::default();
        Ok(Self {
            client,
            bundled_roots: OnceLock::new(),
            timeout: options.timeout,
            retries: options.retries.max(1),
            retry_backoff: options.retry_backoff,
            endpoints: options.endpoints.clone(),
            info: ClientInfo {
                name: options.client_name.clone().unwrap_or(defaults.name),
                version: options.client_version.clone().unwrap_or(defaults.version),
            },
        })
    }

    fn current_client(&self) -> &reqwest::Client {
        self.bundled_roots.get().unwrap_or(&self.client)
    }

    /// Retrieve the raw envelope for the credential: primary with
    /// retries, then the backup race when eligible.
    pub(crate) async fn fetch(&self, credential: &Credential) -> Result<Vec<u8>, FetchError> {
        let url = self.primary_url(credential);
        tracing::debug!(%url, "fetching envelope");

        match self.primary_with_retries(&url).await {
            Ok(PrimaryOutcome::Body(bytes)) => Ok(bytes),
            Ok(PrimaryOutcome::Revoked) => Err(FetchError::Revoked),
            Ok(PrimaryOutcome::Fatal(reason)) => Err(FetchError::Fatal(reason)),
            Err(primary_failure) => {
                if !self.backups_eligible(credential) {
                    return Err(FetchError::Network(primary_failure));
                }
                tracing::warn!(error = %primary_failure, "primary fetch failed, racing backups");
                match self.backup_race(&credential.id).await {
                    Ok(bytes) => Ok(bytes),
                    Err(FetchError::Network(backup_failure)) => Err(FetchError::Network(format!(
                        "primary: {primary_failure}; backups: {backup_failure}"
                    ))),
                    Err(other) => Err(other),
                }
            }
        }
    }

    async fn primary_with_retries(&self, url: &str) -> Result<PrimaryOutcome, String> {
        let mut last_failure = String::new();
        for attempt in 1..=self.retries {
            if attempt > 1 {
                // powi with a clamped exponent: large --retries values must
                // saturate the delay, not overflow.
                let exponent = i32::from(attempt).saturating_sub(2).min(31);
                let delay = self.retry_backoff * 2_f64.powi(exponent);
                tracing::debug!(attempt, delay, "retrying primary fetch");
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }

            match self.primary_attempt(url).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.bytes().await {
                            Ok(bytes) => return Ok(PrimaryOutcome::Body(bytes.to_vec())),
                            Err(error) => {
                                last_failure = error.to_string();
                                continue;
                            }
                        }
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(PrimaryOutcome::Revoked);
                    }
                    if status.is_server_error() {
                        last_failure = format!("primary returned {status}");
                        continue;
                    }
                    return Ok(PrimaryOutcome::Fatal(format!("primary returned {status}")));
                }
                Err(failure) => last_failure = failure,
            }
        }
        Err(last_failure)
    }

    async fn primary_attempt(&self, url: &str) -> Result<reqwest::Response, String> {
        let request = self.current_client().get(url).query(&self.info.query());
        match request.send().await {
            Ok(response) => Ok(response),
            Err(error) if is_missing_roots(&error) && self.bundled_roots.get().is_none() => {
                tracing::warn!(%error, "system root store unusable, switching to bundled roots");
                let fallback =
                    build_client(self.timeout, true).map_err(|e| e.to_string())?;
                let _ = self.bundled_roots.set(fallback);
                self.current_client()
                    .get(url)
                    .query(&self.info.query())
                    .send()
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(error) => Err(error.to_string()),
        }
    }

    /// Dispatch all backup requests concurrently; the first success wins
    /// and every other in-flight request is cancelled.
    async fn backup_race(&self, id: &str) -> Result<Vec<u8>, FetchError> {
        enum BackupFailure {
            Revoked,
            Other(String),
        }

        let mut in_flight = JoinSet::new();
        for (label, request) in self.backup_requests(id) {
            in_flight.spawn(async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| BackupFailure::Other(format!("{label}: {e}")))?;
                let status = response.status();
                if status == StatusCode::NOT_FOUND {
                    return Err(BackupFailure::Revoked);
                }
                if !status.is_success() {
                    return Err(BackupFailure::Other(format!("{label}: status {status}")));
                }
                response
                    .bytes()
                    .await
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| BackupFailure::Other(format!("{label}: {e}")))
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(Ok(bytes)) => {
                    in_flight.abort_all();
                    tracing::debug!("backup race won");
                    return Ok(bytes);
                }
                Ok(Err(BackupFailure::Revoked)) => {
                    in_flight.abort_all();
                    return Err(FetchError::Revoked);
                }
                Ok(Err(BackupFailure::Other(message))) => failures.push(message),
                Err(join_error) => failures.push(join_error.to_string()),
            }
        }
        Err(FetchError::Network(failures.join("; ")))
    }

    fn backup_requests(&self, id: &str) -> Vec<(&'static str, reqwest::RequestBuilder)> {
        let client = self.current_client();
        vec![
            (
                "s3 backup",
                client
                    .get(format!(
                        "{}/v{API_VERSION}/{id}",
                        self.endpoints.backup_s3_base
                    ))
                    .query(&self.info.query()),
            ),
            (
                "gateway backup",
                client
                    .get(&self.endpoints.backup_gateway_base)
                    .query(&[("v", API_VERSION.to_string()), ("id", id.to_string())])
                    .query(&self.info.query()),
            ),
        ]
    }

    pub(crate) fn primary_url(&self, credential: &Credential) -> String {
        let host = credential
            .host
            .as_deref()
            .filter(|host| !host.is_empty())
            .unwrap_or(&self.endpoints.default_host);
        let bare_host = host.split(':').next().unwrap_or(host);
        let proto = if bare_host == "localhost" {
            "http"
        } else {
            "https"
        };
        format!("{proto}://{host}/v{API_VERSION}/{}", credential.id)
    }

    /// Backups mirror the default host only; a credential naming its own
    /// host never fails over to them.
    pub(crate) fn backups_eligible(&self, credential: &Credential) -> bool {
        credential
            .host
            .as_deref()
            .is_none_or(|host| host.is_empty() || host == self.endpoints.default_host)
    }

    pub(crate) fn indirect(&self) -> IndirectClient<'_> {
        IndirectClient { fetcher: self }
    }
}

/// [`IndirectFetch`] backed by the invocation's shared HTTP client.
pub(crate) struct IndirectClient<'a> {
    fetcher: &'a Fetcher,
}

impl IndirectFetch for IndirectClient<'_> {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, String>> + Send {
        tracing::debug!(%url, "dereferencing indirect payload");
        let request = self
            .fetcher
            .current_client()
            .get(url)
            .query(&self.fetcher.info.query());
        async move {
            let response = request.send().await.map_err(|e| e.to_string())?;
            let status = response.status();
            if status.as_u16() >= 400 {
                return Err(format!("status {status}"));
            }
            response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .map_err(|e| e.to_string())
        }
    }
}

fn build_client(timeout: Duration, bundled_roots_only: bool) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .connect_timeout(timeout)
        .timeout(timeout);
    builder = if bundled_roots_only {
        builder
            .tls_built_in_native_certs(false)
            .tls_built_in_webpki_certs(true)
    } else {
        builder.tls_built_in_webpki_certs(false)
    };
    builder.build()
}

fn is_missing_roots(error: &reqwest::Error) -> bool {
    let detail = format!("{error:?}");
    detail.contains("UnknownIssuer") || detail.contains("root certificates")
}
