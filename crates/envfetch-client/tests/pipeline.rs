//! End-to-end tests of the fetch pipeline against mock HTTP servers,
//! using real OpenPGP envelopes throughout.

use std::time::Duration;

use envfetch_client::{Endpoints, Error, FetchOptions, fetch_env};
use envfetch_core::testkit::EnvelopeFixture;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ID: &str = "AAAA";

fn options() -> FetchOptions {
    FetchOptions {
        retries: 1,
        retry_backoff: 0.01,
        timeout: Duration::from_secs(5),
        ..FetchOptions::default()
    }
}

/// Credential whose host suffix points the primary fetch at the server.
fn credential(fixture: &EnvelopeFixture, server: &MockServer) -> String {
    format!(
        "{ID}-{}-localhost:{}",
        fixture.passphrase,
        server.address().port()
    )
}

/// Credential with no host suffix; pair with `default_host_endpoints`.
fn bare_credential(fixture: &EnvelopeFixture) -> String {
    format!("{ID}-{}", fixture.passphrase)
}

/// Endpoints whose default host is the given server, so backups stay
/// eligible.
fn default_host_endpoints(primary: &MockServer) -> Endpoints {
    Endpoints {
        default_host: format!("localhost:{}", primary.address().port()),
        ..Endpoints::default()
    }
}

fn envelope_body(fixture: &EnvelopeFixture) -> Vec<u8> {
    serde_json::to_vec(&fixture.envelope).unwrap()
}

async fn mount_envelope(server: &MockServer, fixture: &EnvelopeFixture) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(envelope_body(fixture), "application/json"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_happy_path_no_inheritance() {
    let fixture = EnvelopeFixture::basic(r#"{"TEST":"it","TEST_2":"works!"}"#);
    let server = MockServer::start().await;
    mount_envelope(&server, &fixture).await;

    let output = fetch_env(&credential(&fixture, &server), &options())
        .await
        .unwrap();
    assert_eq!(output, r#"{"TEST":"it","TEST_2":"works!"}"#);
}

#[tokio::test]
async fn test_happy_path_inheritance_overlay() {
    let fixture =
        EnvelopeFixture::with_inheritance(r#"{"A":"1","B":"2"}"#, r#"{"B":"override","C":"3"}"#);
    let server = MockServer::start().await;
    mount_envelope(&server, &fixture).await;

    let output = fetch_env(&credential(&fixture, &server), &options())
        .await
        .unwrap();
    let merged: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&output).unwrap();
    assert_eq!(merged["A"], "1");
    assert_eq!(merged["B"], "override");
    assert_eq!(merged["C"], "3");
}

#[tokio::test]
async fn test_primary_500_backup_wins() {
    let fixture = EnvelopeFixture::basic(r#"{"TEST":"it","TEST_2":"works!"}"#);

    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&primary)
        .await;

    let backup = MockServer::start().await;
    mount_envelope(&backup, &fixture).await;
    // The slower gateway tier loses the race.
    Mock::given(method("GET"))
        .and(path("/gateway"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(envelope_body(&fixture), "application/json")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&backup)
        .await;

    let opts = FetchOptions {
        endpoints: Endpoints {
            default_host: format!("localhost:{}", primary.address().port()),
            backup_s3_base: backup.uri(),
            backup_gateway_base: format!("{}/gateway", backup.uri()),
        },
        ..options()
    };

    let output = fetch_env(&bare_credential(&fixture), &opts).await.unwrap();
    assert_eq!(output, r#"{"TEST":"it","TEST_2":"works!"}"#);
}

#[tokio::test]
async fn test_custom_host_never_races_backups() {
    let fixture = EnvelopeFixture::basic("{}");

    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&primary)
        .await;

    let backup = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backup)
        .await;

    let opts = FetchOptions {
        endpoints: Endpoints {
            backup_s3_base: backup.uri(),
            backup_gateway_base: format!("{}/gateway", backup.uri()),
            ..Endpoints::default()
        },
        ..options()
    };

    // Host suffix differs from the default host, so the failure is final.
    let result = fetch_env(&credential(&fixture, &primary), &opts).await;
    assert!(matches!(result, Err(Error::NetworkExhausted { .. })));
}

#[tokio::test]
async fn test_all_network_fails_cache_hit() {
    let fixture = EnvelopeFixture::basic(r#"{"TEST":"cached"}"#);
    let cache_dir = tempfile::tempdir().unwrap();
    std::fs::write(cache_dir.path().join(ID), envelope_body(&fixture)).unwrap();

    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&primary)
        .await;

    let opts = FetchOptions {
        cache_enabled: true,
        cache_dir: Some(cache_dir.path().to_path_buf()),
        endpoints: Endpoints {
            default_host: format!("localhost:{}", primary.address().port()),
            // Nothing listens on the discard port: both backups fail.
            backup_s3_base: "http://127.0.0.1:9".into(),
            backup_gateway_base: "http://127.0.0.1:9/gateway".into(),
        },
        ..options()
    };

    let output = fetch_env(&bare_credential(&fixture), &opts).await.unwrap();
    assert_eq!(output, r#"{"TEST":"cached"}"#);
}

#[tokio::test]
async fn test_all_network_fails_no_cache_entry() {
    let fixture = EnvelopeFixture::basic("{}");
    let cache_dir = tempfile::tempdir().unwrap();

    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&primary)
        .await;

    let opts = FetchOptions {
        cache_enabled: true,
        cache_dir: Some(cache_dir.path().to_path_buf()),
        endpoints: Endpoints {
            default_host: format!("localhost:{}", primary.address().port()),
            backup_s3_base: "http://127.0.0.1:9".into(),
            backup_gateway_base: "http://127.0.0.1:9/gateway".into(),
        },
        ..options()
    };

    let result = fetch_env(&bare_credential(&fixture), &opts).await;
    assert!(matches!(result, Err(Error::NetworkExhausted { .. })));
}

#[tokio::test]
async fn test_404_revokes_and_clears_cache() {
    let fixture = EnvelopeFixture::basic("{}");
    let cache_dir = tempfile::tempdir().unwrap();
    std::fs::write(cache_dir.path().join(ID), b"stale envelope").unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let opts = FetchOptions {
        cache_enabled: true,
        cache_dir: Some(cache_dir.path().to_path_buf()),
        ..options()
    };

    let result = fetch_env(&credential(&fixture, &server), &opts).await;
    let error = result.unwrap_err();
    assert!(matches!(error, Error::CredentialInvalid));
    assert_eq!(error.user_message(), "ENVKEY invalid");
    assert!(!cache_dir.path().join(ID).exists());
}

#[tokio::test]
async fn test_allow_caching_writes_envelope() {
    let mut fixture = EnvelopeFixture::basic("{}");
    fixture.envelope.allow_caching = true;
    let cache_dir = tempfile::tempdir().unwrap();

    let server = MockServer::start().await;
    mount_envelope(&server, &fixture).await;

    let opts = FetchOptions {
        cache_enabled: true,
        cache_dir: Some(cache_dir.path().to_path_buf()),
        ..options()
    };
    fetch_env(&credential(&fixture, &server), &opts)
        .await
        .unwrap();

    // The write is fire-and-forget; give it a moment to land.
    let entry = cache_dir.path().join(ID);
    for _ in 0..50 {
        if entry.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(std::fs::read(&entry).unwrap(), envelope_body(&fixture));
}

#[tokio::test]
async fn test_caching_denied_writes_nothing() {
    let fixture = EnvelopeFixture::basic("{}");
    let cache_dir = tempfile::tempdir().unwrap();

    let server = MockServer::start().await;
    mount_envelope(&server, &fixture).await;

    let opts = FetchOptions {
        cache_enabled: true,
        cache_dir: Some(cache_dir.path().to_path_buf()),
        ..options()
    };
    fetch_env(&credential(&fixture, &server), &opts)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!cache_dir.path().join(ID).exists());
}

#[tokio::test]
async fn test_wrong_passphrase_is_credential_invalid_and_clears_cache() {
    let fixture = EnvelopeFixture::basic("{}");
    let cache_dir = tempfile::tempdir().unwrap();
    std::fs::write(cache_dir.path().join(ID), envelope_body(&fixture)).unwrap();

    let server = MockServer::start().await;
    mount_envelope(&server, &fixture).await;

    let raw = format!("{ID}-wrongpass-localhost:{}", server.address().port());
    let opts = FetchOptions {
        cache_enabled: true,
        cache_dir: Some(cache_dir.path().to_path_buf()),
        ..options()
    };

    let result = fetch_env(&raw, &opts).await;
    assert!(matches!(result, Err(Error::CredentialInvalid)));
    assert!(!cache_dir.path().join(ID).exists());
}

#[tokio::test]
async fn test_primary_retry_then_success() {
    let fixture = EnvelopeFixture::basic(r#"{"TEST":"it"}"#);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_envelope(&server, &fixture).await;

    let opts = FetchOptions {
        retries: 2,
        ..options()
    };
    let output = fetch_env(&credential(&fixture, &server), &opts)
        .await
        .unwrap();
    assert_eq!(output, r#"{"TEST":"it"}"#);
}

#[tokio::test]
async fn test_indirect_env_pointer_end_to_end() {
    let env_json = r#"{"TEST":"it","TEST_2":"works!"}"#;
    let fixture = EnvelopeFixture::basic(env_json);
    let server = MockServer::start().await;

    // Point the inline body at a ciphertext served over HTTP.
    let indirect_url = format!("{}/indirect/env", server.uri());
    let real_ciphertext = envfetch_core::testkit::encrypt_and_sign(
        env_json.as_bytes(),
        &fixture.creator.public,
        &fixture.env_signer.secret,
        None,
    );
    let mut pointered = EnvelopeFixture {
        envelope: fixture.envelope.clone(),
        passphrase: fixture.passphrase.clone(),
        creator: fixture.creator.clone(),
        env_signer: fixture.env_signer.clone(),
    };
    pointered.envelope.env = envfetch_core::testkit::encrypt_and_sign(
        format!("\"{indirect_url}\"").as_bytes(),
        &fixture.creator.public,
        &fixture.env_signer.secret,
        None,
    );

    mount_envelope(&server, &pointered).await;
    Mock::given(method("GET"))
        .and(path("/indirect/env"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(real_ciphertext, "text/plain"))
        .mount(&server)
        .await;

    let output = fetch_env(&credential(&pointered, &server), &options())
        .await
        .unwrap();
    assert_eq!(output, env_json);
}

#[tokio::test]
async fn test_malformed_credential() {
    let result = fetch_env("AAAA", &options()).await;
    assert!(matches!(result, Err(Error::CredentialMalformed)));
}

#[tokio::test]
async fn test_garbage_response_is_envelope_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let raw = format!("{ID}-pass-localhost:{}", server.address().port());
    let result = fetch_env(&raw, &options()).await;
    assert!(matches!(result, Err(Error::EnvelopeInvalid { .. })));
}
