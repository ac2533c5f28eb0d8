//! Wire-level behaviour of the HTTP transport against a mock org
//!
//! These tests verify that requests carry:
//! - the ion media type on IDX calls and form encoding on OAuth calls
//! - the PKCE challenge and client parameters on interact
//! - the device token and cookies the org hands out

use assert_matches::assert_matches;
use idx_auth::builders::ION_JSON;
use idx_auth::{
    ClientConfig, HttpTransport, IdxClient, IdxConfig, IdxRequest, OrchestratorError, Transport,
    TransportError, TransportSettings,
};
use idx_tests::common::{docs, form_value, header_value, json_body, IdxServer, CLIENT_ID, HANDLE, REDIRECT_URI};
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_interact_is_form_encoded_with_pkce() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;

    let flow = org.client().start().await.unwrap();

    let interact = &org.requests_to("/oauth2/default/v1/interact").await[0];
    assert_eq!(
        header_value(interact, "content-type").as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(form_value(interact, "client_id").as_deref(), Some(CLIENT_ID));
    assert_eq!(form_value(interact, "redirect_uri").as_deref(), Some(REDIRECT_URI));
    assert_eq!(form_value(interact, "scope").as_deref(), Some("openid profile"));
    assert_eq!(form_value(interact, "code_challenge_method").as_deref(), Some("S256"));
    assert_eq!(form_value(interact, "state").as_deref(), Some(flow.context().state()));
    assert_eq!(
        form_value(interact, "code_challenge").as_deref(),
        Some(flow.context().code_challenge())
    );
    assert!(form_value(interact, "client_secret").is_none());
    assert!(form_value(interact, "code_verifier").is_none());
}

#[tokio::test]
async fn test_confidential_client_sends_secret_on_interact() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    let mut config = org.config();
    config.client = config.client.with_secret("s3cr3t");

    org.client_with(config).start().await.unwrap();

    let interact = &org.requests_to("/oauth2/default/v1/interact").await[0];
    assert_eq!(form_value(interact, "client_secret").as_deref(), Some("s3cr3t"));
}

#[tokio::test]
async fn test_idx_requests_use_ion_media_type() {
    let org = IdxServer::start().await;
    org.mount_interact().await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/introspect"))
        .and(header("content-type", ION_JSON))
        .and(header("accept", ION_JSON))
        .respond_with(ResponseTemplate::new(200).set_body_json(docs::identify(&org.base())))
        .expect(1)
        .mount(&org.server)
        .await;

    let flow = org.client().start().await.unwrap();

    assert_eq!(flow.context().interaction_handle(), HANDLE);
    let introspect = &org.requests_to("/idp/idx/introspect").await[0];
    assert_eq!(json_body(introspect), json!({ "interactionHandle": HANDLE }));
}

#[tokio::test]
async fn test_default_user_agent() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;

    org.client().start().await.unwrap();

    for request in org.requests().await {
        let agent = header_value(&request, "user-agent").unwrap_or_default();
        assert!(agent.starts_with("idx-rs/"), "unexpected user agent {agent}");
    }
}

#[tokio::test]
async fn test_device_token_on_every_request() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::challenge_password(&org.base()))
        .await;
    let mut config = org.config();
    config.transport.device_token = Some("dt-42".to_string());

    let mut flow = org.client_with(config).start().await.unwrap();
    flow.proceed(
        "identify",
        &idx_auth::FormValues::new().with("identifier", "alice@example.com"),
    )
    .await
    .unwrap();

    let requests = org.requests().await;
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(header_value(request, "x-device-token").as_deref(), Some("dt-42"));
    }
}

#[tokio::test]
async fn test_cookies_set_by_org_are_sent_back() {
    let org = IdxServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/default/v1/interact"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "JSESSIONID=abc123; Path=/")
                .set_body_json(json!({ "interaction_handle": HANDLE })),
        )
        .mount(&org.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/introspect"))
        .and(header("cookie", "JSESSIONID=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(docs::identify(&org.base())))
        .expect(1)
        .mount(&org.server)
        .await;

    let flow = org.client().start().await.unwrap();
    assert!(flow.outcome().unwrap().offers("identify"));
}

#[tokio::test]
async fn test_malformed_introspect_body() {
    let org = IdxServer::start().await;
    org.mount_interact().await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&org.server)
        .await;

    let err = org.client().start().await.unwrap_err();

    assert_matches!(
        err,
        OrchestratorError::Transport(TransportError::MalformedBody { url, .. }) if url.ends_with("/idp/idx/introspect")
    );
}

/// A local port nothing listens on
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn token_request(url: String) -> IdxRequest {
    IdxRequest::form(
        url,
        vec![
            ("grant_type".to_string(), "interaction_code".to_string()),
            ("interaction_code".to_string(), "ic-1".to_string()),
        ],
    )
}

#[tokio::test]
async fn test_unreachable_org() {
    let port = closed_port();
    let issuer = format!("http://127.0.0.1:{port}/oauth2/default");
    let config = IdxConfig::new(ClientConfig::new(&issuer, CLIENT_ID, REDIRECT_URI).unwrap());

    let err = IdxClient::new(config).unwrap().start().await.unwrap_err();
    assert_matches!(err, OrchestratorError::Transport(TransportError::Connect { .. }));
}

#[tokio::test]
async fn test_interact_rejected() {
    let org = IdxServer::start().await;
    org.mount_json(
        "/oauth2/default/v1/interact",
        400,
        json!({"error": "invalid_client", "error_description": "Client authentication failed."}),
    )
    .await;

    let err = org.client().start().await.unwrap_err();

    match err {
        OrchestratorError::Unrecoverable(rejection) => {
            assert_eq!(rejection.status, 400);
            assert_eq!(rejection.code.as_deref(), Some("invalid_client"));
        }
        other => panic!("expected Unrecoverable, got {other:?}"),
    }
    assert!(org.requests_to("/idp/idx/introspect").await.is_empty());
}

#[tokio::test]
async fn test_timed_out_request_is_sent_once() {
    let org = IdxServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/default/v1/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(docs::tokens())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&org.server)
        .await;
    let settings = TransportSettings {
        timeout: Duration::from_millis(100),
        max_retries: 2,
        retry_backoff: Duration::from_millis(10),
        ..TransportSettings::default()
    };
    let transport = HttpTransport::new(&settings).unwrap();

    let err = transport
        .send(&token_request(format!("{}/v1/token", org.issuer())))
        .await
        .unwrap_err();

    assert_matches!(err, TransportError::Timeout { .. });
    assert_eq!(org.requests_to("/oauth2/default/v1/token").await.len(), 1);
}

#[tokio::test]
async fn test_connection_failures_are_retried() {
    let port = closed_port();
    let settings = TransportSettings {
        max_retries: 2,
        retry_backoff: Duration::from_millis(100),
        ..TransportSettings::default()
    };
    let transport = HttpTransport::new(&settings).unwrap();

    let begun = Instant::now();
    let err = transport
        .send(&token_request(format!("http://127.0.0.1:{port}/oauth2/default/v1/token")))
        .await
        .unwrap_err();

    assert_matches!(err, TransportError::Connect { .. });
    // backoff of 100ms then 200ms between the three attempts
    assert!(begun.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_rejections_are_not_retried() {
    let org = IdxServer::start().await;
    org.mount_json("/idp/idx/identify", 400, docs::invalid_password())
        .await;
    let settings = TransportSettings {
        max_retries: 3,
        retry_backoff: Duration::from_millis(10),
        ..TransportSettings::default()
    };
    let transport = HttpTransport::new(&settings).unwrap();

    let response = transport
        .send(&IdxRequest::json(
            "POST",
            format!("{}/idp/idx/identify", org.base()),
            json!({ "identifier": "alice" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(org.requests_to("/idp/idx/identify").await.len(), 1);
}
