//! Orchestrator state handling against a mock org
//!
//! Recoverable rejections keep the flow alive; everything else ends it with a
//! reason the caller can inspect.

use assert_matches::assert_matches;
use idx_auth::{
    AuthenticationStatus, FlowState, FormValues, OrchestratorError, TerminationReason, TokenError,
    TransportError, ValidationError,
};
use idx_tests::common::{docs, json_body, IdxServer, HANDLE, STATE_HANDLE};
use serde_json::json;
use tracing_test::traced_test;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn identifier(name: &str) -> FormValues {
    FormValues::new().with("identifier", name)
}

fn passcode(secret: &str) -> FormValues {
    FormValues::new().with("passcode", secret)
}

#[tokio::test]
async fn test_identify_body_carries_state_handle() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::challenge_password(&org.base()))
        .await;

    let mut flow = org.client().start().await.unwrap();
    let outcome = flow
        .proceed("identify", &identifier("alice@example.com").with("rememberMe", true))
        .await
        .unwrap();

    assert_eq!(outcome.status, AuthenticationStatus::AwaitingAuthenticatorVerification);
    assert_eq!(outcome.names(), vec!["challenge-authenticator"]);
    let identify = &org.requests_to("/idp/idx/identify").await[0];
    assert_eq!(
        json_body(identify),
        json!({"identifier": "alice@example.com", "rememberMe": true, "stateHandle": STATE_HANDLE})
    );
}

#[tokio::test]
async fn test_missing_required_field_sends_nothing() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;

    let mut flow = org.client().start().await.unwrap();
    let err = flow.proceed("identify", &FormValues::new()).await.unwrap_err();

    assert_matches!(err, OrchestratorError::Validation(ValidationError::MissingField { .. }));
    assert!(!err.is_terminal());
    assert_eq!(flow.state(), FlowState::AwaitingRemediation);
    assert!(org.requests_to("/idp/idx/identify").await.is_empty());
}

#[tokio::test]
async fn test_wrong_password_then_right_password() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::challenge_password(&org.base()))
        .await;
    org.mount_json_times("/idp/idx/challenge/answer", 1, 400, docs::invalid_password())
        .await;
    org.mount_json("/idp/idx/challenge/answer", 200, docs::success(&org.issuer()))
        .await;
    org.mount_token().await;

    let mut flow = org.client().start().await.unwrap();
    flow.proceed("identify", &identifier("alice")).await.unwrap();

    let outcome = flow
        .proceed("challenge-authenticator", &passcode("wrong"))
        .await
        .unwrap();
    assert!(!outcome.terminal);
    assert_eq!(outcome.messages, vec!["Password is incorrect"]);
    assert!(outcome.offers("challenge-authenticator"));
    assert_eq!(flow.state(), FlowState::AwaitingRemediation);

    let outcome = flow
        .proceed("challenge-authenticator", &passcode("hunter2"))
        .await
        .unwrap();
    assert_eq!(outcome.status, AuthenticationStatus::Success);
    assert_eq!(outcome.tokens.unwrap().access_token, "at-e2e");
    assert_eq!(flow.state(), FlowState::Success);
}

#[tokio::test]
async fn test_session_expired_ends_flow() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 401, docs::session_expired())
        .await;

    let mut flow = org.client().start().await.unwrap();
    let err = flow.proceed("identify", &identifier("alice")).await.unwrap_err();

    match err {
        OrchestratorError::Unrecoverable(rejection) => {
            assert_eq!(rejection.status, 401);
            assert_eq!(rejection.code.as_deref(), Some("idx.session.expired"));
            assert_eq!(rejection.messages, vec!["The session has expired."]);
        }
        other => panic!("expected Unrecoverable, got {other:?}"),
    }
    assert_eq!(flow.state(), FlowState::Terminated(TerminationReason::Unrecoverable));
    assert_matches!(
        flow.proceed("identify", &identifier("alice")).await,
        Err(OrchestratorError::FlowTerminated)
    );
}

#[tokio::test]
async fn test_server_error_ends_flow() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/identify"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&org.server)
        .await;

    let mut flow = org.client().start().await.unwrap();
    let err = flow.proceed("identify", &identifier("alice")).await.unwrap_err();

    assert_matches!(err, OrchestratorError::Unrecoverable(ref r) if r.status == 503);
    assert_eq!(flow.state(), FlowState::Terminated(TerminationReason::Unrecoverable));
}

#[tokio::test]
async fn test_malformed_step_response_ends_flow() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    Mock::given(method("POST"))
        .and(path("/idp/idx/identify"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"stateHandle\": "))
        .mount(&org.server)
        .await;

    let mut flow = org.client().start().await.unwrap();
    let err = flow.proceed("identify", &identifier("alice")).await.unwrap_err();

    assert_matches!(err, OrchestratorError::Transport(TransportError::MalformedBody { .. }));
    assert_eq!(flow.state(), FlowState::Terminated(TerminationReason::Transport));
}

#[tokio::test]
async fn test_token_exchange_rejected() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::success(&org.issuer()))
        .await;
    org.mount_json("/oauth2/default/v1/token", 400, docs::invalid_grant())
        .await;

    let mut flow = org.client().start().await.unwrap();
    let err = flow.proceed("identify", &identifier("alice")).await.unwrap_err();

    assert_matches!(
        err,
        OrchestratorError::TokenExchange(TokenError::Rejected { status: 400, ref error, .. }) if error == "invalid_grant"
    );
    assert_eq!(flow.state(), FlowState::Terminated(TerminationReason::TokenExchange));
}

#[tokio::test]
async fn test_resume_reintrospects_same_handle() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;

    let client = org.client();
    let flow = client.start().await.unwrap();
    let context = flow.context().clone();
    drop(flow);

    let resumed = client.resume(context).await.unwrap();

    assert_eq!(resumed.context().interaction_handle(), HANDLE);
    let introspects = org.requests_to("/idp/idx/introspect").await;
    assert_eq!(introspects.len(), 2);
    assert_eq!(json_body(&introspects[1]), json!({ "interactionHandle": HANDLE }));
    assert_eq!(org.requests_to("/oauth2/default/v1/interact").await.len(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_secrets_stay_out_of_logs() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::challenge_password(&org.base()))
        .await;
    org.mount_json("/idp/idx/challenge/answer", 200, docs::success(&org.issuer()))
        .await;
    org.mount_token().await;

    let mut flow = org.client().start().await.unwrap();
    flow.proceed("identify", &identifier("alice")).await.unwrap();
    flow.proceed("challenge-authenticator", &passcode("Tr0ub4dor&3"))
        .await
        .unwrap();

    assert!(logs_contain("submitting remediation"));
    assert!(logs_contain("flow state changed"));
    assert!(!logs_contain("Tr0ub4dor&3"));
    let verifier = flow.context().code_verifier();
    assert!(!logs_contain(secrecy::ExposeSecret::expose_secret(verifier)));
}
