//! Whole flows, from interact to tokens or termination

use idx_auth::flows;
use idx_auth::pkce;
use idx_auth::{AuthenticationStatus, FlowState, FormValues, TerminationReason};
use idx_tests::common::{
    docs, form_value, json_body, setup_test_logging, IdxServer, CLIENT_ID, STATE_HANDLE,
};
use secrecy::SecretString;
use serde_json::json;

#[tokio::test]
async fn test_password_sign_in_issues_tokens() {
    setup_test_logging();
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::challenge_password(&org.base()))
        .await;
    org.mount_json("/idp/idx/challenge/answer", 200, docs::success(&org.issuer()))
        .await;
    org.mount_token().await;

    let mut flow = org.client().start().await.unwrap();
    let outcome = flow
        .proceed("identify", &FormValues::new().with("identifier", "alice@example.com"))
        .await
        .unwrap();
    let challenge = outcome.step("challenge-authenticator").unwrap();
    assert_eq!(challenge.required_fields, vec!["credentials"]);

    let outcome = flow
        .proceed("challenge-authenticator", &FormValues::new().with("passcode", "hunter2"))
        .await
        .unwrap();

    assert!(outcome.terminal);
    assert_eq!(outcome.status, AuthenticationStatus::Success);
    let tokens = outcome.tokens.unwrap();
    assert!(!tokens.access_token.is_empty());
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.refresh_token.as_deref(), Some("rt-e2e"));
    assert!(!tokens.is_expired());
    assert_eq!(flow.state(), FlowState::Success);

    let answer = &org.requests_to("/idp/idx/challenge/answer").await[0];
    assert_eq!(
        json_body(answer),
        json!({"credentials": {"passcode": "hunter2"}, "stateHandle": STATE_HANDLE})
    );

    let token = &org.requests_to("/oauth2/default/v1/token").await[0];
    assert_eq!(form_value(token, "grant_type").as_deref(), Some("interaction_code"));
    assert_eq!(form_value(token, "interaction_code").as_deref(), Some("ic-e2e"));
    assert_eq!(form_value(token, "client_id").as_deref(), Some(CLIENT_ID));

    // The verifier sent at exchange matches the challenge sent at interact
    let interact = &org.requests_to("/oauth2/default/v1/interact").await[0];
    let verifier = form_value(token, "code_verifier").unwrap();
    let challenge = form_value(interact, "code_challenge").unwrap();
    assert!(pkce::verify(&verifier, &challenge));
}

#[tokio::test]
async fn test_unknown_user_stays_on_identify() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 400, docs::unknown_user(&org.base()))
        .await;

    let mut flow = org.client().start().await.unwrap();
    let outcome = flow
        .proceed("identify", &FormValues::new().with("identifier", "mallory"))
        .await
        .unwrap();

    assert!(!outcome.terminal);
    assert_eq!(outcome.messages, vec!["There is no account with the Username mallory."]);
    assert!(outcome.offers("identify"));
    assert_eq!(flow.state(), FlowState::AwaitingRemediation);
}

#[tokio::test]
async fn test_push_approved_after_three_polls() {
    let org = IdxServer::start().await;
    org.mount_interact().await;
    org.mount_introspect(docs::select_authenticator(&org.base())).await;
    org.mount_json("/idp/idx/challenge", 200, docs::push_waiting(&org.base(), 0.01))
        .await;
    org.mount_json_times(
        "/idp/idx/authenticators/poll",
        3,
        200,
        docs::push_waiting(&org.base(), 0.01),
    )
    .await;
    org.mount_json("/idp/idx/authenticators/poll", 200, docs::success(&org.issuer()))
        .await;
    org.mount_token().await;

    let mut flow = org.client().start().await.unwrap();
    let outcome = flow
        .proceed(
            "select-authenticator-authenticate",
            &FormValues::new().with("authenticator", json!({"id": "aut-ov", "methodType": "push"})),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, AuthenticationStatus::Success);
    assert_eq!(outcome.tokens.unwrap().access_token, "at-e2e");
    let polls = org.requests_to("/idp/idx/authenticators/poll").await;
    assert_eq!(polls.len(), 4);
    assert_eq!(json_body(&polls[0]), json!({ "stateHandle": STATE_HANDLE }));
    assert_eq!(org.requests_to("/oauth2/default/v1/token").await.len(), 1);
}

#[tokio::test]
async fn test_cancel_mid_flow() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::challenge_password(&org.base()))
        .await;
    org.mount_cancel().await;

    let mut flow = org.client().start().await.unwrap();
    flow.proceed("identify", &FormValues::new().with("identifier", "alice"))
        .await
        .unwrap();
    let outcome = flow.cancel().await.unwrap();

    assert!(outcome.terminal);
    assert!(outcome.remediations.is_empty());
    assert_eq!(outcome.messages, vec!["The flow was cancelled."]);
    assert_eq!(flow.state(), FlowState::Terminated(TerminationReason::Cancelled));
    let cancel = &org.requests_to("/idp/idx/cancel").await[0];
    assert_eq!(json_body(cancel), json!({ "stateHandle": STATE_HANDLE }));
}

#[tokio::test]
async fn test_authenticate_helper_end_to_end() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    org.mount_json("/idp/idx/identify", 200, docs::select_authenticator(&org.base()))
        .await;
    org.mount_json("/idp/idx/challenge", 200, docs::challenge_password(&org.base()))
        .await;
    org.mount_json("/idp/idx/challenge/answer", 200, docs::success(&org.issuer()))
        .await;
    org.mount_token().await;

    let response = flows::authenticate(
        &org.client(),
        "alice@example.com",
        &SecretString::from("hunter2".to_string()),
    )
    .await
    .unwrap();

    assert!(response.is_success());
    assert!(response.errors.is_empty());
    assert_eq!(response.tokens.unwrap().id_token.as_deref(), Some("id-e2e"));
    assert_eq!(
        org.paths().await,
        vec![
            "/oauth2/default/v1/interact",
            "/idp/idx/introspect",
            "/idp/idx/identify",
            "/idp/idx/challenge",
            "/idp/idx/challenge/answer",
            "/oauth2/default/v1/token",
        ]
    );
}
