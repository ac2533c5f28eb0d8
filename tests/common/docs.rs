//! IDX documents with hrefs pointing at a mock server

use super::STATE_HANDLE;
use serde_json::{json, Value};

fn state_field() -> Value {
    json!({"name": "stateHandle", "required": true, "value": STATE_HANDLE, "visible": false, "mutable": false})
}

pub fn cancel(base: &str) -> Value {
    json!({"rel": ["create-form"], "name": "cancel", "href": format!("{base}/idp/idx/cancel"),
           "method": "POST", "accepts": "application/json; okta-version=1.0.0",
           "value": [state_field()]})
}

pub fn identify(base: &str) -> Value {
    json!({
        "version": "1.0.0",
        "stateHandle": STATE_HANDLE,
        "expiresAt": "2030-01-01T00:00:00.000Z",
        "intent": "LOGIN",
        "remediation": {"type": "array", "value": [
            {"rel": ["create-form"], "name": "identify", "href": format!("{base}/idp/idx/identify"),
             "method": "POST", "accepts": "application/json; okta-version=1.0.0",
             "value": [
                {"name": "identifier", "label": "Username", "required": true},
                {"name": "rememberMe", "type": "boolean", "label": "Remember this device"},
                state_field()
             ]},
            {"rel": ["create-form"], "name": "select-enroll-profile", "href": format!("{base}/idp/idx/enroll"),
             "method": "POST", "value": [state_field()]}
        ]},
        "cancel": cancel(base)
    })
}

pub fn challenge_password(base: &str) -> Value {
    json!({
        "stateHandle": STATE_HANDLE,
        "remediation": {"type": "array", "value": [
            {"name": "challenge-authenticator", "href": format!("{base}/idp/idx/challenge/answer"),
             "method": "POST", "relatesTo": ["$.currentAuthenticatorEnrollment"],
             "value": [
                {"name": "credentials", "type": "object", "required": true,
                 "form": {"value": [{"name": "passcode", "label": "Password", "secret": true}]}},
                state_field()
             ]}
        ]},
        "currentAuthenticatorEnrollment": {"type": "object", "value": {
            "type": "password", "key": "okta_password", "id": "aut-pw", "displayName": "Password",
            "methods": [{"type": "password"}]
        }},
        "cancel": cancel(base)
    })
}

pub fn select_authenticator(base: &str) -> Value {
    json!({
        "stateHandle": STATE_HANDLE,
        "remediation": {"type": "array", "value": [
            {"name": "select-authenticator-authenticate", "href": format!("{base}/idp/idx/challenge"),
             "method": "POST", "value": [
                {"name": "authenticator", "type": "object", "options": [
                    {"label": "Password", "value": {"form": {"value": [
                        {"name": "id", "required": true, "value": "aut-pw", "mutable": false},
                        {"name": "methodType", "required": false, "value": "password", "mutable": false}
                    ]}}},
                    {"label": "Okta Verify", "value": {"form": {"value": [
                        {"name": "id", "required": true, "value": "aut-ov", "mutable": false},
                        {"name": "methodType", "type": "string", "required": false,
                         "options": [{"label": "Push", "value": "push"}, {"label": "Code", "value": "totp"}]}
                    ]}}}
                ]},
                state_field()
             ]}
        ]},
        "authenticatorEnrollments": {"type": "array", "value": [
            {"type": "password", "key": "okta_password", "id": "aut-pw", "displayName": "Password",
             "methods": [{"type": "password"}]},
            {"type": "app", "key": "okta_verify", "id": "aut-ov", "displayName": "Okta Verify",
             "methods": [{"type": "push"}, {"type": "totp"}]}
        ]},
        "cancel": cancel(base)
    })
}

/// Push sent; the server wants to be polled every `refresh_secs`
pub fn push_waiting(base: &str, refresh_secs: f64) -> Value {
    json!({
        "stateHandle": STATE_HANDLE,
        "remediation": {"type": "array", "value": [
            {"name": "challenge-poll", "href": format!("{base}/idp/idx/authenticators/poll"),
             "method": "POST", "refresh": refresh_secs,
             "relatesTo": "$.currentAuthenticator", "value": [state_field()]}
        ]},
        "currentAuthenticator": {"type": "object", "value": {
            "type": "app", "key": "okta_verify", "id": "aut-ov", "displayName": "Okta Verify",
            "methods": [{"type": "push"}]
        }},
        "cancel": cancel(base)
    })
}

pub fn push_rejected(base: &str) -> Value {
    let mut doc = select_authenticator(base);
    doc["messages"] = json!({"type": "array", "value": [
        {"message": "You have chosen to reject this login.", "i18n": {"key": "okta.verify.push.rejected"}, "class": "ERROR"}
    ]});
    doc
}

/// Success document whose token href is the issuer's token endpoint
pub fn success(issuer: &str) -> Value {
    json!({
        "stateHandle": STATE_HANDLE,
        "user": {"type": "object", "value": {"id": "00u1", "identifier": "alice@example.com"}},
        "successWithInteractionCode": {
            "rel": ["create-form"], "name": "issue", "href": format!("{issuer}/v1/token"),
            "method": "POST", "accepts": "application/x-www-form-urlencoded",
            "value": [
                {"name": "grant_type", "required": true, "value": "interaction_code"},
                {"name": "interaction_code", "required": true, "value": "ic-e2e"},
                {"name": "client_id", "required": true, "value": super::CLIENT_ID},
                {"name": "code_verifier", "required": true}
            ]
        }
    })
}

pub fn tokens() -> Value {
    json!({
        "token_type": "Bearer",
        "expires_in": 3600,
        "access_token": "at-e2e",
        "id_token": "id-e2e",
        "refresh_token": "rt-e2e",
        "scope": "openid profile offline_access"
    })
}

pub fn cancelled() -> Value {
    json!({
        "version": "1.0.0",
        "messages": {"type": "array", "value": [
            {"message": "The flow was cancelled.", "i18n": {"key": "idx.operation.cancelled.by.user"}, "class": "INFO"}
        ]}
    })
}

pub fn unknown_user(base: &str) -> Value {
    let mut doc = identify(base);
    doc["messages"] = json!({"type": "array", "value": [
        {"message": "There is no account with the Username mallory.", "i18n": {"key": "idx.unknown.user"}, "class": "INFO"}
    ]});
    doc
}

pub fn invalid_password() -> Value {
    json!({
        "version": "1.0.0",
        "messages": {"type": "array", "value": [
            {"message": "Password is incorrect", "i18n": {"key": "incorrectPassword"}, "class": "ERROR"}
        ]}
    })
}

pub fn session_expired() -> Value {
    json!({
        "version": "1.0.0",
        "messages": {"type": "array", "value": [
            {"message": "The session has expired.", "i18n": {"key": "idx.session.expired"}, "class": "ERROR"}
        ]}
    })
}

pub fn invalid_grant() -> Value {
    json!({
        "error": "invalid_grant",
        "error_description": "The interaction code is invalid or has expired."
    })
}
