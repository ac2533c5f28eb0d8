//! Token exchange
//!
//! Trades the interaction code from `successWithInteractionCode` for tokens at
//! the authorization server's token endpoint.

use crate::builders::IdxRequest;
use crate::config::ClientConfig;
use crate::document::RemediationOption;
use crate::error::TokenError;
use crate::transport::Transport;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

/// Grant type of the interaction code exchange
pub const INTERACTION_CODE_GRANT: &str = "interaction_code";

/// Tokens issued at the end of a flow
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// ID token, when `openid` was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Refresh token, when `offline_access` was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type (normally `Bearer`)
    pub token_type: String,
    /// Lifetime of the access token in seconds
    pub expires_in: u64,
    /// Granted scopes
    #[serde(default)]
    pub scope: String,
    /// When the response was received
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl TokenResponse {
    /// When the access token expires
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check if the access token is expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Granted scopes as a list
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct OAuthError {
    error: Option<String>,
    error_description: Option<String>,
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compose the form-encoded exchange request from the success form
pub fn exchange_request(
    client: &ClientConfig,
    success: &RemediationOption,
    code_verifier: &SecretString,
) -> Result<IdxRequest, TokenError> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for field in &success.form {
        let value = match field.name.as_str() {
            "client_secret" => client
                .client_secret
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
            "code_verifier" => Some(code_verifier.expose_secret().to_string()),
            "client_id" => Some(
                field
                    .value
                    .as_ref()
                    .map(scalar)
                    .unwrap_or_else(|| client.client_id.clone()),
            ),
            _ => field.value.as_ref().map(scalar),
        };
        if let Some(value) = value {
            pairs.push((field.name.clone(), value));
        }
    }

    if !pairs.iter().any(|(k, v)| k == "interaction_code" && !v.is_empty()) {
        return Err(TokenError::MissingInteractionCode);
    }
    let mut ensure = |name: &str, value: String| {
        if !pairs.iter().any(|(k, _)| k == name) {
            pairs.push((name.to_string(), value));
        }
    };
    ensure("grant_type", INTERACTION_CODE_GRANT.to_string());
    ensure("client_id", client.client_id.clone());
    ensure("code_verifier", code_verifier.expose_secret().to_string());
    if let Some(secret) = &client.client_secret {
        ensure("client_secret", secret.expose_secret().to_string());
    }

    let mut request = IdxRequest::form(success.href.clone(), pairs);
    request.method = success.method.clone();
    Ok(request)
}

/// Exchange the interaction code for tokens
#[instrument(skip_all, fields(href = %success.href))]
pub async fn exchange(
    transport: &dyn Transport,
    client: &ClientConfig,
    success: &RemediationOption,
    code_verifier: &SecretString,
) -> Result<TokenResponse, TokenError> {
    let request = exchange_request(client, success, code_verifier)?;
    debug!(body = %request.log_view(), "exchanging interaction code");

    let response = transport.send(&request).await?;

    if !response.is_success() {
        let body: OAuthError = serde_json::from_value(response.body.clone()).unwrap_or(OAuthError {
            error: None,
            error_description: None,
        });
        return Err(TokenError::Rejected {
            status: response.status,
            error: body.error.unwrap_or_else(|| "unknown_error".to_string()),
            description: body.error_description,
        });
    }

    let mut tokens: TokenResponse = serde_json::from_value(response.body)
        .map_err(|e| TokenError::MalformedResponse(e.to_string()))?;
    tokens.issued_at = Utc::now();
    debug!(
        token_type = %tokens.token_type,
        expires_in = tokens.expires_in,
        "tokens issued"
    );
    Ok(tokens)
}
