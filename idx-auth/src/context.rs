//! Interaction context
//!
//! [`InteractionContext`] is created once when a flow starts and carries the
//! values that bind every later request to that flow: the interaction handle and
//! the PKCE pair. [`ProceedContext`] is the short-lived slice of it a request
//! builder needs for a single step.

use crate::document::{RemediationDocument, RemediationOption};
use crate::error::PkceError;
use crate::pkce::Pkce;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};

/// Client-side values sent alongside requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// Device token, sent as `X-Device-Token`
    pub device_token: Option<String>,
    /// User agent
    pub user_agent: String,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            device_token: None,
            user_agent: crate::USER_AGENT.to_string(),
        }
    }
}

/// Where the next request of the flow goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    /// URL
    pub href: String,
    /// HTTP method
    pub method: String,
}

/// Values that identify one flow for its whole lifetime
pub struct InteractionContext {
    interaction_handle: String,
    code_verifier: SecretString,
    code_challenge: String,
    code_challenge_method: String,
    state: String,
    client_context: ClientContext,
    continuation: Option<Continuation>,
}

impl InteractionContext {
    /// Create a context from a fresh interaction handle and its PKCE pair
    pub fn new(
        interaction_handle: String,
        pkce: Pkce,
        state: String,
        client_context: ClientContext,
    ) -> Self {
        let code_challenge_method = pkce.method().to_string();
        let (code_verifier, code_challenge) = pkce.into_parts();
        Self {
            interaction_handle,
            code_verifier,
            code_challenge,
            code_challenge_method,
            state,
            client_context,
            continuation: None,
        }
    }

    /// Interaction handle
    pub fn interaction_handle(&self) -> &str {
        &self.interaction_handle
    }

    /// PKCE code verifier
    pub fn code_verifier(&self) -> &SecretString {
        &self.code_verifier
    }

    /// PKCE code challenge
    pub fn code_challenge(&self) -> &str {
        &self.code_challenge
    }

    /// PKCE challenge method
    pub fn code_challenge_method(&self) -> &str {
        &self.code_challenge_method
    }

    /// OAuth `state` sent with the interact request
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Client context
    pub fn client_context(&self) -> &ClientContext {
        &self.client_context
    }

    /// Last continuation pointer
    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    pub(crate) fn set_continuation(&mut self, continuation: Continuation) {
        self.continuation = Some(continuation);
    }
}

impl Clone for InteractionContext {
    fn clone(&self) -> Self {
        Self {
            interaction_handle: self.interaction_handle.clone(),
            code_verifier: SecretString::from(self.code_verifier.expose_secret().to_string()),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
            state: self.state.clone(),
            client_context: self.client_context.clone(),
            continuation: self.continuation.clone(),
        }
    }
}

impl std::fmt::Debug for InteractionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionContext")
            .field("interaction_handle", &self.interaction_handle)
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("state", &self.state)
            .field("client_context", &self.client_context)
            .field("continuation", &self.continuation)
            .finish()
    }
}

/// Everything a builder needs for one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProceedContext {
    /// Interaction handle of the flow
    pub interaction_handle: String,
    /// State handle of the document the step came from
    pub state_handle: String,
    /// Target URL
    pub href: String,
    /// HTTP method
    pub method: String,
    /// Accepted media type
    pub accepts: Option<String>,
    /// Generation of the document the step came from
    pub generation: u64,
}

impl ProceedContext {
    /// Context for submitting `option` from `document`
    pub fn for_option(
        interaction: &InteractionContext,
        document: &RemediationDocument,
        option: &RemediationOption,
    ) -> Self {
        Self {
            interaction_handle: interaction.interaction_handle.clone(),
            state_handle: document.state_handle.clone(),
            href: option.href.clone(),
            method: option.method.clone(),
            accepts: option.accepts.clone(),
            generation: document.generation,
        }
    }

    /// Context for a request outside any document (introspect)
    pub fn for_endpoint(interaction: &InteractionContext, href: String) -> Self {
        Self {
            interaction_handle: interaction.interaction_handle.clone(),
            state_handle: String::new(),
            href,
            method: "POST".to_string(),
            accepts: None,
            generation: 0,
        }
    }
}

/// Random OAuth `state` value
pub fn generate_state() -> Result<String, PkceError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| PkceError::RandomSource(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
