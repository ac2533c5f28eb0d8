//! Error types for the IDX engine
//!
//! Errors are split by where they originate: local validation, the transport,
//! the shape of server documents, the token endpoint, and the orchestrator that
//! ties them together. Callers of [`crate::AuthFlow`] only ever see
//! [`OrchestratorError`].

use std::time::Duration;

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Local, pre-network failure while composing a request body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field was neither supplied nor defaulted by the server
    #[error("missing required field '{path}'")]
    MissingField {
        /// Dotted path of the field (e.g. `credentials.passcode`)
        path: String,
    },

    /// A supplied value does not match the declared field type
    #[error("field '{path}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Dotted path of the field
        path: String,
        /// Declared type
        expected: &'static str,
        /// Type of the supplied value
        found: &'static str,
    },

    /// A value for an options field matched none of the declared options
    #[error("field '{path}' has no option matching '{value}'")]
    UnknownOption {
        /// Dotted path of the field
        path: String,
        /// Supplied value
        value: String,
    },
}

/// Network-level failure, not protocol aware
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Request did not complete within the configured timeout
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL
        url: String,
    },

    /// Connection could not be established or was reset
    #[error("connection to {url} failed: {reason}")]
    Connect {
        /// Target URL
        url: String,
        /// Underlying cause
        reason: String,
    },

    /// Response body was not valid JSON
    #[error("malformed response body from {url}: {reason}")]
    MalformedBody {
        /// Target URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// Any other client-side request failure
    #[error("HTTP request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Check if error is retryable at the transport layer
    ///
    /// Only connection failures qualify. A timed-out request may already have
    /// been processed by the server.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());

        if err.is_connect() {
            TransportError::Connect {
                url,
                reason: err.to_string(),
            }
        } else if err.is_timeout() {
            TransportError::Timeout { url }
        } else if err.is_decode() {
            TransportError::MalformedBody {
                url,
                reason: err.to_string(),
            }
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// A server document that does not have the shape of an IDX response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Required top-level keys are missing or have the wrong type
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// PKCE generation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    /// The operating system random source failed
    #[error("secure random source unavailable: {0}")]
    RandomSource(String),

    /// Requested verifier length is outside RFC 7636 bounds
    #[error("code verifier length {0} outside 43..=128")]
    InvalidLength(usize),
}

/// Final code-for-token exchange failure (always fatal to the flow)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Token endpoint answered with a non-success status
    #[error("token endpoint rejected the exchange ({status}): {error}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// OAuth `error` code
        error: String,
        /// OAuth `error_description`
        description: Option<String>,
    },

    /// Success body did not contain the mandatory token fields
    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    /// The success form carried no interaction code
    #[error("success response carries no interaction code")]
    MissingInteractionCode,

    /// Transport failure during the exchange
    #[error("token exchange transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration loading and validation failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the expected shape
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required value is absent after all sources were applied
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    /// A value is present but unusable
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid {
        /// Config key
        key: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Server declared the flow dead (expired handle, revoked transaction, 5xx)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server terminated the flow ({status}): {}", self.summary())]
pub struct ServerRejection {
    /// HTTP status
    pub status: u16,
    /// Okta `errorCode`, OAuth `error`, or the first message i18n key
    pub code: Option<String>,
    /// Human-readable messages
    pub messages: Vec<String>,
}

impl ServerRejection {
    /// Joined messages, or the code when the body had none
    pub fn summary(&self) -> String {
        if self.messages.is_empty() {
            self.code
                .clone()
                .unwrap_or_else(|| "no details provided".to_string())
        } else {
            self.messages.join("; ")
        }
    }
}

/// Errors surfaced by the orchestrator to its caller
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Caller input failed local validation; no request was sent
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The current document offers no remediation with this name
    #[error("no remediation named '{name}' (available: {})", available.join(", "))]
    NoSuchRemediation {
        /// Requested name
        name: String,
        /// Names the document does offer, in server order
        available: Vec<String>,
    },

    /// The remediation exists but this client has no builder for it
    #[error("unsupported step '{name}'")]
    UnsupportedStep {
        /// Remediation name as declared by the server
        name: String,
    },

    /// A proceed context from an older document generation was submitted
    #[error("stale proceed context (generation {found}, current {expected})")]
    StaleContext {
        /// Current document generation
        expected: u64,
        /// Generation carried by the context
        found: u64,
    },

    /// Server marked the flow non-recoverable
    #[error(transparent)]
    Unrecoverable(ServerRejection),

    /// Network failure talking to the server
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server document did not parse
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Polling budget exhausted without a server resolution
    #[error("polling gave up after {waited:?}")]
    PollTimeout {
        /// Time spent polling
        waited: Duration,
    },

    /// `poll` was called while the document carries no poll hint
    #[error("current document has nothing to poll")]
    NotPolling,

    /// Token exchange failed
    #[error("token exchange failed: {0}")]
    TokenExchange(#[from] TokenError),

    /// The flow already reached `Terminated`
    #[error("flow already terminated")]
    FlowTerminated,

    /// The flow already reached `Success`
    #[error("flow already completed")]
    FlowCompleted,

    /// PKCE pair could not be generated
    #[error("PKCE error: {0}")]
    Pkce(#[from] PkceError),

    /// Engine configuration is unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Whether this error ends the flow
    ///
    /// Validation and lookup errors leave the flow where it was so the caller can
    /// retry with different input.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            OrchestratorError::Validation(_)
                | OrchestratorError::NoSuchRemediation { .. }
                | OrchestratorError::UnsupportedStep { .. }
                | OrchestratorError::StaleContext { .. }
                | OrchestratorError::NotPolling
                | OrchestratorError::FlowCompleted
        )
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::MalformedResponse(format!("JSON error: {}", err))
    }
}
