//! # idx-auth: remediation-driven authentication for the Okta Identity Engine
//!
//! The Identity Engine never tells a client the whole login flow up front.
//! Each response is a document listing the steps ("remediations") the user may
//! take next, with a form schema for each. This crate drives such flows:
//!
//! - **Bootstrap**: `/v1/interact` with a PKCE challenge, then introspect
//! - **Remediation**: validate caller input against the server's form and submit
//! - **Polling**: wait out push approvals and magic links, cancellable
//! - **Token exchange**: trade the interaction code for OAuth tokens
//!
//! ## Architecture
//!
//! ```text
//!   caller ──proceed(name, input)──▶ AuthFlow ──builder_for(name)──▶ RequestBuilder
//!     ▲                                 │                                 │
//!     │                                 ▼                                 ▼
//!   StepOutcome ◀── RemediationDocument ◀──── Transport ◀──────── IdxRequest
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use idx_auth::{ClientConfig, FormValues, IdxClient, IdxConfig};
//!
//! # async fn run() -> idx_auth::Result<()> {
//! let client = ClientConfig::new(
//!     "https://example.okta.com/oauth2/default",
//!     "0oa1example",
//!     "http://localhost:8080/callback",
//! )?;
//! let idx = IdxClient::new(IdxConfig::new(client))?;
//!
//! let mut flow = idx.start().await?;
//! let outcome = flow
//!     .proceed("identify", &FormValues::new().with("identifier", "alice@example.com"))
//!     .await?;
//! for step in &outcome.remediations {
//!     println!("next: {} {:?}", step.name, step.required_fields);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod builders;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod flows;
pub mod orchestrator;
pub mod outcome;
pub mod pkce;
pub mod polling;
pub mod token;
pub mod transport;

// Re-exports for convenience
pub use builders::{builder_for, FormValues, IdxRequest, RequestBuilder};
pub use config::{ClientConfig, IdxConfig, PollPolicy, TransportSettings};
pub use context::{ClientContext, InteractionContext, ProceedContext};
pub use document::{
    AuthenticatorInfo, AuthenticatorKind, FieldKind, FieldSpec, MethodType, RemediationDocument,
    RemediationName, RemediationOption,
};
pub use error::{
    ConfigError, OrchestratorError, PkceError, ProtocolError, Result, ServerRejection, TokenError,
    TransportError, ValidationError,
};
pub use flows::AuthenticationResponse;
pub use orchestrator::{AuthFlow, FlowState, IdxClient, TerminationReason};
pub use outcome::{AuthenticationStatus, NextStep, StepOutcome};
pub use pkce::Pkce;
pub use token::TokenResponse;
pub use transport::{HttpTransport, RawResponse, RetryPolicy, Transport};

/// User agent sent when none is configured
pub const USER_AGENT: &str = concat!("idx-rs/", env!("CARGO_PKG_VERSION"));
