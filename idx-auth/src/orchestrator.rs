//! Authentication orchestrator
//!
//! [`IdxClient`] bootstraps flows. [`AuthFlow`] holds one flow's current
//! document and advances it one remediation at a time:
//!
//! ```text
//! Started -> AwaitingRemediation -> Submitting -> AwaitingRemediation ...
//!                                             \-> Polling -> ...
//!         -> Success | Terminated(reason)
//! ```
//!
//! Recoverable server rejections (a wrong password, an unknown user) keep the
//! flow in `AwaitingRemediation` and surface as messages on the returned
//! [`StepOutcome`]. Everything else ends the flow.

use crate::builders::{builder_for, CancelBuilder, FormValues, IdxRequest, IntrospectBuilder, RequestBuilder};
use crate::config::IdxConfig;
use crate::context::{generate_state, ClientContext, Continuation, InteractionContext, ProceedContext};
use crate::document::{ErrorDocument, RemediationDocument, RemediationName};
use crate::error::{OrchestratorError, ProtocolError, Result, ServerRejection, TransportError};
use crate::outcome::StepOutcome;
use crate::pkce::Pkce;
use crate::token::{self, TokenResponse};
use crate::transport::{HttpTransport, RawResponse, Transport, DEVICE_TOKEN_HEADER};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a flow ended without tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Caller cancelled
    Cancelled,
    /// Server declared the flow dead
    Unrecoverable,
    /// Network failure
    Transport,
    /// Polling budget ran out
    PollTimeout,
    /// Interaction code could not be exchanged
    TokenExchange,
    /// Server sent a document that did not parse
    Protocol,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Cancelled => "cancelled",
            Self::Unrecoverable => "unrecoverable",
            Self::Transport => "transport",
            Self::PollTimeout => "poll timeout",
            Self::TokenExchange => "token exchange",
            Self::Protocol => "protocol",
        };
        f.write_str(text)
    }
}

/// Lifecycle of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Interaction handle obtained, no document yet
    Started,
    /// Waiting for the caller to pick a remediation
    AwaitingRemediation,
    /// A request is in flight
    Submitting,
    /// Waiting on out-of-band verification
    Polling,
    /// Tokens issued
    Success,
    /// Ended without tokens
    Terminated(TerminationReason),
}

impl FlowState {
    /// `Success` or `Terminated`
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Success | FlowState::Terminated(_))
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::AwaitingRemediation => f.write_str("awaiting remediation"),
            Self::Submitting => f.write_str("submitting"),
            Self::Polling => f.write_str("polling"),
            Self::Success => f.write_str("success"),
            Self::Terminated(reason) => write!(f, "terminated ({})", reason),
        }
    }
}

/// Entry point: starts and resumes flows
///
/// Cheap to clone; clones share the transport (and its connection pool and
/// cookie store).
#[derive(Clone)]
pub struct IdxClient {
    config: Arc<IdxConfig>,
    transport: Arc<dyn Transport>,
}

impl IdxClient {
    /// Client over the default HTTP transport
    pub fn new(config: IdxConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Client over a caller-supplied transport
    pub fn with_transport(config: IdxConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// Configuration
    pub fn config(&self) -> &IdxConfig {
        &self.config
    }

    fn client_context(&self) -> ClientContext {
        ClientContext {
            device_token: self.config.transport.device_token.clone(),
            user_agent: self
                .config
                .transport
                .user_agent
                .clone()
                .unwrap_or_else(|| crate::USER_AGENT.to_string()),
        }
    }

    /// Obtain an interaction handle and fetch the first document
    #[instrument(skip_all, fields(client_id = %self.config.client.client_id))]
    pub async fn start(&self) -> Result<AuthFlow> {
        let pkce = Pkce::generate()?;
        let state = generate_state()?;
        let client_context = self.client_context();

        let request = interact_request(&self.config, &pkce, &state, &client_context);
        debug!(body = %request.log_view(), "starting interaction");
        let response = self.transport.send(&request).await?;

        if !response.is_success() {
            let rejection = rejection(&response, &ErrorDocument::parse(&response.body, 0));
            warn!(status = response.status, "interact rejected: {}", rejection.summary());
            return Err(OrchestratorError::Unrecoverable(rejection));
        }

        let handle = response
            .body
            .get("interaction_handle")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                ProtocolError::MalformedResponse("interact response has no interaction_handle".to_string())
            })?;
        info!("interaction started");

        let context = InteractionContext::new(handle.to_string(), pkce, state, client_context);
        let mut flow = AuthFlow::new(self.config.clone(), self.transport.clone(), context);
        flow.introspect().await?;
        Ok(flow)
    }

    /// Re-enter a flow from its interaction context
    #[instrument(skip_all, fields(client_id = %self.config.client.client_id))]
    pub async fn resume(&self, context: InteractionContext) -> Result<AuthFlow> {
        let mut flow = AuthFlow::new(self.config.clone(), self.transport.clone(), context);
        flow.introspect().await?;
        Ok(flow)
    }
}

fn interact_request(
    config: &IdxConfig,
    pkce: &Pkce,
    state: &str,
    client_context: &ClientContext,
) -> IdxRequest {
    let client = &config.client;
    let mut pairs = vec![("client_id".to_string(), client.client_id.clone())];
    if let Some(secret) = &client.client_secret {
        pairs.push(("client_secret".to_string(), secret.expose_secret().to_string()));
    }
    pairs.extend([
        ("scope".to_string(), client.scope_string()),
        ("code_challenge".to_string(), pkce.challenge().to_string()),
        ("code_challenge_method".to_string(), pkce.method().to_string()),
        ("redirect_uri".to_string(), client.redirect_uri.to_string()),
        ("state".to_string(), state.to_string()),
    ]);

    with_device_token(
        IdxRequest::form(client.interact_endpoint().to_string(), pairs),
        client_context,
    )
}

fn with_device_token(request: IdxRequest, client_context: &ClientContext) -> IdxRequest {
    match &client_context.device_token {
        Some(token) => request.with_header(DEVICE_TOKEN_HEADER, token.clone()),
        None => request,
    }
}

fn rejection(response: &RawResponse, error: &ErrorDocument) -> ServerRejection {
    ServerRejection {
        status: response.status,
        code: error.code(),
        messages: error.texts(),
    }
}

fn submitted_authenticator(request: &IdxRequest) -> Option<String> {
    request
        .json_body()?
        .get("authenticator")?
        .get("id")?
        .as_str()
        .map(str::to_string)
}

/// One authentication flow
///
/// Every method takes `&mut self`: a flow advances one step at a time. Independent
/// flows may run concurrently on the same [`IdxClient`].
pub struct AuthFlow {
    pub(crate) config: Arc<IdxConfig>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) context: InteractionContext,
    pub(crate) state: FlowState,
    pub(crate) document: Option<RemediationDocument>,
    pub(crate) generation: u64,
    tokens: Option<TokenResponse>,
    last_outcome: Option<StepOutcome>,
    pub(crate) cancel: CancellationToken,
}

impl AuthFlow {
    pub(crate) fn new(
        config: Arc<IdxConfig>,
        transport: Arc<dyn Transport>,
        context: InteractionContext,
    ) -> Self {
        Self {
            config,
            transport,
            context,
            state: FlowState::Started,
            document: None,
            generation: 0,
            tokens: None,
            last_outcome: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Current document
    pub fn document(&self) -> Option<&RemediationDocument> {
        self.document.as_ref()
    }

    /// Interaction context, for resuming later
    pub fn context(&self) -> &InteractionContext {
        &self.context
    }

    /// Token that cancels an in-progress poll when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Outcome of the last step
    pub fn outcome(&self) -> Option<&StepOutcome> {
        self.last_outcome.as_ref()
    }

    /// Tokens, once issued
    pub fn tokens(&self) -> Option<&TokenResponse> {
        self.tokens.as_ref()
    }

    pub(crate) fn transition(&mut self, next: FlowState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "flow state changed");
            self.state = next;
        }
    }

    pub(crate) fn terminate(&mut self, reason: TerminationReason, messages: Vec<String>) -> StepOutcome {
        self.transition(FlowState::Terminated(reason));
        let outcome = StepOutcome::terminated(messages);
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    pub(crate) fn fail_transport(&mut self, error: TransportError) -> OrchestratorError {
        warn!(error = %error, "request failed");
        self.terminate(TerminationReason::Transport, vec![error.to_string()]);
        error.into()
    }

    pub(crate) fn decorate(&self, request: IdxRequest) -> IdxRequest {
        with_device_token(request, self.context.client_context())
    }

    /// Cached result for a flow that already ended
    fn settled(&self) -> Option<Result<StepOutcome>> {
        match self.state {
            FlowState::Success => Some(self.last_outcome.clone().ok_or(OrchestratorError::FlowCompleted)),
            FlowState::Terminated(_) => Some(Err(OrchestratorError::FlowTerminated)),
            _ => None,
        }
    }

    fn current(&self, name: &str) -> Result<&RemediationDocument> {
        self.document
            .as_ref()
            .ok_or_else(|| OrchestratorError::NoSuchRemediation {
                name: name.to_string(),
                available: Vec::new(),
            })
    }

    /// Fetch the flow's current document from the introspect endpoint
    #[instrument(skip_all, fields(handle = %self.context.interaction_handle()))]
    pub async fn introspect(&mut self) -> Result<StepOutcome> {
        if let Some(settled) = self.settled() {
            return settled;
        }

        let href = self.config.client.idx_endpoint("introspect").to_string();
        let ctx = ProceedContext::for_endpoint(&self.context, href);
        let request = self.decorate(IntrospectBuilder.build(ctx, &[], &FormValues::new())?);

        self.transition(FlowState::Submitting);
        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail_transport(e)),
        };
        self.apply_response(response).await
    }

    /// Proceed context for the named remediation of the current document
    pub fn prepare(&self, name: &str) -> Result<ProceedContext> {
        let doc = self.current(name)?;
        let option = doc
            .find(name)
            .ok_or_else(|| OrchestratorError::NoSuchRemediation {
                name: name.to_string(),
                available: doc.remediation_names(),
            })?;
        if builder_for(&option.name).is_none() {
            return Err(OrchestratorError::UnsupportedStep {
                name: name.to_string(),
            });
        }
        Ok(ProceedContext::for_option(&self.context, doc, option))
    }

    /// Submit the named remediation with caller input
    ///
    /// Validation failures return before anything is sent and leave the flow
    /// where it was. After `Success` the cached outcome is returned.
    #[instrument(skip_all, fields(remediation = %name))]
    pub async fn proceed(&mut self, name: &str, input: &FormValues) -> Result<StepOutcome> {
        if let Some(settled) = self.settled() {
            return settled;
        }
        if name == RemediationName::Cancel.as_str() {
            return self.cancel().await;
        }

        let ctx = self.prepare(name)?;
        self.submit(name, ctx, input).await
    }

    /// Submit with a context obtained from [`AuthFlow::prepare`]
    pub async fn submit(&mut self, name: &str, ctx: ProceedContext, input: &FormValues) -> Result<StepOutcome> {
        if let Some(settled) = self.settled() {
            return settled;
        }

        let request = {
            let doc = self.current(name)?;
            if ctx.generation != doc.generation {
                return Err(OrchestratorError::StaleContext {
                    expected: doc.generation,
                    found: ctx.generation,
                });
            }
            let option = doc
                .find(name)
                .ok_or_else(|| OrchestratorError::NoSuchRemediation {
                    name: name.to_string(),
                    available: doc.remediation_names(),
                })?;
            let builder = builder_for(&option.name).ok_or_else(|| OrchestratorError::UnsupportedStep {
                name: name.to_string(),
            })?;
            builder.build(ctx, &option.form, input)?
        };
        let submitted = submitted_authenticator(&request);
        let request = self.decorate(request);
        debug!(body = %request.log_view(), "submitting remediation");

        self.transition(FlowState::Submitting);
        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail_transport(e)),
        };
        let outcome = self.apply_response(response).await?;

        if self.state == FlowState::AwaitingRemediation {
            let poll = self
                .document
                .as_ref()
                .and_then(|doc| doc.awaits_out_of_band(submitted.as_deref()));
            if let Some(poll) = poll {
                return self.run_poll(poll).await;
            }
        }
        Ok(outcome)
    }

    pub(crate) async fn apply_response(&mut self, response: RawResponse) -> Result<StepOutcome> {
        if response.is_success() {
            let doc = self.parse_document(&response.body)?;
            self.install(doc).await
        } else {
            self.apply_rejection(response)
        }
    }

    pub(crate) fn parse_document(&mut self, body: &Value) -> Result<RemediationDocument> {
        RemediationDocument::parse(body, self.generation + 1).map_err(|e| {
            warn!(error = %e, "unparseable document");
            self.terminate(TerminationReason::Protocol, vec![e.to_string()]);
            OrchestratorError::from(e)
        })
    }

    /// Record where the flow continues from `doc`
    pub(crate) fn track_continuation(&mut self, doc: &RemediationDocument) {
        if let Some(next) = doc.remediations.first().or(doc.success.as_ref()) {
            self.context.set_continuation(Continuation {
                href: next.href.clone(),
                method: next.method.clone(),
            });
        }
    }

    pub(crate) async fn install(&mut self, doc: RemediationDocument) -> Result<StepOutcome> {
        self.generation = doc.generation;
        self.track_continuation(&doc);

        let success = doc.is_success();
        let dead_end = doc.remediations.is_empty();
        let messages: Vec<String> = doc.messages.iter().map(|m| m.text.clone()).collect();
        self.document = Some(doc);

        if success {
            let tokens = self.exchange_tokens().await?;
            return Ok(StepOutcome::success(self.document.as_ref(), tokens));
        }
        if dead_end {
            warn!("document offers no way forward");
            return Ok(self.terminate(TerminationReason::Unrecoverable, messages));
        }

        self.transition(FlowState::AwaitingRemediation);
        let outcome = match &self.document {
            Some(doc) => StepOutcome::awaiting(doc),
            None => StepOutcome::terminated(messages),
        };
        debug!(remediations = ?outcome.names(), "awaiting remediation");
        self.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    pub(crate) fn apply_rejection(&mut self, response: RawResponse) -> Result<StepOutcome> {
        let error = ErrorDocument::parse(&response.body, self.generation + 1);

        if response.is_client_error() && error.is_recoverable() {
            let folded = match &error.document {
                Some(doc) if !doc.remediations.is_empty() && !doc.is_success() => Some(doc.clone()),
                _ => self
                    .document
                    .as_ref()
                    .map(|current| current.with_messages(error.messages.clone(), self.generation + 1)),
            };
            if let Some(doc) = folded {
                warn!(
                    status = response.status,
                    messages = ?error.texts(),
                    "server rejected the submission"
                );
                self.generation = doc.generation;
                self.track_continuation(&doc);
                let outcome = StepOutcome::awaiting(&doc);
                self.document = Some(doc);
                self.transition(FlowState::AwaitingRemediation);
                self.last_outcome = Some(outcome.clone());
                return Ok(outcome);
            }
        }

        let rejection = rejection(&response, &error);
        warn!(status = response.status, "flow rejected: {}", rejection.summary());
        self.terminate(TerminationReason::Unrecoverable, rejection.messages.clone());
        Err(OrchestratorError::Unrecoverable(rejection))
    }

    /// Exchange the interaction code for tokens
    ///
    /// Runs at most once per flow; later calls return the cached tokens.
    pub async fn exchange_tokens(&mut self) -> Result<TokenResponse> {
        if let Some(tokens) = &self.tokens {
            return Ok(tokens.clone());
        }
        if let FlowState::Terminated(_) = self.state {
            return Err(OrchestratorError::FlowTerminated);
        }

        let success = self
            .document
            .as_ref()
            .and_then(|doc| doc.success.clone())
            .ok_or_else(|| OrchestratorError::NoSuchRemediation {
                name: "successWithInteractionCode".to_string(),
                available: self
                    .document
                    .as_ref()
                    .map(RemediationDocument::remediation_names)
                    .unwrap_or_default(),
            })?;

        match token::exchange(
            self.transport.as_ref(),
            &self.config.client,
            &success,
            self.context.code_verifier(),
        )
        .await
        {
            Ok(tokens) => {
                self.tokens = Some(tokens.clone());
                self.transition(FlowState::Success);
                self.last_outcome = Some(StepOutcome::success(self.document.as_ref(), tokens.clone()));
                Ok(tokens)
            }
            Err(e) => {
                warn!(error = %e, "token exchange failed");
                self.terminate(TerminationReason::TokenExchange, vec![e.to_string()]);
                Err(e.into())
            }
        }
    }

    pub(crate) fn cancel_request(&self) -> IdxRequest {
        let built = self.document.as_ref().and_then(|doc| {
            let option = doc.find(RemediationName::Cancel.as_str())?;
            let ctx = ProceedContext::for_option(&self.context, doc, option);
            CancelBuilder.build(ctx, &option.form, &FormValues::new()).ok()
        });

        let request = built.unwrap_or_else(|| {
            let state_handle = self
                .document
                .as_ref()
                .map(|doc| doc.state_handle.clone())
                .unwrap_or_default();
            IdxRequest::json(
                "POST",
                self.config.client.idx_endpoint("cancel").to_string(),
                serde_json::json!({ "stateHandle": state_handle }),
            )
        });
        self.decorate(request)
    }

    /// Send cancel and end the flow, whatever the server answers
    pub(crate) async fn send_cancel(&mut self) -> (StepOutcome, Option<TransportError>) {
        let request = self.cancel_request();
        match self.transport.send(&request).await {
            Ok(response) => {
                let messages = ErrorDocument::parse(&response.body, 0)
                    .messages
                    .into_iter()
                    .map(|m| m.text)
                    .collect();
                (self.terminate(TerminationReason::Cancelled, messages), None)
            }
            Err(e) => {
                warn!(error = %e, "cancel request failed");
                (self.terminate(TerminationReason::Cancelled, Vec::new()), Some(e))
            }
        }
    }

    /// Cancel the flow at the server
    ///
    /// The flow ends in `Terminated(Cancelled)` even when the request fails; the
    /// transport error is still returned.
    #[instrument(skip_all)]
    pub async fn cancel(&mut self) -> Result<StepOutcome> {
        match self.state {
            FlowState::Terminated(TerminationReason::Cancelled) => return Err(OrchestratorError::FlowTerminated),
            FlowState::Success => return Err(OrchestratorError::FlowCompleted),
            _ => {}
        }

        match self.send_cancel().await {
            (outcome, None) => Ok(outcome),
            (_, Some(e)) => Err(e.into()),
        }
    }
}

impl fmt::Debug for AuthFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFlow")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("context", &self.context)
            .field(
                "remediations",
                &self.document.as_ref().map(RemediationDocument::remediation_names),
            )
            .finish()
    }
}
