//! Polling sub-flow
//!
//! Waits out asynchronous verification (push approval, magic links). Each round
//! sleeps the server's `refresh` clamped to the [`PollPolicy`](crate::config::PollPolicy)
//! bounds, then polls. Both the sleep and the in-flight poll race the flow's
//! cancellation token; a cancelled poll request is dropped, never awaited.

use crate::builders::{FormValues, PollBuilder, RequestBuilder};
use crate::context::ProceedContext;
use crate::document::{PollInfo, RemediationDocument};
use crate::error::{OrchestratorError, Result, TransportError};
use crate::orchestrator::{AuthFlow, FlowState, TerminationReason};
use crate::outcome::StepOutcome;
use crate::transport::RawResponse;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

enum Polled {
    Response(std::result::Result<RawResponse, TransportError>),
    Cancelled,
    OutOfTime,
}

impl AuthFlow {
    /// Poll until the current out-of-band verification resolves
    ///
    /// Fails with [`OrchestratorError::NotPolling`] when the current document has
    /// no poll hint.
    #[instrument(skip_all, fields(handle = %self.context.interaction_handle()))]
    pub async fn poll(&mut self) -> Result<StepOutcome> {
        match self.state {
            FlowState::Success => {
                return self.outcome().cloned().ok_or(OrchestratorError::FlowCompleted);
            }
            FlowState::Terminated(_) => return Err(OrchestratorError::FlowTerminated),
            _ => {}
        }

        let info = self
            .document
            .as_ref()
            .and_then(RemediationDocument::poll_info)
            .ok_or(OrchestratorError::NotPolling)?;
        self.run_poll(info).await
    }

    pub(crate) async fn run_poll(&mut self, mut info: PollInfo) -> Result<StepOutcome> {
        let policy = self.config.polling;
        let started = Instant::now();
        let deadline = policy.max_wait.map(|budget| started + budget);
        let cancel = self.cancel.clone();
        let transport = self.transport.clone();
        let mut rounds = 0u32;

        self.transition(FlowState::Polling);

        loop {
            let interval = policy.clamp(info.refresh);
            let wake = match deadline {
                Some(deadline) => (Instant::now() + interval).min(deadline),
                None => Instant::now() + interval,
            };

            let slept = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep_until(wake) => true,
            };
            if !slept {
                return Ok(self.cancel_polling().await);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(self.poll_timeout(started));
            }

            let request = {
                let Some(doc) = self.document.as_ref() else {
                    return Err(OrchestratorError::NotPolling);
                };
                let ctx = ProceedContext::for_option(&self.context, doc, &info.option);
                PollBuilder.build(ctx, info.form(), &FormValues::new())
            };
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "server poll form cannot be satisfied");
                    self.terminate(TerminationReason::Protocol, vec![e.to_string()]);
                    return Err(e.into());
                }
            };
            let request = self.decorate(request);
            rounds += 1;
            debug!(round = rounds, href = %request.url, "polling");

            let send = transport.send(&request);
            let polled = match deadline {
                Some(deadline) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Polled::Cancelled,
                    result = tokio::time::timeout_at(deadline, send) => match result {
                        Ok(response) => Polled::Response(response),
                        Err(_) => Polled::OutOfTime,
                    },
                },
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Polled::Cancelled,
                    response = send => Polled::Response(response),
                },
            };

            let response = match polled {
                Polled::Cancelled => return Ok(self.cancel_polling().await),
                Polled::OutOfTime => return Err(self.poll_timeout(started)),
                Polled::Response(Err(e)) => return Err(self.fail_transport(e)),
                Polled::Response(Ok(response)) => response,
            };

            if !response.is_success() {
                return self.apply_rejection(response);
            }

            let doc = self.parse_document(&response.body)?;
            match doc.poll_info() {
                Some(next) if !doc.is_success() => {
                    debug!(refresh = ?next.refresh, "verification still pending");
                    self.generation = doc.generation;
                    self.track_continuation(&doc);
                    self.document = Some(doc);
                    info = next;
                }
                _ => {
                    info!(rounds, "polling resolved");
                    return self.install(doc).await;
                }
            }
        }
    }

    async fn cancel_polling(&mut self) -> StepOutcome {
        info!("polling cancelled");
        let (outcome, _) = self.send_cancel().await;
        outcome
    }

    fn poll_timeout(&mut self, started: Instant) -> OrchestratorError {
        let waited = started.elapsed();
        warn!(?waited, "polling budget exhausted");
        self.terminate(
            TerminationReason::PollTimeout,
            vec![format!("verification not completed within {:?}", waited)],
        );
        OrchestratorError::PollTimeout { waited }
    }
}
