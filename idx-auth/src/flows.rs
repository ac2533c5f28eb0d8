//! High-level flows
//!
//! Canned sequences over [`AuthFlow`] for the common journeys: password login,
//! password recovery, self-service registration, authenticator enrollment.
//! Each one stops at the first step that needs something it was not given and
//! hands the flow back inside the [`AuthenticationResponse`], so the caller can
//! continue with the next function or with [`AuthFlow::proceed`] directly.
//!
//! Recoverable problems (unknown user, wrong code, missing field) are reported
//! in [`AuthenticationResponse::errors`]. Only errors that end the flow are
//! returned as `Err`.

use crate::builders::FormValues;
use crate::document::{AuthenticatorKind, RemediationDocument, RemediationName};
use crate::error::Result;
use crate::orchestrator::{AuthFlow, FlowState, IdxClient};
use crate::outcome::AuthenticationStatus;
use crate::token::TokenResponse;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Where a high-level flow stopped
#[derive(Debug)]
pub struct AuthenticationResponse {
    /// Coarse status
    pub status: AuthenticationStatus,
    /// Tokens, on success
    pub tokens: Option<TokenResponse>,
    /// Recoverable problems reported by the server or by local validation
    pub errors: Vec<String>,
    /// The flow, for the next step
    pub flow: AuthFlow,
}

impl AuthenticationResponse {
    fn settle(flow: AuthFlow, errors: Vec<String>) -> Self {
        let status = match flow.state() {
            FlowState::Success => AuthenticationStatus::Success,
            FlowState::Terminated(_) => AuthenticationStatus::Terminated,
            _ => flow
                .document()
                .map(AuthenticationStatus::from_document)
                .unwrap_or(AuthenticationStatus::AwaitingRemediation),
        };
        Self {
            status,
            tokens: flow.tokens().cloned(),
            errors,
            flow,
        }
    }

    /// Tokens were issued
    pub fn is_success(&self) -> bool {
        self.status == AuthenticationStatus::Success
    }

    /// Authenticators offered for selection, keyed by method type
    ///
    /// Prefers the enrollment selection over the verification one.
    pub fn authenticator_options(&self) -> BTreeMap<String, String> {
        let Some(doc) = self.flow.document() else {
            return BTreeMap::new();
        };
        [
            RemediationName::SelectAuthenticatorEnroll,
            RemediationName::SelectAuthenticatorAuthenticate,
        ]
        .iter()
        .find(|name| doc.has(name))
        .map(|name| doc.authenticator_options(name.as_str()))
        .unwrap_or_default()
    }
}

enum Progress {
    Moved,
    Stopped(Vec<String>),
}

/// One step; recoverable failures come back as `Stopped`
async fn attempt(flow: &mut AuthFlow, name: &RemediationName, input: &FormValues) -> Result<Progress> {
    let name = name.as_str();
    match flow.proceed(name, input).await {
        Ok(outcome) if !outcome.terminal && !outcome.messages.is_empty() && outcome.offers(name) => {
            debug!(remediation = name, "step rejected");
            Ok(Progress::Stopped(outcome.messages))
        }
        Ok(_) => Ok(Progress::Moved),
        Err(e) if !e.is_terminal() => Ok(Progress::Stopped(vec![e.to_string()])),
        Err(e) => Err(e),
    }
}

fn offers(flow: &AuthFlow, name: &RemediationName) -> bool {
    flow.document().map(|doc| doc.has(name)).unwrap_or(false)
}

fn done(flow: &AuthFlow) -> bool {
    flow.state().is_terminal()
}

/// Kind of authenticator the pending challenge is for
fn challenged_kind(doc: &RemediationDocument) -> Option<&AuthenticatorKind> {
    doc.find(RemediationName::ChallengeAuthenticator.as_str())
        .and_then(|option| option.relates_to.as_deref())
        .or(doc.current_authenticator_enrollment.as_ref())
        .or(doc.current_authenticator.as_ref())
        .map(|authenticator| &authenticator.kind)
}

/// Sign in with username and password
///
/// Submits the password with `identify` when the org asks for both at once,
/// otherwise picks the password authenticator and answers its challenge.
/// Stops with `PasswordExpired` when the server demands a new password, or with
/// whatever the server asks for next (e.g. a second factor).
#[instrument(skip_all, fields(username = %username))]
pub async fn authenticate(client: &IdxClient, username: &str, password: &SecretString) -> Result<AuthenticationResponse> {
    use RemediationName::*;

    let mut flow = client.start().await?;
    let one_step = flow
        .document()
        .map(|doc| doc.requires_credentials(Identify.as_str()))
        .unwrap_or(false);

    let mut input = FormValues::new().with("identifier", username);
    if one_step {
        input.insert("passcode", password.expose_secret());
    }
    if let Progress::Stopped(errors) = attempt(&mut flow, &Identify, &input).await? {
        return Ok(AuthenticationResponse::settle(flow, errors));
    }

    let password_offered = flow
        .document()
        .map(|doc| {
            doc.authenticator_options(SelectAuthenticatorAuthenticate.as_str())
                .contains_key("password")
        })
        .unwrap_or(false);
    if !done(&flow) && password_offered {
        let input = FormValues::new().with("authenticator", "password");
        if let Progress::Stopped(errors) = attempt(&mut flow, &SelectAuthenticatorAuthenticate, &input).await? {
            return Ok(AuthenticationResponse::settle(flow, errors));
        }
    }

    let password_challenge = flow
        .document()
        .map(|doc| {
            doc.requires_credentials(ChallengeAuthenticator.as_str())
                && challenged_kind(doc) == Some(&AuthenticatorKind::Password)
        })
        .unwrap_or(false);
    if !done(&flow) && password_challenge {
        let input = FormValues::new().with("passcode", password.expose_secret());
        if let Progress::Stopped(errors) = attempt(&mut flow, &ChallengeAuthenticator, &input).await? {
            return Ok(AuthenticationResponse::settle(flow, errors));
        }
    }

    Ok(AuthenticationResponse::settle(flow, Vec::new()))
}

/// Start a password reset
///
/// Identifies the user, follows the password's `recover` action, and selects the
/// authenticator (`"email"`, `"sms"`, ...) that will carry the verification
/// code. Normally ends in `AwaitingAuthenticatorVerification`.
#[instrument(skip_all, fields(username = %username, authenticator = %authenticator))]
pub async fn recover_password(client: &IdxClient, username: &str, authenticator: &str) -> Result<AuthenticationResponse> {
    use RemediationName::*;

    let mut flow = client.start().await?;
    let identify = FormValues::new().with("identifier", username);

    let recover_first = flow
        .document()
        .map(|doc| doc.find(Recover.as_str()).is_some())
        .unwrap_or(false);
    if recover_first {
        if let Progress::Stopped(errors) = attempt(&mut flow, &Recover, &FormValues::new()).await? {
            return Ok(AuthenticationResponse::settle(flow, errors));
        }
        if !done(&flow) && offers(&flow, &IdentifyRecovery) {
            if let Progress::Stopped(errors) = attempt(&mut flow, &IdentifyRecovery, &identify).await? {
                return Ok(AuthenticationResponse::settle(flow, errors));
            }
        }
    } else {
        if let Progress::Stopped(errors) = attempt(&mut flow, &Identify, &identify).await? {
            return Ok(AuthenticationResponse::settle(flow, errors));
        }
        if !done(&flow) {
            if let Progress::Stopped(errors) = attempt(&mut flow, &Recover, &FormValues::new()).await? {
                return Ok(AuthenticationResponse::settle(flow, errors));
            }
        }
    }

    if !done(&flow) && offers(&flow, &SelectAuthenticatorAuthenticate) {
        let input = FormValues::new().with("authenticator", authenticator);
        if let Progress::Stopped(errors) = attempt(&mut flow, &SelectAuthenticatorAuthenticate, &input).await? {
            return Ok(AuthenticationResponse::settle(flow, errors));
        }
    }

    Ok(AuthenticationResponse::settle(flow, Vec::new()))
}

/// Answer the pending challenge (or enrollment) with a code
///
/// Reports `AwaitingPasswordReset` when a recovery flow moves on to
/// `reset-authenticator`.
#[instrument(skip_all)]
pub async fn verify_authenticator(mut flow: AuthFlow, code: &SecretString) -> Result<AuthenticationResponse> {
    use RemediationName::*;

    let name = if offers(&flow, &ChallengeAuthenticator) {
        ChallengeAuthenticator
    } else {
        EnrollAuthenticator
    };
    let input = FormValues::new().with("passcode", code.expose_secret());
    let errors = match attempt(&mut flow, &name, &input).await? {
        Progress::Stopped(errors) => errors,
        Progress::Moved => Vec::new(),
    };
    Ok(AuthenticationResponse::settle(flow, errors))
}

/// Set a new password (reset or expiry)
#[instrument(skip_all)]
pub async fn change_password(mut flow: AuthFlow, new_password: &SecretString) -> Result<AuthenticationResponse> {
    use RemediationName::*;

    let name = if offers(&flow, &ReenrollAuthenticator) {
        ReenrollAuthenticator
    } else {
        ResetAuthenticator
    };
    let input = FormValues::new().with("passcode", new_password.expose_secret());
    let errors = match attempt(&mut flow, &name, &input).await? {
        Progress::Stopped(errors) => errors,
        Progress::Moved => Vec::new(),
    };
    Ok(AuthenticationResponse::settle(flow, errors))
}

/// Self-service registration
///
/// `profile` holds the user profile attributes (`firstName`, `lastName`,
/// `email`, ...). Normally ends in `AwaitingAuthenticatorEnrollment`; see
/// [`AuthenticationResponse::authenticator_options`].
#[instrument(skip_all)]
pub async fn register(client: &IdxClient, profile: &BTreeMap<String, String>) -> Result<AuthenticationResponse> {
    use RemediationName::*;

    let mut flow = client.start().await?;
    if let Progress::Stopped(errors) = attempt(&mut flow, &SelectEnrollProfile, &FormValues::new()).await? {
        return Ok(AuthenticationResponse::settle(flow, errors));
    }

    let mut input = FormValues::new();
    for (key, value) in profile {
        input.insert(key.clone(), value.clone());
    }
    let errors = match attempt(&mut flow, &EnrollProfile, &input).await? {
        Progress::Stopped(errors) => errors,
        Progress::Moved => Vec::new(),
    };
    Ok(AuthenticationResponse::settle(flow, errors))
}

/// Pick an authenticator to enroll (`"password"`, `"email"`, ...)
#[instrument(skip_all, fields(authenticator = %authenticator))]
pub async fn enroll_authenticator(mut flow: AuthFlow, authenticator: &str) -> Result<AuthenticationResponse> {
    let input = FormValues::new().with("authenticator", authenticator);
    let errors = match attempt(&mut flow, &RemediationName::SelectAuthenticatorEnroll, &input).await? {
        Progress::Stopped(errors) => errors,
        Progress::Moved => Vec::new(),
    };
    Ok(AuthenticationResponse::settle(flow, errors))
}

/// Pick an authenticator from whichever selection the server offers
///
/// Enrollment wins when both are on offer, matching
/// [`AuthenticationResponse::authenticator_options`].
#[instrument(skip_all, fields(authenticator = %authenticator))]
pub async fn select_authenticator(mut flow: AuthFlow, authenticator: &str) -> Result<AuthenticationResponse> {
    use RemediationName::*;

    let name = if offers(&flow, &SelectAuthenticatorEnroll) {
        SelectAuthenticatorEnroll
    } else {
        SelectAuthenticatorAuthenticate
    };
    let input = FormValues::new().with("authenticator", authenticator);
    let errors = match attempt(&mut flow, &name, &input).await? {
        Progress::Stopped(errors) => errors,
        Progress::Moved => Vec::new(),
    };
    Ok(AuthenticationResponse::settle(flow, errors))
}

/// Skip optional enrollment
#[instrument(skip_all)]
pub async fn skip_enrollment(mut flow: AuthFlow) -> Result<AuthenticationResponse> {
    let errors = match attempt(&mut flow, &RemediationName::Skip, &FormValues::new()).await? {
        Progress::Stopped(errors) => errors,
        Progress::Moved => Vec::new(),
    };
    Ok(AuthenticationResponse::settle(flow, errors))
}
