//! Caller-facing step results

use crate::document::{FieldSpec, RemediationDocument, RemediationName};
use crate::token::TokenResponse;
use std::fmt;

/// Coarse reading of where the flow stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationStatus {
    /// Tokens issued
    Success,
    /// Password must be changed before continuing
    PasswordExpired,
    /// An authenticator must be picked
    AwaitingAuthenticatorSelection,
    /// A challenge must be answered (or approved out of band)
    AwaitingAuthenticatorVerification,
    /// An authenticator must be enrolled
    AwaitingAuthenticatorEnrollment,
    /// A new password must be set
    AwaitingPasswordReset,
    /// Profile attributes must be supplied
    AwaitingProfileEnrollment,
    /// Any other step
    AwaitingRemediation,
    /// The flow is over without tokens
    Terminated,
}

impl AuthenticationStatus {
    /// Derive the status from the steps a document offers
    pub fn from_document(doc: &RemediationDocument) -> Self {
        use RemediationName::*;

        if doc.is_success() {
            return Self::Success;
        }
        if doc.remediations.is_empty() {
            return Self::Terminated;
        }

        let has = |name: RemediationName| doc.has(&name);
        if has(ReenrollAuthenticator) {
            Self::PasswordExpired
        } else if has(ResetAuthenticator) {
            Self::AwaitingPasswordReset
        } else if has(EnrollProfile) {
            Self::AwaitingProfileEnrollment
        } else if has(EnrollAuthenticator)
            || has(SelectAuthenticatorEnroll)
            || has(AuthenticatorEnrollmentData)
            || has(EnrollPoll)
        {
            Self::AwaitingAuthenticatorEnrollment
        } else if has(ChallengeAuthenticator)
            || has(ChallengePoll)
            || has(AuthenticatorVerificationData)
        {
            Self::AwaitingAuthenticatorVerification
        } else if has(SelectAuthenticatorAuthenticate) {
            Self::AwaitingAuthenticatorSelection
        } else {
            Self::AwaitingRemediation
        }
    }
}

impl fmt::Display for AuthenticationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::PasswordExpired => "password expired",
            Self::AwaitingAuthenticatorSelection => "awaiting authenticator selection",
            Self::AwaitingAuthenticatorVerification => "awaiting authenticator verification",
            Self::AwaitingAuthenticatorEnrollment => "awaiting authenticator enrollment",
            Self::AwaitingPasswordReset => "awaiting password reset",
            Self::AwaitingProfileEnrollment => "awaiting profile enrollment",
            Self::AwaitingRemediation => "awaiting remediation",
            Self::Terminated => "terminated",
        };
        f.write_str(text)
    }
}

/// One step the caller may take next
#[derive(Debug, Clone, PartialEq)]
pub struct NextStep {
    /// Remediation name
    pub name: String,
    /// Required fields the caller must supply
    pub required_fields: Vec<String>,
    /// Visible fields in declared order
    pub fields: Vec<FieldSpec>,
}

/// Result of one orchestrator call
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Next possible steps, in server order (empty once terminal)
    pub remediations: Vec<NextStep>,
    /// Server messages for the caller
    pub messages: Vec<String>,
    /// Whether the flow has ended
    pub terminal: bool,
    /// Tokens, once issued
    pub tokens: Option<TokenResponse>,
    /// Coarse status
    pub status: AuthenticationStatus,
}

impl StepOutcome {
    /// Outcome for a flow waiting on the caller
    pub fn awaiting(doc: &RemediationDocument) -> Self {
        let remediations = doc
            .remediations
            .iter()
            .map(|option| NextStep {
                name: option.name.as_str().to_string(),
                required_fields: option.required_fields(),
                fields: option.form.iter().filter(|f| f.visible).cloned().collect(),
            })
            .collect();

        Self {
            remediations,
            messages: doc.all_messages().into_iter().map(|m| m.text.clone()).collect(),
            terminal: false,
            tokens: None,
            status: AuthenticationStatus::from_document(doc),
        }
    }

    /// Outcome once tokens were issued
    pub fn success(doc: Option<&RemediationDocument>, tokens: TokenResponse) -> Self {
        Self {
            remediations: Vec::new(),
            messages: doc
                .map(|d| d.messages.iter().map(|m| m.text.clone()).collect())
                .unwrap_or_default(),
            terminal: true,
            tokens: Some(tokens),
            status: AuthenticationStatus::Success,
        }
    }

    /// Outcome for a flow that ended without tokens
    pub fn terminated(messages: Vec<String>) -> Self {
        Self {
            remediations: Vec::new(),
            messages,
            terminal: true,
            tokens: None,
            status: AuthenticationStatus::Terminated,
        }
    }

    /// Names of the next steps
    pub fn names(&self) -> Vec<&str> {
        self.remediations.iter().map(|r| r.name.as_str()).collect()
    }

    /// Whether a step is offered
    pub fn offers(&self, name: &str) -> bool {
        self.remediations.iter().any(|r| r.name == name)
    }

    /// Step by name
    pub fn step(&self, name: &str) -> Option<&NextStep> {
        self.remediations.iter().find(|r| r.name == name)
    }
}
