//! Remediation document model
//!
//! Every IDX response is an ion document: a state handle, an ordered list of
//! remediations (the actions the server will accept next), and context such as
//! messages and the authenticator being verified. This module parses those
//! documents into owned values. A document is never edited after parsing; each
//! server response produces a fresh one.

use crate::error::ProtocolError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Message keys after which the server will not accept further steps
pub const TERMINAL_MESSAGE_KEYS: &[&str] = &["idx.session.expired", "idx.transaction.expired"];

/// Name of a remediation step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemediationName {
    /// `identify`
    Identify,
    /// `identify-recovery`
    IdentifyRecovery,
    /// `select-authenticator-authenticate`
    SelectAuthenticatorAuthenticate,
    /// `select-authenticator-enroll`
    SelectAuthenticatorEnroll,
    /// `challenge-authenticator`
    ChallengeAuthenticator,
    /// `enroll-authenticator`
    EnrollAuthenticator,
    /// `reenroll-authenticator`
    ReenrollAuthenticator,
    /// `reset-authenticator`
    ResetAuthenticator,
    /// `authenticator-verification-data`
    AuthenticatorVerificationData,
    /// `authenticator-enrollment-data`
    AuthenticatorEnrollmentData,
    /// `select-enroll-profile`
    SelectEnrollProfile,
    /// `enroll-profile`
    EnrollProfile,
    /// `challenge-poll`
    ChallengePoll,
    /// `enroll-poll`
    EnrollPoll,
    /// `poll`
    Poll,
    /// `skip`
    Skip,
    /// `cancel`
    Cancel,
    /// `recover`
    Recover,
    /// `resend`
    Resend,
    /// `redirect-idp`
    RedirectIdp,
    /// Any name this client does not know how to build
    Unknown(String),
}

impl RemediationName {
    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Identify => "identify",
            Self::IdentifyRecovery => "identify-recovery",
            Self::SelectAuthenticatorAuthenticate => "select-authenticator-authenticate",
            Self::SelectAuthenticatorEnroll => "select-authenticator-enroll",
            Self::ChallengeAuthenticator => "challenge-authenticator",
            Self::EnrollAuthenticator => "enroll-authenticator",
            Self::ReenrollAuthenticator => "reenroll-authenticator",
            Self::ResetAuthenticator => "reset-authenticator",
            Self::AuthenticatorVerificationData => "authenticator-verification-data",
            Self::AuthenticatorEnrollmentData => "authenticator-enrollment-data",
            Self::SelectEnrollProfile => "select-enroll-profile",
            Self::EnrollProfile => "enroll-profile",
            Self::ChallengePoll => "challenge-poll",
            Self::EnrollPoll => "enroll-poll",
            Self::Poll => "poll",
            Self::Skip => "skip",
            Self::Cancel => "cancel",
            Self::Recover => "recover",
            Self::Resend => "resend",
            Self::RedirectIdp => "redirect-idp",
            Self::Unknown(name) => name,
        }
    }

    /// Whether this is one of the polling steps
    pub fn is_poll(&self) -> bool {
        matches!(self, Self::Poll | Self::ChallengePoll | Self::EnrollPoll)
    }
}

impl From<&str> for RemediationName {
    fn from(name: &str) -> Self {
        match name {
            "identify" => Self::Identify,
            "identify-recovery" => Self::IdentifyRecovery,
            "select-authenticator-authenticate" => Self::SelectAuthenticatorAuthenticate,
            "select-authenticator-enroll" => Self::SelectAuthenticatorEnroll,
            "challenge-authenticator" => Self::ChallengeAuthenticator,
            "enroll-authenticator" => Self::EnrollAuthenticator,
            "reenroll-authenticator" => Self::ReenrollAuthenticator,
            "reset-authenticator" => Self::ResetAuthenticator,
            "authenticator-verification-data" => Self::AuthenticatorVerificationData,
            "authenticator-enrollment-data" => Self::AuthenticatorEnrollmentData,
            "select-enroll-profile" => Self::SelectEnrollProfile,
            "enroll-profile" => Self::EnrollProfile,
            "challenge-poll" => Self::ChallengePoll,
            "enroll-poll" => Self::EnrollPoll,
            "poll" => Self::Poll,
            "skip" => Self::Skip,
            "cancel" => Self::Cancel,
            "recover" => Self::Recover,
            "resend" => Self::Resend,
            "redirect-idp" => Self::RedirectIdp,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for RemediationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a form field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text (the ion default)
    String,
    /// `true`/`false`
    Boolean,
    /// Whole number
    Integer,
    /// Nested form or option object
    Object,
    /// List of values
    Array,
}

impl FieldKind {
    fn from_wire(kind: Option<&str>, has_form: bool) -> Self {
        match kind {
            Some("boolean") => Self::Boolean,
            Some("integer") | Some("number") => Self::Integer,
            Some("object") => Self::Object,
            Some("array") => Self::Array,
            Some(_) => Self::String,
            None if has_form => Self::Object,
            None => Self::String,
        }
    }

    /// Human-readable name used in validation errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// One option of an options field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOption {
    /// Display label
    pub label: Option<String>,
    /// Option value, either a scalar or a nested form of fixed values
    pub value: OptionValue,
    /// Authenticator this option selects, when declared
    pub relates_to: Option<AuthenticatorInfo>,
}

/// Value carried by a [`FieldOption`]
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Plain value submitted as-is
    Scalar(Value),
    /// Nested form whose field defaults make up the submitted object
    Form(Vec<FieldSpec>),
}

impl FieldOption {
    /// The value a caller submits when choosing this option
    pub fn submission(&self) -> Value {
        match &self.value {
            OptionValue::Scalar(v) => v.clone(),
            OptionValue::Form(fields) => {
                let mut obj = serde_json::Map::new();
                for field in fields {
                    if let Some(v) = &field.value {
                        obj.insert(field.name.clone(), v.clone());
                    }
                }
                Value::Object(obj)
            }
        }
    }

    /// Default value of a named field inside a form option
    pub fn form_value(&self, name: &str) -> Option<&Value> {
        match &self.value {
            OptionValue::Form(fields) => fields
                .iter()
                .find(|f| f.name == name)
                .and_then(|f| f.value.as_ref()),
            OptionValue::Scalar(_) => None,
        }
    }
}

/// Schema of one form field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Field name
    pub name: String,
    /// Display label
    pub label: Option<String>,
    /// Declared type
    pub kind: FieldKind,
    /// Must be present in the submission
    pub required: bool,
    /// Never logged or echoed
    pub secret: bool,
    /// Caller may change the value
    pub mutable: bool,
    /// Should be shown to the user
    pub visible: bool,
    /// Server default
    pub value: Option<Value>,
    /// Allowed values
    pub options: Option<Vec<FieldOption>>,
    /// Nested fields for object types
    pub form: Option<Vec<FieldSpec>>,
    /// Field-level messages (usually validation failures)
    pub messages: Vec<Message>,
}

impl FieldSpec {
    /// Nested field by name
    pub fn child(&self, name: &str) -> Option<&FieldSpec> {
        self.form.as_ref()?.iter().find(|f| f.name == name)
    }

    /// Whether the caller is expected to provide this field
    pub fn is_user_input(&self) -> bool {
        self.visible && self.mutable && self.value.is_none()
    }
}

/// Authenticator category
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticatorKind {
    /// Password
    Password,
    /// Email (OTP or magic link)
    Email,
    /// SMS or voice
    Phone,
    /// Security question
    SecurityQuestion,
    /// WebAuthn / security key
    WebAuthn,
    /// Authenticator app (push or code)
    App,
    /// Third-party TOTP
    Totp,
    /// Anything else
    Other(String),
}

impl AuthenticatorKind {
    fn from_wire(kind: &str) -> Self {
        match kind {
            "password" => Self::Password,
            "email" => Self::Email,
            "phone" => Self::Phone,
            "security_question" => Self::SecurityQuestion,
            "security_key" | "webauthn" => Self::WebAuthn,
            "app" => Self::App,
            "totp" | "otp" => Self::Totp,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Verification method offered by an authenticator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodType {
    /// Password entry
    Password,
    /// Email
    Email,
    /// SMS
    Sms,
    /// Voice call
    Voice,
    /// Push notification
    Push,
    /// Time-based code
    Totp,
    /// One-time code
    Otp,
    /// Security question
    SecurityQuestion,
    /// WebAuthn
    WebAuthn,
    /// Anything else
    Other(String),
}

impl MethodType {
    fn from_wire(kind: &str) -> Self {
        match kind {
            "password" => Self::Password,
            "email" => Self::Email,
            "sms" => Self::Sms,
            "voice" => Self::Voice,
            "push" => Self::Push,
            "totp" => Self::Totp,
            "otp" => Self::Otp,
            "security_question" => Self::SecurityQuestion,
            "webauthn" => Self::WebAuthn,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Password => "password",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Voice => "voice",
            Self::Push => "push",
            Self::Totp => "totp",
            Self::Otp => "otp",
            Self::SecurityQuestion => "security_question",
            Self::WebAuthn => "webauthn",
            Self::Other(name) => name,
        }
    }
}

/// Authenticator or authenticator enrollment
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorInfo {
    /// Authenticator id
    pub id: String,
    /// Category
    pub kind: AuthenticatorKind,
    /// Authenticator key (e.g. `okta_verify`)
    pub key: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Offered methods
    pub methods: Vec<MethodType>,
    /// Enrollment id, for enrollments
    pub enrollment_id: Option<String>,
    /// Out-of-band poll hint
    pub poll: Option<PollInfo>,
    /// Recovery action (password reset)
    pub recover: Option<RemediationOption>,
    /// Resend action (email/SMS)
    pub resend: Option<RemediationOption>,
}

/// Poll hint for asynchronous verification
#[derive(Debug, Clone, PartialEq)]
pub struct PollInfo {
    /// Suggested wait between polls; `None` when the server gives none
    pub refresh: Option<Duration>,
    /// The poll action to submit
    pub option: RemediationOption,
    /// Authenticator the poll belongs to, when known
    pub authenticator_id: Option<String>,
}

impl PollInfo {
    /// Poll URL
    pub fn href(&self) -> &str {
        &self.option.href
    }

    /// Poll HTTP method
    pub fn method(&self) -> &str {
        &self.option.method
    }

    /// Poll form
    pub fn form(&self) -> &[FieldSpec] {
        &self.option.form
    }
}

/// One action the server will accept
#[derive(Debug, Clone, PartialEq)]
pub struct RemediationOption {
    /// Step name
    pub name: RemediationName,
    /// HTTP method
    pub method: String,
    /// Target URL
    pub href: String,
    /// Fields in declared order
    pub form: Vec<FieldSpec>,
    /// Accepted request media type
    pub accepts: Option<String>,
    /// Authenticator the step acts on
    pub relates_to: Option<Box<AuthenticatorInfo>>,
    /// Poll interval, for poll-type steps
    pub refresh: Option<Duration>,
}

impl RemediationOption {
    /// Field by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.form.iter().find(|f| f.name == name)
    }

    /// Names of required fields with no server default
    pub fn required_fields(&self) -> Vec<String> {
        self.form
            .iter()
            .filter(|f| f.required && f.value.is_none())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Whether the step takes a form-encoded body
    pub fn is_form_encoded(&self) -> bool {
        self.accepts
            .as_deref()
            .map(|a| a.contains("x-www-form-urlencoded"))
            .unwrap_or(false)
    }

    /// Map of methodType (or key) to authenticator id for the `authenticator` field
    pub fn authenticator_options(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let Some(options) = self.field("authenticator").and_then(|f| f.options.as_ref()) else {
            return map;
        };

        for option in options {
            let id = option
                .form_value("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| option.relates_to.as_ref().map(|a| a.id.clone()));
            let label = option
                .form_value("methodType")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| option.relates_to.as_ref().and_then(|a| a.key.clone()))
                .or_else(|| option.label.clone());

            if let (Some(label), Some(id)) = (label, id) {
                map.insert(label, id);
            }
        }
        map
    }

    fn collect_messages<'a>(fields: &'a [FieldSpec], out: &mut Vec<&'a Message>) {
        for field in fields {
            out.extend(field.messages.iter());
            if let Some(form) = &field.form {
                Self::collect_messages(form, out);
            }
        }
    }
}

/// Severity of a server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageClass {
    /// Error
    Error,
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Anything else
    Other(String),
}

/// Server message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Rendered text
    pub text: String,
    /// i18n key
    pub key: Option<String>,
    /// Severity
    pub class: MessageClass,
}

impl Message {
    /// Whether the message marks the flow as dead
    pub fn is_terminal(&self) -> bool {
        self.key
            .as_deref()
            .map(|k| TERMINAL_MESSAGE_KEYS.contains(&k))
            .unwrap_or(false)
    }
}

/// Application the flow signs into
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppInfo {
    /// App id
    #[serde(default)]
    pub id: String,
    /// App name
    pub name: Option<String>,
    /// App label
    pub label: Option<String>,
}

/// User identified so far
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    /// User id
    #[serde(default)]
    pub id: String,
    /// Identifier (login)
    pub identifier: Option<String>,
}

/// Parsed IDX response
#[derive(Debug, Clone, PartialEq)]
pub struct RemediationDocument {
    /// State handle to echo back in every submission
    pub state_handle: String,
    /// Offered steps in server priority order
    pub remediations: Vec<RemediationOption>,
    /// Top-level messages
    pub messages: Vec<Message>,
    /// Authenticator being verified
    pub current_authenticator: Option<AuthenticatorInfo>,
    /// Enrollment being verified
    pub current_authenticator_enrollment: Option<AuthenticatorInfo>,
    /// Authenticators known to the flow
    pub authenticators: Vec<AuthenticatorInfo>,
    /// Enrollments known to the flow
    pub authenticator_enrollments: Vec<AuthenticatorInfo>,
    /// Code issuance form, present once the user is authenticated
    pub success: Option<RemediationOption>,
    /// Top-level cancel action
    pub cancel: Option<RemediationOption>,
    /// App
    pub app: Option<AppInfo>,
    /// User
    pub user: Option<UserInfo>,
    /// When the state handle expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Flow intent (e.g. `LOGIN`)
    pub intent: Option<String>,
    /// Position of this document in the flow
    pub generation: u64,
}

impl RemediationDocument {
    /// Parse a 2xx response body
    pub fn parse(body: &Value, generation: u64) -> Result<Self, ProtocolError> {
        if !body.is_object() {
            return Err(ProtocolError::MalformedResponse(
                "response body is not a JSON object".to_string(),
            ));
        }
        if !body.get("stateHandle").map(Value::is_string).unwrap_or(false) {
            return Err(ProtocolError::MalformedResponse(
                "response has no stateHandle".to_string(),
            ));
        }

        let wire: wire::Document = serde_json::from_value(body.clone())?;
        Ok(wire.into_document(generation))
    }

    /// Find an action by exact wire name
    ///
    /// Searches the remediation list, then the top-level cancel, the current
    /// enrollment's recover, and the current authenticator's resend and poll.
    pub fn find(&self, name: &str) -> Option<&RemediationOption> {
        if let Some(option) = self.remediations.iter().find(|r| r.name.as_str() == name) {
            return Some(option);
        }

        let enrollment = self.current_authenticator_enrollment.as_ref();
        let current = self.current_authenticator.as_ref();
        match name {
            "cancel" => self.cancel.as_ref(),
            "recover" => enrollment
                .and_then(|a| a.recover.as_ref())
                .or_else(|| current.and_then(|a| a.recover.as_ref())),
            "resend" => current
                .and_then(|a| a.resend.as_ref())
                .or_else(|| enrollment.and_then(|a| a.resend.as_ref())),
            "poll" => current
                .and_then(|a| a.poll.as_ref())
                .or_else(|| enrollment.and_then(|a| a.poll.as_ref()))
                .map(|p| &p.option),
            _ => None,
        }
    }

    /// Names of offered remediations, in server order
    pub fn remediation_names(&self) -> Vec<String> {
        self.remediations
            .iter()
            .map(|r| r.name.as_str().to_string())
            .collect()
    }

    /// Whether a remediation with this name is offered
    pub fn has(&self, name: &RemediationName) -> bool {
        self.remediations.iter().any(|r| &r.name == name)
    }

    /// methodType (or key) to authenticator id map for a remediation
    pub fn authenticator_options(&self, name: &str) -> BTreeMap<String, String> {
        self.find(name)
            .map(RemediationOption::authenticator_options)
            .unwrap_or_default()
    }

    /// Whether the remediation's form carries `credentials`
    pub fn requires_credentials(&self, name: &str) -> bool {
        self.find(name)
            .map(|r| r.field("credentials").is_some())
            .unwrap_or(false)
    }

    /// Poll hint, if verification is happening out of band
    pub fn poll_info(&self) -> Option<PollInfo> {
        if let Some(poll) = self
            .current_authenticator
            .as_ref()
            .and_then(|a| a.poll.clone())
            .or_else(|| {
                self.current_authenticator_enrollment
                    .as_ref()
                    .and_then(|a| a.poll.clone())
            })
        {
            return Some(poll);
        }

        self.remediations
            .iter()
            .find(|r| r.name.is_poll())
            .map(|r| PollInfo {
                refresh: r.refresh,
                option: r.clone(),
                authenticator_id: r.relates_to.as_ref().map(|a| a.id.clone()),
            })
    }

    /// Poll hint, when polling is the only way forward for the given authenticator
    ///
    /// Returns `None` when the document also offers an in-band answer
    /// (`challenge-authenticator`, `enroll-authenticator`), or when the poll
    /// belongs to a different authenticator than `submitted`.
    pub fn awaits_out_of_band(&self, submitted: Option<&str>) -> Option<PollInfo> {
        if self.has(&RemediationName::ChallengeAuthenticator)
            || self.has(&RemediationName::EnrollAuthenticator)
        {
            return None;
        }

        let poll = self.poll_info()?;
        match (submitted, poll.authenticator_id.as_deref()) {
            (Some(sent), Some(owner)) if sent != owner => None,
            _ => Some(poll),
        }
    }

    /// Whether the server issued an interaction code
    pub fn is_success(&self) -> bool {
        self.success.is_some()
    }

    /// Interaction code from the success form
    pub fn interaction_code(&self) -> Option<&str> {
        self.success
            .as_ref()?
            .field("interaction_code")?
            .value
            .as_ref()?
            .as_str()
    }

    /// Top-level and field-level messages, top-level first
    pub fn all_messages(&self) -> Vec<&Message> {
        let mut out: Vec<&Message> = self.messages.iter().collect();
        for option in &self.remediations {
            RemediationOption::collect_messages(&option.form, &mut out);
        }
        out
    }

    /// Copy of this document carrying new messages and a new generation
    pub fn with_messages(&self, messages: Vec<Message>, generation: u64) -> Self {
        let mut doc = self.clone();
        doc.messages = messages;
        doc.generation = generation;
        doc
    }
}

/// Leniently parsed error (4xx) body
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorDocument {
    /// Full IDX document, when the error body is one
    pub document: Option<RemediationDocument>,
    /// IDX messages, top-level and field-level
    pub messages: Vec<Message>,
    /// OAuth `error`
    pub error: Option<String>,
    /// OAuth `error_description`
    pub error_description: Option<String>,
    /// Okta `errorCode`
    pub error_code: Option<String>,
    /// Okta `errorSummary`
    pub error_summary: Option<String>,
}

impl ErrorDocument {
    /// Parse any error body; never fails
    pub fn parse(body: &Value, generation: u64) -> Self {
        let document = RemediationDocument::parse(body, generation).ok();
        let messages = match &document {
            Some(doc) => doc.all_messages().into_iter().cloned().collect(),
            None => body
                .get("messages")
                .cloned()
                .and_then(|m| serde_json::from_value::<wire::Collection<wire::Message>>(m).ok())
                .map(|c| c.value.into_iter().map(wire::Message::into_message).collect())
                .unwrap_or_default(),
        };
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            document,
            messages,
            error: text("error"),
            error_description: text("error_description"),
            error_code: text("errorCode"),
            error_summary: text("errorSummary"),
        }
    }

    /// Whether the flow can continue after this error
    pub fn is_recoverable(&self) -> bool {
        !self.messages.is_empty() && !self.messages.iter().any(Message::is_terminal)
    }

    /// Rendered message texts, falling back to OAuth or Okta summaries
    pub fn texts(&self) -> Vec<String> {
        if !self.messages.is_empty() {
            return self.messages.iter().map(|m| m.text.clone()).collect();
        }
        self.error_description
            .iter()
            .chain(self.error_summary.iter())
            .cloned()
            .collect()
    }

    /// Most specific error code available
    pub fn code(&self) -> Option<String> {
        self.error_code
            .clone()
            .or_else(|| self.error.clone())
            .or_else(|| self.messages.iter().find_map(|m| m.key.clone()))
    }
}

mod wire {
    //! Serde shapes of the ion wire format

    use super::*;

    #[derive(Deserialize)]
    pub(super) struct Collection<T> {
        #[serde(default = "Vec::new")]
        pub value: Vec<T>,
    }

    #[derive(Deserialize)]
    pub(super) struct Object<T> {
        pub value: T,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    impl OneOrMany {
        fn first(&self) -> Option<&str> {
            match self {
                OneOrMany::One(s) => Some(s),
                OneOrMany::Many(v) => v.first().map(String::as_str),
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Document {
        state_handle: String,
        remediation: Option<Collection<Remediation>>,
        messages: Option<Collection<Message>>,
        current_authenticator: Option<Object<Authenticator>>,
        current_authenticator_enrollment: Option<Object<Authenticator>>,
        authenticators: Option<Collection<Authenticator>>,
        authenticator_enrollments: Option<Collection<Authenticator>>,
        success_with_interaction_code: Option<Remediation>,
        cancel: Option<Remediation>,
        app: Option<Object<AppInfo>>,
        user: Option<Object<UserInfo>>,
        expires_at: Option<String>,
        intent: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Remediation {
        name: String,
        href: String,
        method: String,
        #[serde(default)]
        value: Vec<Field>,
        accepts: Option<String>,
        relates_to: Option<OneOrMany>,
        refresh: Option<f64>,
    }

    #[derive(Deserialize)]
    pub(super) struct FormValue {
        #[serde(default)]
        value: Vec<Field>,
    }

    #[derive(Deserialize)]
    pub(super) struct Field {
        name: String,
        label: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        secret: bool,
        mutable: Option<bool>,
        visible: Option<bool>,
        value: Option<Value>,
        options: Option<Vec<FieldOption>>,
        form: Option<FormValue>,
        messages: Option<Collection<Message>>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct FieldOption {
        label: Option<String>,
        #[serde(default)]
        value: Value,
        relates_to: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Authenticator {
        #[serde(default)]
        id: String,
        #[serde(rename = "type", default)]
        kind: String,
        key: Option<String>,
        display_name: Option<String>,
        #[serde(default)]
        methods: Vec<Method>,
        enrollment_id: Option<String>,
        poll: Option<Remediation>,
        recover: Option<Remediation>,
        resend: Option<Remediation>,
    }

    #[derive(Deserialize)]
    pub(super) struct Method {
        #[serde(rename = "type")]
        kind: String,
    }

    #[derive(Deserialize)]
    pub(super) struct Message {
        message: String,
        i18n: Option<I18n>,
        class: Option<String>,
    }

    #[derive(Deserialize)]
    pub(super) struct I18n {
        key: Option<String>,
    }

    impl Message {
        pub(super) fn into_message(self) -> super::Message {
            let class = match self.class.as_deref() {
                Some("ERROR") | None => MessageClass::Error,
                Some("INFO") => MessageClass::Info,
                Some("WARNING") => MessageClass::Warning,
                Some(other) => MessageClass::Other(other.to_string()),
            };
            super::Message {
                text: self.message,
                key: self.i18n.and_then(|i| i.key),
                class,
            }
        }
    }

    /// Authenticators resolvable through `relatesTo` paths
    struct Relations {
        current: Option<AuthenticatorInfo>,
        current_enrollment: Option<AuthenticatorInfo>,
        authenticators: Vec<AuthenticatorInfo>,
        enrollments: Vec<AuthenticatorInfo>,
    }

    impl Relations {
        fn empty() -> Self {
            Self {
                current: None,
                current_enrollment: None,
                authenticators: Vec::new(),
                enrollments: Vec::new(),
            }
        }

        fn resolve(&self, path: &str) -> Option<AuthenticatorInfo> {
            let path = path.strip_prefix("$.")?;
            match path {
                "currentAuthenticator" => return self.current.clone(),
                "currentAuthenticatorEnrollment" => return self.current_enrollment.clone(),
                _ => {}
            }

            let (list, rest) = if let Some(rest) = path.strip_prefix("authenticatorEnrollments.value[") {
                (&self.enrollments, rest)
            } else if let Some(rest) = path.strip_prefix("authenticators.value[") {
                (&self.authenticators, rest)
            } else {
                return None;
            };
            let index: usize = rest.strip_suffix(']')?.parse().ok()?;
            list.get(index).cloned()
        }
    }

    fn seconds(value: Option<f64>) -> Option<Duration> {
        value.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    impl Remediation {
        fn into_option(self, relations: &Relations) -> RemediationOption {
            let relates_to = self
                .relates_to
                .as_ref()
                .and_then(OneOrMany::first)
                .and_then(|p| relations.resolve(p))
                .map(Box::new);
            RemediationOption {
                name: RemediationName::from(self.name.as_str()),
                method: self.method,
                href: self.href,
                form: self.value.into_iter().map(|f| f.into_spec(relations)).collect(),
                accepts: self.accepts,
                relates_to,
                refresh: seconds(self.refresh),
            }
        }
    }

    impl Field {
        fn into_spec(self, relations: &Relations) -> FieldSpec {
            let form = self
                .form
                .map(|f| f.value.into_iter().map(|f| f.into_spec(relations)).collect::<Vec<_>>());
            FieldSpec {
                kind: FieldKind::from_wire(self.kind.as_deref(), form.is_some()),
                name: self.name,
                label: self.label,
                required: self.required,
                secret: self.secret,
                mutable: self.mutable.unwrap_or(true),
                visible: self.visible.unwrap_or(true),
                value: self.value,
                options: self
                    .options
                    .map(|opts| opts.into_iter().map(|o| o.into_option(relations)).collect()),
                form,
                messages: self
                    .messages
                    .map(|c| c.value.into_iter().map(Message::into_message).collect())
                    .unwrap_or_default(),
            }
        }
    }

    impl FieldOption {
        fn into_option(self, relations: &Relations) -> super::FieldOption {
            let nested = self
                .value
                .get("form")
                .cloned()
                .and_then(|f| serde_json::from_value::<FormValue>(f).ok());
            let value = match nested {
                Some(form) => OptionValue::Form(
                    form.value.into_iter().map(|f| f.into_spec(relations)).collect(),
                ),
                None => OptionValue::Scalar(self.value),
            };
            super::FieldOption {
                label: self.label,
                value,
                relates_to: self.relates_to.as_deref().and_then(|p| relations.resolve(p)),
            }
        }
    }

    impl Authenticator {
        fn into_info(self) -> AuthenticatorInfo {
            // Nested actions do not resolve relatesTo; they always refer back
            // to this authenticator.
            let none = Relations::empty();
            let id = self.id;
            let poll = self.poll.map(|p| {
                let refresh = seconds(p.refresh);
                PollInfo {
                    refresh,
                    option: p.into_option(&none),
                    authenticator_id: Some(id.clone()),
                }
            });
            AuthenticatorInfo {
                kind: AuthenticatorKind::from_wire(&self.kind),
                key: self.key,
                display_name: self.display_name,
                methods: self
                    .methods
                    .into_iter()
                    .map(|m| MethodType::from_wire(&m.kind))
                    .collect(),
                enrollment_id: self.enrollment_id,
                poll,
                recover: self.recover.map(|r| r.into_option(&none)),
                resend: self.resend.map(|r| r.into_option(&none)),
                id,
            }
        }
    }

    impl Document {
        pub(super) fn into_document(self, generation: u64) -> RemediationDocument {
            let relations = Relations {
                current: self.current_authenticator.map(|o| o.value.into_info()),
                current_enrollment: self
                    .current_authenticator_enrollment
                    .map(|o| o.value.into_info()),
                authenticators: self
                    .authenticators
                    .map(|c| c.value.into_iter().map(Authenticator::into_info).collect())
                    .unwrap_or_default(),
                enrollments: self
                    .authenticator_enrollments
                    .map(|c| c.value.into_iter().map(Authenticator::into_info).collect())
                    .unwrap_or_default(),
            };

            let remediations = self
                .remediation
                .map(|c| c.value.into_iter().map(|r| r.into_option(&relations)).collect())
                .unwrap_or_default();
            let success = self
                .success_with_interaction_code
                .map(|r| r.into_option(&relations));
            let cancel = self.cancel.map(|r| r.into_option(&relations));
            let expires_at = self
                .expires_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));

            RemediationDocument {
                state_handle: self.state_handle,
                remediations,
                messages: self
                    .messages
                    .map(|c| c.value.into_iter().map(Message::into_message).collect())
                    .unwrap_or_default(),
                current_authenticator: relations.current,
                current_authenticator_enrollment: relations.current_enrollment,
                authenticators: relations.authenticators,
                authenticator_enrollments: relations.enrollments,
                success,
                cancel,
                app: self.app.map(|o| o.value),
                user: self.user.map(|o| o.value),
                expires_at,
                intent: self.intent,
                generation,
            }
        }
    }
}
