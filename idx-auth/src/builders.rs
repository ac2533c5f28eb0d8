//! Request builders
//!
//! A builder turns a [`ProceedContext`], the declared form of a remediation and
//! the caller's input into a ready-to-send [`IdxRequest`]. Builders are pure:
//! they validate and compose, and never touch the network.
//!
//! All builders share one schema walk ([`compose`]) that checks required
//! fields, coerces scalar types, resolves options, fills server defaults and
//! drops anything the form does not declare. Builders differ only in how they
//! reshape caller input before that walk.

use crate::context::ProceedContext;
use crate::document::{FieldKind, FieldSpec, OptionValue, RemediationName};
use crate::error::ValidationError;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Media type of IDX requests and responses
pub const ION_JSON: &str = "application/ion+json; okta-version=1.0.0";

/// Media type of the token endpoint
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Field names that are always treated as secret
pub const SECRET_FIELDS: &[&str] = &[
    "passcode",
    "password",
    "answer",
    "totp",
    "newPassword",
    "client_secret",
    "code_verifier",
    "interaction_code",
];

const REDACTED: &str = "[REDACTED]";

/// Caller input for one step
#[derive(Clone, Default, PartialEq)]
pub struct FormValues(Map<String, Value>);

impl FormValues {
    /// Empty input
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether no values were supplied
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for FormValues {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Debug for FormValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut view = Value::Object(self.0.clone());
        redact(&mut view, &BTreeSet::new());
        write!(f, "FormValues({})", view)
    }
}

/// Body of an outgoing request
#[derive(Clone, PartialEq)]
pub enum RequestBody {
    /// ion+json body
    Json(Value),
    /// Form-encoded pairs
    Form(Vec<(String, String)>),
}

/// A composed request, ready for the transport
#[derive(Clone, PartialEq)]
pub struct IdxRequest {
    /// HTTP method
    pub method: String,
    /// Target URL
    pub url: String,
    /// Body
    pub body: RequestBody,
    /// Extra headers (content negotiation is added by the transport)
    pub headers: Vec<(String, String)>,
    secrets: BTreeSet<String>,
}

impl IdxRequest {
    /// JSON request
    pub fn json(method: impl Into<String>, url: impl Into<String>, body: Value) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: RequestBody::Json(body),
            headers: Vec::new(),
            secrets: BTreeSet::new(),
        }
    }

    /// Form-encoded request
    pub fn form(url: impl Into<String>, pairs: Vec<(String, String)>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            body: RequestBody::Form(pairs),
            headers: Vec::new(),
            secrets: BTreeSet::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Mark additional field names as secret for logging
    pub fn with_secrets(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.secrets.extend(names);
        self
    }

    /// JSON body, if this is a JSON request
    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            RequestBody::Json(v) => Some(v),
            RequestBody::Form(_) => None,
        }
    }

    /// Value of a form pair, if this is a form request
    pub fn form_value(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            RequestBody::Json(_) => None,
        }
    }

    /// Body with every secret replaced, for logs
    pub fn log_view(&self) -> Value {
        match &self.body {
            RequestBody::Json(body) => {
                let mut view = body.clone();
                redact(&mut view, &self.secrets);
                view
            }
            RequestBody::Form(pairs) => {
                let map = pairs
                    .iter()
                    .map(|(k, v)| {
                        let shown = if is_secret(k, &self.secrets) {
                            Value::from(REDACTED)
                        } else {
                            Value::from(v.as_str())
                        };
                        (k.clone(), shown)
                    })
                    .collect();
                Value::Object(map)
            }
        }
    }
}

impl fmt::Debug for IdxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdxRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.log_view())
            .finish()
    }
}

fn is_secret(name: &str, extra: &BTreeSet<String>) -> bool {
    SECRET_FIELDS.contains(&name) || extra.contains(name)
}

fn redact(value: &mut Value, extra: &BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_secret(key, extra) {
                    *v = Value::from(REDACTED);
                } else {
                    redact(v, extra);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| redact(v, extra)),
        _ => {}
    }
}

/// Composes the request for one kind of step
pub trait RequestBuilder: Send + Sync {
    /// Validate `input` against `form` and compose the request
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        input: &FormValues,
    ) -> Result<IdxRequest, ValidationError>;
}

/// Builder for a remediation, or `None` when this client cannot submit it
pub fn builder_for(name: &RemediationName) -> Option<&'static dyn RequestBuilder> {
    use RemediationName::*;

    let builder: &'static dyn RequestBuilder = match name {
        Identify | IdentifyRecovery => &IdentifyBuilder,
        SelectAuthenticatorAuthenticate
        | SelectAuthenticatorEnroll
        | AuthenticatorVerificationData
        | AuthenticatorEnrollmentData => &ChallengeBuilder,
        ChallengeAuthenticator | EnrollAuthenticator | ReenrollAuthenticator | ResetAuthenticator => {
            &AnswerChallengeBuilder
        }
        SelectEnrollProfile | EnrollProfile => &EnrollBuilder,
        Recover | Resend => &RecoverBuilder,
        Cancel => &CancelBuilder,
        Poll | ChallengePoll | EnrollPoll => &PollBuilder,
        Skip => &SkipBuilder,
        RedirectIdp | Unknown(_) => return None,
    };
    Some(builder)
}

/// Walk `form`, validating and composing `input` into a body
///
/// Immutable fields always take the server value. Required fields must end up
/// with a value from the caller or the server. Keys not declared in `form` are
/// dropped. Names of secret fields are added to `secrets`.
pub fn compose(
    form: &[FieldSpec],
    input: &Map<String, Value>,
    prefix: &str,
    secrets: &mut BTreeSet<String>,
) -> Result<Map<String, Value>, ValidationError> {
    let mut out = Map::new();

    for field in form {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };
        if field.secret {
            secrets.insert(field.name.clone());
        }

        let supplied = input.get(&field.name).filter(|v| !v.is_null());
        let supplied = match (&field.value, field.mutable) {
            (Some(_), false) => None,
            _ => supplied,
        };

        match supplied {
            Some(value) => {
                let value = if field.options.as_ref().map(|o| !o.is_empty()).unwrap_or(false) {
                    resolve_option(field, &path, value, secrets)?
                } else {
                    let value = coerce(field.kind, &path, value)?;
                    match (&field.form, value) {
                        (Some(nested), Value::Object(obj)) => {
                            Value::Object(compose(nested, &obj, &path, secrets)?)
                        }
                        (_, value) => value,
                    }
                };
                out.insert(field.name.clone(), value);
            }
            None => match &field.value {
                Some(default) => {
                    out.insert(field.name.clone(), default.clone());
                }
                None if field.required => {
                    return Err(ValidationError::MissingField {
                        path: missing_path(field, &path),
                    })
                }
                None => {}
            },
        }
    }

    Ok(out)
}

fn missing_path(field: &FieldSpec, path: &str) -> String {
    let first_input = field
        .form
        .as_ref()
        .and_then(|nested| nested.iter().find(|f| f.value.is_none()));
    match first_input {
        Some(child) => format!("{}.{}", path, child.name),
        None => path.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn coerce(kind: FieldKind, path: &str, value: &Value) -> Result<Value, ValidationError> {
    let coerced = match (kind, value) {
        (FieldKind::String, Value::String(_))
        | (FieldKind::Boolean, Value::Bool(_))
        | (FieldKind::Object, Value::Object(_))
        | (FieldKind::Array, Value::Array(_)) => Some(value.clone()),
        (FieldKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (FieldKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Some(Value::Bool(true)),
            "false" | "no" | "n" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    };

    coerced.ok_or_else(|| ValidationError::TypeMismatch {
        path: path.to_string(),
        expected: kind.as_str(),
        found: json_type(value),
    })
}

/// Match a supplied value against a field's declared options
fn resolve_option(
    field: &FieldSpec,
    path: &str,
    value: &Value,
    secrets: &mut BTreeSet<String>,
) -> Result<Value, ValidationError> {
    let options = field.options.as_deref().unwrap_or_default();
    let unknown = |shown: String| ValidationError::UnknownOption {
        path: path.to_string(),
        value: shown,
    };

    match value {
        Value::String(wanted) => {
            let found = options.iter().find(|option| {
                if let OptionValue::Scalar(Value::String(s)) = &option.value {
                    if s == wanted {
                        return true;
                    }
                }
                let related = option.relates_to.as_ref();
                option.form_value("id").and_then(Value::as_str) == Some(wanted.as_str())
                    || option.form_value("methodType").and_then(Value::as_str)
                        == Some(wanted.as_str())
                    || related.and_then(|a| a.key.as_deref()) == Some(wanted.as_str())
                    || related
                        .map(|a| a.methods.iter().any(|m| m.as_str() == wanted))
                        .unwrap_or(false)
                    || option
                        .label
                        .as_deref()
                        .map(|l| l.eq_ignore_ascii_case(wanted))
                        .unwrap_or(false)
            });
            let option = found.ok_or_else(|| unknown(wanted.clone()))?;

            match &option.value {
                OptionValue::Scalar(v) => Ok(v.clone()),
                OptionValue::Form(nested) => {
                    let mut chosen = option_defaults(nested);
                    // A method picked by name fills a method the option leaves open
                    let method_open = nested
                        .iter()
                        .any(|f| f.name == "methodType" && f.value.is_none());
                    let by_method = option
                        .relates_to
                        .as_ref()
                        .map(|a| a.methods.iter().any(|m| m.as_str() == wanted))
                        .unwrap_or(false);
                    if method_open && by_method {
                        chosen.insert("methodType".to_string(), Value::from(wanted.as_str()));
                    }
                    Ok(Value::Object(compose(nested, &chosen, path, secrets)?))
                }
            }
        }
        Value::Object(supplied) => {
            let wanted_id = supplied.get("id").and_then(Value::as_str);
            let option = options
                .iter()
                .find(|option| {
                    matches!(option.value, OptionValue::Form(_))
                        && option.form_value("id").and_then(Value::as_str) == wanted_id
                })
                .ok_or_else(|| unknown(wanted_id.unwrap_or("<no id>").to_string()))?;

            let OptionValue::Form(nested) = &option.value else {
                return Err(unknown(wanted_id.unwrap_or("<no id>").to_string()));
            };
            let mut chosen = option_defaults(nested);
            for (k, v) in supplied {
                chosen.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(compose(nested, &chosen, path, secrets)?))
        }
        other => options
            .iter()
            .find(|option| matches!(&option.value, OptionValue::Scalar(v) if v == other))
            .map(|_| other.clone())
            .ok_or_else(|| unknown(other.to_string())),
    }
}

fn option_defaults(nested: &[FieldSpec]) -> Map<String, Value> {
    nested
        .iter()
        .filter_map(|f| f.value.clone().map(|v| (f.name.clone(), v)))
        .collect()
}

/// Finish a composed body as a request against `ctx`
fn finish(ctx: ProceedContext, body: Map<String, Value>, secrets: BTreeSet<String>) -> IdxRequest {
    let accepts_form = ctx
        .accepts
        .as_deref()
        .map(|a| a.contains("x-www-form-urlencoded"))
        .unwrap_or(false);

    let request = if accepts_form {
        let pairs = body
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        IdxRequest {
            method: ctx.method,
            ..IdxRequest::form(ctx.href, pairs)
        }
    } else {
        IdxRequest::json(ctx.method, ctx.href, Value::Object(body))
    };
    request.with_secrets(secrets)
}

fn input_with_state(ctx: &ProceedContext, input: &FormValues) -> Map<String, Value> {
    let mut map = input.as_map().clone();
    map.entry("stateHandle")
        .or_insert_with(|| Value::from(ctx.state_handle.as_str()));
    map
}

/// `identify` and `identify-recovery`
pub struct IdentifyBuilder;

impl RequestBuilder for IdentifyBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        let mut map = input_with_state(&ctx, input);

        if !map.contains_key("identifier") {
            if let Some(username) = map.remove("username") {
                map.insert("identifier".to_string(), username);
            }
        }

        let wants_credentials = form.iter().any(|f| f.name == "credentials");
        if wants_credentials && !map.contains_key("credentials") {
            let secret = map.get("passcode").or_else(|| map.get("password")).cloned();
            if let Some(secret) = secret {
                let mut credentials = Map::new();
                credentials.insert("passcode".to_string(), secret);
                map.insert("credentials".to_string(), Value::Object(credentials));
            }
        }

        let mut secrets = BTreeSet::new();
        let body = compose(form, &map, "", &mut secrets)?;
        Ok(finish(ctx, body, secrets))
    }
}

/// `select-authenticator-*` and the `authenticator-*-data` steps
pub struct ChallengeBuilder;

impl RequestBuilder for ChallengeBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        let mut map = input_with_state(&ctx, input);

        // Flat keys naming nested authenticator fields (methodType, phoneNumber)
        // are folded into the authenticator object.
        let nested_names: BTreeSet<String> = form
            .iter()
            .filter(|f| f.name == "authenticator")
            .flat_map(|f| {
                let from_form = f.form.iter().flatten().map(|c| c.name.clone());
                let from_options = f
                    .options
                    .iter()
                    .flatten()
                    .filter_map(|o| match &o.value {
                        OptionValue::Form(nested) => Some(nested),
                        OptionValue::Scalar(_) => None,
                    })
                    .flatten()
                    .map(|c| c.name.clone());
                from_form.chain(from_options).collect::<Vec<_>>()
            })
            .filter(|name| name != "id")
            .collect();

        let overrides: Map<String, Value> = nested_names
            .iter()
            .filter_map(|name| map.get(name).cloned().map(|v| (name.clone(), v)))
            .collect();

        if !overrides.is_empty() {
            if let Some(authenticator) = map.get("authenticator").cloned() {
                let merged = match authenticator {
                    Value::String(_) => {
                        let resolved = form
                            .iter()
                            .find(|f| f.name == "authenticator")
                            .map(|f| {
                                resolve_option(f, "authenticator", &authenticator, &mut BTreeSet::new())
                            })
                            .transpose()?;
                        resolved.unwrap_or(authenticator)
                    }
                    other => other,
                };
                if let Value::Object(mut obj) = merged {
                    obj.extend(overrides);
                    map.insert("authenticator".to_string(), Value::Object(obj));
                }
            } else {
                let field_has_form = form
                    .iter()
                    .any(|f| f.name == "authenticator" && f.form.is_some());
                if field_has_form {
                    map.insert("authenticator".to_string(), Value::Object(overrides));
                }
            }
        }

        let mut secrets = BTreeSet::new();
        let body = compose(form, &map, "", &mut secrets)?;
        Ok(finish(ctx, body, secrets))
    }
}

/// `challenge-authenticator`, `enroll-authenticator`, `reenroll-authenticator`,
/// `reset-authenticator`
pub struct AnswerChallengeBuilder;

impl AnswerChallengeBuilder {
    fn aliases(name: &str) -> &'static [&'static str] {
        match name {
            "passcode" => &["passcode", "code", "password", "newPassword", "otp"],
            "totp" => &["totp", "code", "passcode"],
            "answer" => &["answer"],
            "questionKey" => &["questionKey"],
            "question" => &["question"],
            _ => &[],
        }
    }
}

impl RequestBuilder for AnswerChallengeBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        let mut map = input_with_state(&ctx, input);

        if !map.contains_key("credentials") {
            let layout = form
                .iter()
                .find(|f| f.name == "credentials")
                .and_then(|f| f.form.as_ref());

            if let Some(layout) = layout {
                let mut credentials = Map::new();
                for child in layout {
                    let aliases = Self::aliases(&child.name);
                    let found = std::iter::once(child.name.as_str())
                        .chain(aliases.iter().copied())
                        .find_map(|key| input.get(key).filter(|v| !v.is_null()));
                    if let Some(value) = found {
                        credentials.insert(child.name.clone(), value.clone());
                    }
                }
                if !credentials.is_empty() {
                    map.insert("credentials".to_string(), Value::Object(credentials));
                }
            }
        }

        let mut secrets = BTreeSet::new();
        let body = compose(form, &map, "", &mut secrets)?;
        Ok(finish(ctx, body, secrets))
    }
}

/// `select-enroll-profile` and `enroll-profile`
pub struct EnrollBuilder;

impl RequestBuilder for EnrollBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        let mut map = input_with_state(&ctx, input);

        let profile_form = form
            .iter()
            .find(|f| f.name == "userProfile")
            .and_then(|f| f.form.as_ref());

        if let Some(profile_form) = profile_form {
            let mut profile = match map.remove("userProfile") {
                Some(Value::Object(obj)) => obj,
                Some(other) => {
                    return Err(ValidationError::TypeMismatch {
                        path: "userProfile".to_string(),
                        expected: FieldKind::Object.as_str(),
                        found: json_type(&other),
                    })
                }
                None => Map::new(),
            };
            for child in profile_form {
                if !profile.contains_key(&child.name) {
                    if let Some(value) = input.get(&child.name) {
                        profile.insert(child.name.clone(), value.clone());
                    }
                }
            }
            if !profile.is_empty() {
                map.insert("userProfile".to_string(), Value::Object(profile));
            }
        }

        let mut secrets = BTreeSet::new();
        let body = compose(form, &map, "", &mut secrets)?;
        Ok(finish(ctx, body, secrets))
    }
}

/// Body for steps that take no user input: server defaults plus the state handle
fn defaults_only(ctx: ProceedContext, form: &[FieldSpec]) -> Result<IdxRequest, ValidationError> {
    let mut secrets = BTreeSet::new();
    let mut seed = Map::new();
    seed.insert(
        "stateHandle".to_string(),
        Value::from(ctx.state_handle.as_str()),
    );
    let mut body = compose(form, &seed, "", &mut secrets)?;
    if !ctx.state_handle.is_empty() {
        body.entry("stateHandle")
            .or_insert_with(|| Value::from(ctx.state_handle.as_str()));
    }
    Ok(finish(ctx, body, secrets))
}

/// `recover` and `resend`
pub struct RecoverBuilder;

impl RequestBuilder for RecoverBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        _input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        defaults_only(ctx, form)
    }
}

/// `cancel`
pub struct CancelBuilder;

impl RequestBuilder for CancelBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        _input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        // Cancel must always go out, so a form the client cannot satisfy
        // degrades to the bare state handle.
        let href = ctx.href.clone();
        let method = ctx.method.clone();
        let state_handle = ctx.state_handle.clone();
        defaults_only(ctx, form).or_else(|_| {
            Ok(IdxRequest::json(
                method,
                href,
                serde_json::json!({ "stateHandle": state_handle }),
            ))
        })
    }
}

/// `poll`, `challenge-poll`, `enroll-poll`
pub struct PollBuilder;

impl RequestBuilder for PollBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        _input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        defaults_only(ctx, form)
    }
}

/// `skip`
pub struct SkipBuilder;

impl RequestBuilder for SkipBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        form: &[FieldSpec],
        _input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        defaults_only(ctx, form)
    }
}

/// Introspect: `{ interactionHandle }` to the introspect endpoint
pub struct IntrospectBuilder;

impl RequestBuilder for IntrospectBuilder {
    fn build(
        &self,
        ctx: ProceedContext,
        _form: &[FieldSpec],
        _input: &FormValues,
    ) -> Result<IdxRequest, ValidationError> {
        let body = serde_json::json!({ "interactionHandle": ctx.interaction_handle });
        Ok(IdxRequest::json(ctx.method, ctx.href, body))
    }
}
