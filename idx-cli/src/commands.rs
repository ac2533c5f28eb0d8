//! CLI command implementations
//!
//! `login`, `recover` and `register` drive the canned flows from
//! `idx_auth::flows` and only prompt when the server asks for more. `interact`
//! renders whatever the server offers and lets the user pick each step.

use anyhow::{anyhow, bail, Context, Result};
use idx_auth::document::FieldOption;
use idx_auth::flows::{self, AuthenticationResponse};
use idx_auth::{
    AuthFlow, AuthenticationStatus, FieldKind, FieldSpec, FormValues, IdxClient, IdxConfig,
    NextStep, RemediationName, StepOutcome, TokenResponse,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Build a client from a config file, or from the environment alone
pub fn client(config: Option<&Path>) -> Result<IdxClient> {
    let config = match config {
        Some(path) => IdxConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => IdxConfig::from_env()
            .context("No config file given and OKTA_IDX_* environment variables are incomplete")?,
    };
    info!(issuer = %config.client.issuer, client_id = %config.client.client_id, "client configured");
    IdxClient::new(config).context("Failed to build HTTP client")
}

/// Sign in with username and password, then answer follow-up challenges
pub async fn execute_login(client: &IdxClient, username: &str) -> Result<()> {
    let password = prompt_secret("Password")?;
    let response = flows::authenticate(client, username, &password)
        .await
        .context("Sign-in failed")?;
    let response = follow_up(response).await?;
    finish(response)
}

/// Start a password reset and see it through
pub async fn execute_recover(client: &IdxClient, username: &str, authenticator: &str) -> Result<()> {
    let response = flows::recover_password(client, username, authenticator)
        .await
        .context("Password recovery failed")?;
    let response = follow_up(response).await?;
    finish(response)
}

/// Register a user with the given profile attributes
pub async fn execute_register(client: &IdxClient, profile: BTreeMap<String, String>) -> Result<()> {
    let response = flows::register(client, &profile)
        .await
        .context("Registration failed")?;
    let response = follow_up(response).await?;
    finish(response)
}

/// Keep answering the canned prompts until the flow leaves the canned path
async fn follow_up(mut response: AuthenticationResponse) -> Result<AuthenticationResponse> {
    loop {
        report_errors(&response.errors);
        debug!(status = %response.status, "flow stopped");

        response = match response.status {
            AuthenticationStatus::AwaitingAuthenticatorVerification
            | AuthenticationStatus::AwaitingAuthenticatorEnrollment
                if answerable(&response) =>
            {
                let code = prompt_secret("Code or password")?;
                flows::verify_authenticator(response.flow, &code).await?
            }
            AuthenticationStatus::PasswordExpired | AuthenticationStatus::AwaitingPasswordReset => {
                println!("A new password is required.");
                let password = prompt_secret("New password")?;
                flows::change_password(response.flow, &password).await?
            }
            AuthenticationStatus::AwaitingAuthenticatorEnrollment
            | AuthenticationStatus::AwaitingAuthenticatorSelection => {
                let options = response.authenticator_options();
                if options.is_empty() {
                    return Ok(response);
                }
                println!("Authenticators:");
                for (key, id) in &options {
                    println!("  {} ({})", key, id);
                }
                let can_skip = response
                    .flow
                    .document()
                    .map(|doc| doc.has(&RemediationName::Skip))
                    .unwrap_or(false);
                let choice = if can_skip {
                    prompt_line("Authenticator (blank to skip)")?
                } else {
                    prompt_line("Authenticator")?
                };
                match (choice.is_empty(), can_skip) {
                    (true, true) => flows::skip_enrollment(response.flow).await?,
                    (true, false) => return Ok(response),
                    (false, _) => flows::select_authenticator(response.flow, &choice).await?,
                }
            }
            _ => return Ok(response),
        };
    }
}

/// Whether the server takes a typed answer for the pending authenticator
fn answerable(response: &AuthenticationResponse) -> bool {
    response
        .flow
        .document()
        .map(|doc| {
            doc.has(&RemediationName::ChallengeAuthenticator)
                || doc.has(&RemediationName::EnrollAuthenticator)
        })
        .unwrap_or(false)
}

fn finish(response: AuthenticationResponse) -> Result<()> {
    match response.tokens {
        Some(tokens) => {
            print_tokens(&tokens)?;
            Ok(())
        }
        None if response.status == AuthenticationStatus::Terminated => {
            bail!("Flow ended without tokens")
        }
        None => {
            let names = response
                .flow
                .document()
                .map(|doc| doc.remediation_names())
                .unwrap_or_default();
            println!("Stopped at: {}", response.status);
            println!("Server offers: {}", names.join(", "));
            println!("Use `idx interact` for steps this command does not cover.");
            Ok(())
        }
    }
}

/// Generic step-by-step loop over whatever the server offers
pub async fn execute_interact(client: &IdxClient) -> Result<()> {
    let mut flow = client.start().await.context("Failed to start the flow")?;
    let cancel = CancelOnCtrlC::install(&flow);

    let mut outcome = current_outcome(&flow)?;
    loop {
        if outcome.terminal {
            break;
        }
        if cancel.requested() {
            outcome = flow.cancel().await.context("Cancel failed")?;
            continue;
        }

        render(&outcome);
        let choice = prompt_line("Step")?;
        if choice.is_empty() {
            continue;
        }

        let result = match choice.as_str() {
            "poll" => flow.poll().await,
            "cancel" => flow.cancel().await,
            _ => match pick_step(&outcome, &choice) {
                Some(step) => {
                    let input = collect_input(&step.fields)?;
                    flow.proceed(&step.name, &input).await
                }
                None => {
                    eprintln!("✗ No step '{}'", choice);
                    continue;
                }
            },
        };

        match result {
            Ok(next) => outcome = next,
            Err(e) if !e.is_terminal() => eprintln!("✗ {}", e),
            Err(e) => return Err(e).context("Flow terminated"),
        }
    }

    report_errors(&outcome.messages);
    match outcome.tokens {
        Some(tokens) => print_tokens(&tokens),
        None => bail!("Flow ended without tokens ({})", flow.state()),
    }
}

fn current_outcome(flow: &AuthFlow) -> Result<StepOutcome> {
    if let Some(outcome) = flow.outcome() {
        return Ok(outcome.clone());
    }
    flow.document()
        .map(StepOutcome::awaiting)
        .ok_or_else(|| anyhow!("Server returned no document"))
}

fn render(outcome: &StepOutcome) {
    report_errors(&outcome.messages);
    println!("\nStatus: {}", outcome.status);
    for (i, step) in outcome.remediations.iter().enumerate() {
        let required = if step.required_fields.is_empty() {
            String::new()
        } else {
            format!(" (needs {})", step.required_fields.join(", "))
        };
        println!("  [{}] {}{}", i + 1, step.name, required);
    }
    println!("  Also: poll, cancel");
}

/// Step by list number or by name
fn pick_step<'a>(outcome: &'a StepOutcome, choice: &str) -> Option<&'a NextStep> {
    match choice.parse::<usize>() {
        Ok(n) if n >= 1 => outcome.remediations.get(n - 1),
        _ => outcome.step(choice),
    }
}

/// Prompt for each field the user is expected to fill, in declared order
fn collect_input(fields: &[FieldSpec]) -> Result<FormValues> {
    let mut values = FormValues::new();
    for (name, value) in prompt_fields(fields, "")? {
        values.insert(name, value);
    }
    Ok(values)
}

fn prompt_fields(fields: &[FieldSpec], prefix: &str) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for field in fields.iter().filter(|f| f.visible && f.mutable) {
        let label = format!("{}{}", prefix, field.label.as_deref().unwrap_or(&field.name));
        if let Some(value) = prompt_field(field, &label)? {
            out.insert(field.name.clone(), value);
        }
    }
    Ok(out)
}

fn prompt_field(field: &FieldSpec, label: &str) -> Result<Option<Value>> {
    if let Some(options) = field.options.as_deref().filter(|o| !o.is_empty()) {
        return prompt_option(options, label, field.required);
    }
    if let Some(form) = field.form.as_deref() {
        let nested = prompt_fields(form, &format!("{} > ", label))?;
        return Ok((!nested.is_empty()).then_some(Value::Object(nested)));
    }

    let suffix = if field.required { "" } else { " (optional)" };
    let raw = if field.secret {
        prompt_secret(&format!("{}{}", label, suffix))?
            .expose_secret()
            .to_string()
    } else {
        prompt_line(&format!("{}{}", label, suffix))?
    };
    if raw.is_empty() {
        return Ok(None);
    }
    parse_value(field.kind, &raw).map(Some)
}

fn prompt_option(options: &[FieldOption], label: &str, required: bool) -> Result<Option<Value>> {
    println!("{}:", label);
    for (i, option) in options.iter().enumerate() {
        let text = option
            .label
            .clone()
            .unwrap_or_else(|| option.submission().to_string());
        println!("  [{}] {}", i + 1, text);
    }
    loop {
        let raw = prompt_line("Choice")?;
        if raw.is_empty() && !required {
            return Ok(None);
        }
        match raw.parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => return Ok(Some(options[n - 1].submission())),
            _ => eprintln!("✗ Pick 1-{}", options.len()),
        }
    }
}

/// Convert typed text to the field's declared kind
fn parse_value(kind: FieldKind, raw: &str) -> Result<Value> {
    match kind {
        FieldKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" => Ok(Value::Bool(true)),
            "n" | "no" | "false" => Ok(Value::Bool(false)),
            _ => bail!("'{}' is not yes/no", raw),
        },
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .with_context(|| format!("'{}' is not a number", raw)),
        FieldKind::Object | FieldKind::Array => {
            serde_json::from_str(raw).with_context(|| format!("'{}' is not valid JSON", raw))
        }
        FieldKind::String => Ok(Value::String(raw.to_string())),
    }
}

fn prompt_line(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("Failed to read input")?;
    Ok(line.trim().to_string())
}

fn prompt_secret(label: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(format!("{}: ", label)).context("Failed to read input")?;
    Ok(SecretString::from(value))
}

fn report_errors(errors: &[String]) {
    for error in errors {
        eprintln!("✗ {}", error);
    }
}

fn print_tokens(tokens: &TokenResponse) -> Result<()> {
    println!("✓ Signed in (token expires {})", tokens.expires_at().to_rfc3339());
    println!("{}", serde_json::to_string_pretty(tokens)?);
    Ok(())
}

/// First Ctrl-C cancels the flow, a second one quits
struct CancelOnCtrlC {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CancelOnCtrlC {
    fn install(flow: &AuthFlow) -> Self {
        let token = flow.cancellation_token();
        let watched = token.clone();
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            eprintln!("\nCancelling (Ctrl-C again to quit)");
            watched.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
        Self { token, task }
    }

    fn requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for CancelOnCtrlC {
    fn drop(&mut self) {
        self.task.abort();
    }
}
