use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use client::form::{Encoding, FormConfig, FormEngine, FormError, FormTarget};
use client::session::{Navigator, Session, SessionError};
use client::store::{FileStore, StoreError};
use client::token::TokenStore;
use client::transport::{HttpTransport, TransportError};
use serde_json::{Map, Value};

const STATE_FILE: &str = "state.json";
const LOGOUT_NOTIFY_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("login failed; check the email and password")]
    LoginFailed,
    #[error("invalid field `{0}`; expected key=value")]
    InvalidField(String),
    #[error("submit needs --endpoint or --route")]
    MissingTarget,
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{}", .0.user_message())]
    Form(FormError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "p360", about = "Platform 360 session and proxy CLI")]
struct Cli {
    #[arg(long, env = "P360_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Directory holding the saved token and cookie.
    #[arg(long, env = "P360_STATE_DIR", default_value = ".p360")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Keep the session across runs.
        #[arg(long, default_value_t = false)]
        remember: bool,
    },
    Logout,
    Whoami,
    Status,
    Submit {
        /// Upstream endpoint reached through the proxy, e.g. /api/chats
        #[arg(long, required_unless_present = "route", conflicts_with = "route")]
        endpoint: Option<String>,
        /// Dedicated server route, sent as-is; required for multipart bodies.
        #[arg(long)]
        route: Option<String>,
        /// Field as key=value; values that parse as JSON are sent as JSON.
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
        #[arg(long, value_enum, default_value_t = BodyEncoding::Json)]
        encoding: BodyEncoding,
        #[arg(long, default_value = "POST")]
        method: String,
    },
    Ping,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum BodyEncoding {
    Json,
    Urlencoded,
    Multipart,
}

impl From<BodyEncoding> for Encoding {
    fn from(value: BodyEncoding) -> Self {
        match value {
            BodyEncoding::Json => Self::Json,
            BodyEncoding::Urlencoded => Self::UrlEncoded,
            BodyEncoding::Multipart => Self::Multipart,
        }
    }
}

/// Reports navigation targets on stderr.
struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn navigate(&self, path: &str) {
        eprintln!("-> {path}");
    }
}

struct CliContext {
    base_url: String,
    tokens: Arc<TokenStore>,
    transport: Arc<HttpTransport>,
    session: Session,
}

impl CliContext {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let storage = Arc::new(FileStore::open(cli.state_dir.join(STATE_FILE))?);
        let tokens = Arc::new(TokenStore::new(storage));
        let transport = Arc::new(HttpTransport::new(&cli.base_url, Arc::clone(&tokens))?);
        let session = Session::new(Arc::clone(&tokens), transport.clone(), Arc::new(PrintNavigator));
        Ok(Self { base_url: cli.base_url.trim_end_matches('/').to_owned(), tokens, transport, session })
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let ctx = CliContext::open(&cli)?;

    match cli.command {
        Command::Login { email, password, remember } => run_login(&ctx, &email, &password, remember).await,
        Command::Logout => run_logout(&ctx).await,
        Command::Whoami => run_whoami(&ctx).await,
        Command::Status => run_status(&ctx),
        Command::Submit { endpoint, route, fields, encoding, method } => {
            let target = match (endpoint, route) {
                (_, Some(path)) => FormTarget::Route(path),
                (Some(endpoint), None) => FormTarget::Proxy(endpoint),
                (None, None) => return Err(CliError::MissingTarget),
            };
            run_submit(&ctx, target, &fields, encoding, &method).await
        }
        Command::Ping => run_ping(&ctx).await,
    }
}

async fn run_login(ctx: &CliContext, email: &str, password: &str, remember: bool) -> Result<(), CliError> {
    if !ctx.session.login(email, password, remember).await {
        return Err(CliError::LoginFailed);
    }
    if !remember {
        eprintln!("session not remembered; it ends when this command exits");
    }
    println!("logged in as {email}");
    Ok(())
}

async fn run_logout(ctx: &CliContext) -> Result<(), CliError> {
    if let Some(notify) = ctx.session.logout() {
        // Give the detached notify a chance before the runtime shuts down.
        if tokio::time::timeout(LOGOUT_NOTIFY_WAIT, notify).await.is_err() {
            tracing::warn!("logout notify still pending; exiting anyway");
        }
    }
    println!("logged out");
    Ok(())
}

async fn run_whoami(ctx: &CliContext) -> Result<(), CliError> {
    let profile = ctx.session.refresh_user().await?;
    print_json(&serde_json::to_value(profile)?)
}

fn run_status(ctx: &CliContext) -> Result<(), CliError> {
    let status = serde_json::json!({
        "authenticated": ctx.session.is_authenticated(),
        "stored_token": ctx.tokens.get().is_some(),
        "cookie": ctx.tokens.cookie_token().is_some(),
    });
    print_json(&status)
}

async fn run_submit(
    ctx: &CliContext,
    target: FormTarget,
    fields: &[String],
    encoding: BodyEncoding,
    method: &str,
) -> Result<(), CliError> {
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| CliError::InvalidMethod(method.to_owned()))?;
    let config = FormConfig { target, method, encoding: encoding.into(), min_latency: Duration::ZERO, reset_on_success: false };
    let form = FormEngine::new(config, ctx.transport.clone());
    for (name, value) in parse_fields(fields)? {
        form.set(name, value);
    }

    let body = form.submit().await.map_err(CliError::Form)?;
    print_json(&body)
}

async fn run_ping(ctx: &CliContext) -> Result<(), CliError> {
    let url = format!("{}/healthz", ctx.base_url);
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

/// Parse `key=value` arguments; values that are valid JSON keep their type.
fn parse_fields(fields: &[String]) -> Result<Map<String, Value>, CliError> {
    fields
        .iter()
        .map(|field| {
            let (name, raw) = field
                .split_once('=')
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| CliError::InvalidField(field.clone()))?;
            let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
            Ok((name.to_owned(), value))
        })
        .collect()
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
