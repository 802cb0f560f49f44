use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use tokio::io::AsyncReadExt;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} {code}: {message}")]
    Server { status: u16, code: String, message: String },
    #[error("reading {path}: {message}")]
    Read { path: String, message: String },
    #[error("writing {path}: {message}")]
    Write { path: String, message: String },
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "portal", about = "IT Policy Portal API client")]
struct Cli {
    #[arg(long, env = "PORTAL_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the service is up.
    Ping,
    /// Admin flag, sync state and running activities.
    Status,
    Login(LoginArgs),
    Logout,
    Whoami,
    /// List policies, optionally filtered by name.
    List {
        #[arg(long, short)]
        query: Option<String>,
    },
    /// Select a policy and print its resolved content.
    Show {
        id: i64,
        /// Print only the Markdown body.
        #[arg(long)]
        raw: bool,
    },
    Add {
        name: String,
    },
    Rename {
        id: i64,
        name: String,
    },
    /// Replace a policy's content with a file (or - for stdin).
    Save {
        id: i64,
        #[arg(long, default_value = "-")]
        input: String,
    },
    /// Drop edited content so the bundled text shows again.
    Revert {
        id: i64,
    },
    Delete {
        id: i64,
    },
    Generate {
        id: i64,
    },
    Import(ImportArgs),
    Export(ExportArgs),
    Sync(SyncCommand),
    Settings(SettingsCommand),
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long, env = "PORTAL_ADMIN_USERNAME", default_value = "")]
    username: String,

    #[arg(long, env = "PORTAL_ADMIN_PASSWORD", default_value = "")]
    password: String,

    /// Use the `?page=admin` entry instead of credentials.
    #[arg(long)]
    query_flag: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    input: PathBuf,

    /// Treat the input as the legacy banner-delimited text format.
    #[arg(long)]
    text: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Export a single policy instead of the whole collection.
    #[arg(long)]
    id: Option<i64>,

    #[arg(long)]
    text: bool,

    /// Output file; stdout when omitted.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SyncCommand {
    #[command(subcommand)]
    command: SyncSubcommand,
}

#[derive(Subcommand, Debug)]
enum SyncSubcommand {
    Status,
    Connect { url: String },
    Refresh,
    Disconnect,
}

#[derive(Args, Debug)]
struct SettingsCommand {
    #[command(subcommand)]
    command: SettingsSubcommand,
}

#[derive(Subcommand, Debug)]
enum SettingsSubcommand {
    /// Show the LLM provider and model; the key is never printed.
    Llm,
    /// Replace the LLM API key at runtime.
    SetLlm {
        #[arg(long, env = "PORTAL_LLM_API_KEY", hide_env_values = true)]
        api_key: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext {
        base_url: cli.base_url.trim_end_matches('/').to_owned(),
        client: reqwest::Client::new(),
    };
    run(&ctx, cli.command).await
}

async fn run(ctx: &CliContext, command: Command) -> Result<(), CliError> {
    match command {
        Command::Ping => {
            send(ctx, Method::GET, "/healthz", Payload::None).await?;
            println!("ok");
            Ok(())
        }
        Command::Status => print_json(&api(ctx, Method::GET, "/api/status", None).await?),
        Command::Login(args) => run_login(ctx, args).await,
        Command::Logout => print_json(&api(ctx, Method::POST, "/api/auth/logout", None).await?),
        Command::Whoami => print_json(&api(ctx, Method::GET, "/api/auth/me", None).await?),
        Command::List { query } => {
            let path = match query {
                Some(q) => format!("/api/policies?q={}", encode_query(&q)),
                None => "/api/policies".to_owned(),
            };
            print_json(&api(ctx, Method::GET, &path, None).await?)
        }
        Command::Show { id, raw } => {
            let detail = api(ctx, Method::GET, &format!("/api/policies/{id}"), None).await?;
            if raw {
                let content = detail.get("content").and_then(Value::as_str).ok_or(CliError::MissingField("content"))?;
                println!("{content}");
                return Ok(());
            }
            print_json(&detail)
        }
        Command::Add { name } => {
            let body = serde_json::json!({ "name": name });
            print_json(&api(ctx, Method::POST, "/api/policies", Some(body)).await?)
        }
        Command::Rename { id, name } => {
            let body = serde_json::json!({ "name": name });
            print_json(&api(ctx, Method::PATCH, &format!("/api/policies/{id}"), Some(body)).await?)
        }
        Command::Save { id, input } => {
            let content = read_input(&input).await?;
            let body = serde_json::json!({ "content": content });
            print_json(&api(ctx, Method::PUT, &format!("/api/policies/{id}/content"), Some(body)).await?)
        }
        Command::Revert { id } => {
            print_json(&api(ctx, Method::DELETE, &format!("/api/policies/{id}/content"), None).await?)
        }
        Command::Delete { id } => print_json(&api(ctx, Method::DELETE, &format!("/api/policies/{id}"), None).await?),
        Command::Generate { id } => {
            print_json(&api(ctx, Method::POST, &format!("/api/policies/{id}/generate"), None).await?)
        }
        Command::Import(args) => run_import(ctx, args).await,
        Command::Export(args) => run_export(ctx, args).await,
        Command::Sync(sync) => run_sync(ctx, sync).await,
        Command::Settings(settings) => run_settings(ctx, settings).await,
    }
}

async fn run_login(ctx: &CliContext, args: LoginArgs) -> Result<(), CliError> {
    let json = if args.query_flag {
        api(ctx, Method::POST, "/api/auth/login?page=admin", None).await?
    } else {
        let body = serde_json::json!({ "username": args.username, "password": args.password });
        api(ctx, Method::POST, "/api/auth/login", Some(body)).await?
    };
    print_json(&json)
}

async fn run_import(ctx: &CliContext, args: ImportArgs) -> Result<(), CliError> {
    let body = tokio::fs::read_to_string(&args.input).await.map_err(|error| CliError::Read {
        path: args.input.display().to_string(),
        message: error.to_string(),
    })?;
    let (path, payload) = if args.text {
        ("/api/import.txt", Payload::Text(body))
    } else {
        ("/api/import.json", Payload::Json(serde_json::from_str(&body)?))
    };
    let response = send(ctx, Method::POST, path, payload).await?;
    print_json(&response.json::<Value>().await?)
}

async fn run_export(ctx: &CliContext, args: ExportArgs) -> Result<(), CliError> {
    let path = export_path(args.id, args.text);
    let body = send(ctx, Method::GET, &path, Payload::None).await?.text().await?;
    match args.output {
        Some(output) => {
            write_output(&output, &body).await?;
            eprintln!("wrote {}", output.display());
            Ok(())
        }
        None => {
            println!("{body}");
            Ok(())
        }
    }
}

async fn run_sync(ctx: &CliContext, sync: SyncCommand) -> Result<(), CliError> {
    let json = match sync.command {
        SyncSubcommand::Status => api(ctx, Method::GET, "/api/sync", None).await?,
        SyncSubcommand::Connect { url } => {
            api(ctx, Method::POST, "/api/sync", Some(serde_json::json!({ "url": url }))).await?
        }
        SyncSubcommand::Refresh => api(ctx, Method::POST, "/api/sync/refresh", None).await?,
        SyncSubcommand::Disconnect => api(ctx, Method::DELETE, "/api/sync", None).await?,
    };
    print_json(&json)
}

async fn run_settings(ctx: &CliContext, settings: SettingsCommand) -> Result<(), CliError> {
    let json = match settings.command {
        SettingsSubcommand::Llm => api(ctx, Method::GET, "/api/settings/llm", None).await?,
        SettingsSubcommand::SetLlm { api_key, provider, model } => {
            let body = serde_json::json!({ "api_key": api_key, "provider": provider, "model": model });
            api(ctx, Method::PUT, "/api/settings/llm", Some(body)).await?
        }
    };
    print_json(&json)
}

// =============================================================================
// HTTP
// =============================================================================

enum Payload {
    None,
    Json(Value),
    Text(String),
}

/// Send a request and turn non-2xx responses into [`CliError::Server`].
async fn send(ctx: &CliContext, method: Method, path: &str, payload: Payload) -> Result<reqwest::Response, CliError> {
    let url = format!("{}{}", ctx.base_url, path);
    let request = ctx.client.request(method, &url);
    let request = match payload {
        Payload::None => request,
        Payload::Json(json) => request.json(&json),
        Payload::Text(text) => request.header(reqwest::header::CONTENT_TYPE, "text/plain").body(text),
    };

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    Err(server_error(status.as_u16(), &body))
}

async fn api(ctx: &CliContext, method: Method, path: &str, body: Option<Value>) -> Result<Value, CliError> {
    let payload = body.map_or(Payload::None, Payload::Json);
    let response = send(ctx, method, path, payload).await?;
    Ok(response.json::<Value>().await?)
}

/// Build a [`CliError::Server`] from an error response body.
///
/// The service answers `{ "code", "message", "retryable" }`; anything else
/// is reported verbatim.
fn server_error(status: u16, body: &str) -> CliError {
    let parsed = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
    let field = |name: &str| parsed.get(name).and_then(Value::as_str).map(str::to_owned);
    match (field("code"), field("message")) {
        (Some(code), Some(message)) => CliError::Server { status, code, message },
        _ => CliError::Server { status, code: "E_HTTP".to_owned(), message: body.trim().to_owned() },
    }
}

fn export_path(id: Option<i64>, text: bool) -> String {
    let ext = if text { "txt" } else { "json" };
    match id {
        Some(id) => format!("/api/policies/{id}/export.{ext}"),
        None => format!("/api/export.{ext}"),
    }
}

fn encode_query(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

// =============================================================================
// IO
// =============================================================================

async fn read_input(input: &str) -> Result<String, CliError> {
    if input == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .map_err(|error| CliError::Read { path: "stdin".to_owned(), message: error.to_string() })?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(input)
        .await
        .map_err(|error| CliError::Read { path: input.to_owned(), message: error.to_string() })
}

async fn write_output(path: &Path, body: &str) -> Result<(), CliError> {
    tokio::fs::write(path, body)
        .await
        .map_err(|error| CliError::Write { path: path.display().to_string(), message: error.to_string() })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
