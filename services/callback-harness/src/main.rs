//! Implicit-flow callback harness
//!
//! Drives an `AuthenticationContext` from the command line:
//! 1. Loads the client configuration and opens a file-backed session store
//! 2. Starts a login or token request and prints the URL to load
//! 3. Classifies the response fragment the authority redirected back with
//!
//! The session file plays the part of browser session storage, so a redirect
//! started by one invocation can be completed by the next.

mod cli;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use implicit_auth::{
    AuthConfig, AuthenticationContext, ContextRegistry, CorrelationToken, FileStore, NestedFrame,
    RenewalReceiver, TokenReply, TopLevelFrame, spawn_renewal_timeout,
};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse(&args)?;

    let prometheus = metrics::install_recorder()?;

    let config_path = AuthConfig::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = AuthConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let store_path = cli.store_path();
    let store = FileStore::load(store_path.clone())
        .with_context(|| format!("failed to open session store {}", store_path.display()))?;
    info!(path = %store.path().display(), "session store opened");

    let contexts = ContextRegistry::new();
    let context = contexts
        .get_or_init(config, &cli.location, Arc::new(store))
        .context("failed to create authentication context")?;

    info!(client_id = %context.config().client_id, "authentication context ready");

    let report = run(&context, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if cli.print_metrics {
        eprintln!("{}", prometheus.render());
    }
    Ok(())
}

/// Execute one command and return the JSON report to print.
async fn run(context: &Arc<AuthenticationContext>, command: Command) -> Result<serde_json::Value> {
    match command {
        Command::Login { start_page } => {
            let start_page = start_page.unwrap_or_else(|| context.config().redirect_uri().into());
            let request = context.login(&start_page)?;
            announce(&request.url);

            let Some(completion) = request.completion else {
                return Ok(json!({ "url": request.url, "state": request.token }));
            };
            let reply = await_with_timeout(context, completion).await?;
            Ok(json!({ "state": request.token, "reply": reply }))
        }
        Command::Renew { resource } => {
            let renewal = context.acquire_token_silent(&resource)?;
            announce(&renewal.url);

            let reply = await_with_timeout(context, renewal.completion).await?;
            Ok(json!({ "resource": resource, "state": renewal.token, "reply": reply }))
        }
        Command::Acquire { resource } => {
            let (url, token) = context.acquire_token_redirect(&resource)?;
            Ok(json!({ "url": url, "state": token }))
        }
        Command::Callback {
            fragment,
            nested,
            parent_states,
        } => callback_report(context, &fragment, nested, &parent_states),
        Command::Nonce { candidate } => Ok(json!({
            "bound": context.expected_nonce().is_some(),
            "matches": context.nonce_matches(&candidate),
        })),
        Command::Status => {
            let error = context.stored_error()?.map(|e| {
                json!({ "error": e.error, "error_description": e.error_description })
            });
            Ok(json!({
                "client_id": context.config().client_id,
                "login_start_page": context.login_start_page()?,
                "replay_nonce_bound": context.expected_nonce().is_some(),
                "error": error,
            }))
        }
    }
}

/// Classify a fragment delivered to this page and describe the outcome.
///
/// `parent_states` are the renewal states outstanding in the page that issued
/// the request, for responses landing in a different process than the one
/// that started them.
fn callback_report(
    context: &AuthenticationContext,
    fragment: &str,
    nested: bool,
    parent_states: &[String],
) -> Result<serde_json::Value> {
    let states: Vec<CorrelationToken> = parent_states
        .iter()
        .map(|state| CorrelationToken::from_value(state.as_str()))
        .collect();
    let envelope = if nested {
        context.handle_response(fragment, &NestedFrame::new(states))
    } else {
        context.handle_response(fragment, &TopLevelFrame::with_states(states))
    };

    if !envelope.is_auth_response() {
        warn!("fragment carries no auth response parameters");
    }

    Ok(json!({
        "envelope": envelope,
        "reply": envelope.matched_token().then(|| envelope.token_reply()),
        "login_start_page": context.login_start_page()?,
    }))
}

fn announce(url: &str) {
    eprintln!("open this URL, then paste the fragment it redirects to:");
    eprintln!("{url}");
}

/// Wait for a popup or hidden-frame response typed on stdin, bounded by the
/// frame load timeout.
async fn await_with_timeout(
    context: &Arc<AuthenticationContext>,
    completion: RenewalReceiver,
) -> Result<TokenReply> {
    let timeout = spawn_renewal_timeout(
        context.clone(),
        completion.token().clone(),
        context.config().load_frame_timeout(),
    );
    let reply = await_response(context, completion, BufReader::new(tokio::io::stdin())).await;
    timeout.abort();
    reply
}

/// Feed input lines to the context until `completion` settles.
///
/// Lines whose state matches nothing are dropped and the wait continues. Input
/// ending before a match expires the request and fails; so do the timeout and
/// Ctrl-C.
async fn await_response<R>(
    context: &Arc<AuthenticationContext>,
    completion: RenewalReceiver,
    input: R,
) -> Result<TokenReply>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let token = completion.token().clone();
    let mut reader = {
        let context = context.clone();
        tokio::spawn(async move {
            let mut lines = input.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let envelope = context.handle_response(line.trim(), &TopLevelFrame::new());
                if envelope.matched_token() {
                    return true;
                }
            }
            false
        })
    };

    let wait = completion.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        matched = &mut reader => {
            if !matches!(matched, Ok(true)) {
                context.expire_renewal(&token);
                bail!("input closed before a matching response arrived");
            }
            wait.await
        }
        _ = tokio::signal::ctrl_c() => {
            reader.abort();
            context.expire_renewal(&token);
            bail!("interrupted");
        }
    };
    reader.abort();
    Ok(outcome?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use implicit_auth::MemoryStore;

    fn context() -> Arc<AuthenticationContext> {
        Arc::new(
            AuthenticationContext::new(
                AuthConfig::new("app-123"),
                "https://app.example.com/home",
                Arc::new(MemoryStore::new()),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn redirect_login_then_callback_in_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let first = Arc::new(
            AuthenticationContext::new(
                AuthConfig::new("app-123"),
                "https://app.example.com/home",
                Arc::new(FileStore::load(path.clone()).unwrap()),
            )
            .unwrap(),
        );
        let report = run(
            &first,
            Command::Login {
                start_page: Some("https://app.example.com/orders".into()),
            },
        )
        .await
        .unwrap();
        let state = report["state"].as_str().unwrap().to_string();
        assert!(report["url"].as_str().unwrap().contains(&state));

        let second = AuthenticationContext::new(
            AuthConfig::new("app-123"),
            "https://app.example.com/home",
            Arc::new(FileStore::load(path).unwrap()),
        )
        .unwrap();
        let report =
            callback_report(&second, &format!("#id_token=idt&state={state}"), false, &[]).unwrap();

        assert_eq!(report["envelope"]["request_kind"], "login");
        assert_eq!(report["envelope"]["matched_token"], true);
        assert_eq!(report["reply"]["token"], "idt");
        assert_eq!(report["login_start_page"], "https://app.example.com/orders");
    }

    #[tokio::test]
    async fn acquire_reports_url_and_state() {
        let ctx = context();
        let report = run(
            &ctx,
            Command::Acquire {
                resource: "https://graph.example".into(),
            },
        )
        .await
        .unwrap();
        let url = report["url"].as_str().unwrap();
        assert!(url.contains("response_type=token"));
        assert!(url.contains(report["state"].as_str().unwrap()));
    }

    #[test]
    fn unknown_state_reports_no_reply() {
        let ctx = context();
        let report = callback_report(&ctx, "#access_token=x&state=bogus", true, &[]).unwrap();
        assert_eq!(report["envelope"]["matched_token"], false);
        assert!(report["reply"].is_null());
    }

    #[tokio::test]
    async fn status_reports_persisted_error() {
        let ctx = context();
        let request = ctx.login("/home").unwrap();
        callback_report(
            &ctx,
            &format!("#error=access_denied&error_description=denied&state={}", request.token),
            false,
            &[],
        )
        .unwrap();

        let report = run(&ctx, Command::Status).await.unwrap();
        assert_eq!(report["error"]["error"], "access_denied");
        assert_eq!(report["login_start_page"], "/home");
    }

    fn popup_context() -> Arc<AuthenticationContext> {
        let mut config = AuthConfig::new("app-123");
        config.popup = true;
        Arc::new(
            AuthenticationContext::new(
                config,
                "https://app.example.com/home",
                Arc::new(MemoryStore::new()),
            )
            .unwrap(),
        )
    }

    fn input(text: String) -> BufReader<std::io::Cursor<Vec<u8>>> {
        BufReader::new(std::io::Cursor::new(text.into_bytes()))
    }

    #[tokio::test]
    async fn popup_login_completes_from_input_line() {
        let ctx = popup_context();
        let request = ctx.login("/home").unwrap();
        let lines = format!("#id_token=idt&state=other\n#id_token=idt&state={}\n", request.token);

        let reply = await_response(&ctx, request.completion.unwrap(), input(lines))
            .await
            .unwrap();
        assert_eq!(reply.token.as_deref(), Some("idt"));
        assert!(!ctx.login_in_flight());
    }

    #[tokio::test]
    async fn closed_input_fails_instead_of_hanging() {
        let ctx = popup_context();
        let request = ctx.login("/home").unwrap();

        let outcome = await_response(&ctx, request.completion.unwrap(), input(String::new())).await;
        assert!(outcome.is_err());
        assert!(!ctx.login_in_flight(), "login slot must be released");
        assert_eq!(ctx.pending_completions(), 0);
    }

    #[tokio::test]
    async fn unmatched_input_then_eof_fails() {
        let ctx = context();
        let renewal = ctx.acquire_token_silent("https://graph.example").unwrap();
        let lines = "#access_token=x&state=bogus\nnot a fragment\n".to_string();

        let outcome = await_response(&ctx, renewal.completion, input(lines)).await;
        assert!(outcome.is_err());
        assert!(!ctx.renewal_in_flight("https://graph.example"));
    }

    #[test]
    fn parent_states_let_nested_callback_match() {
        let ctx = context();
        let report = callback_report(
            &ctx,
            "#access_token=at&state=issued-elsewhere",
            true,
            &["issued-elsewhere".into()],
        )
        .unwrap();
        assert_eq!(report["envelope"]["matched_token"], true);
        assert_eq!(report["envelope"]["request_kind"], "renew_token");
        assert_eq!(report["reply"]["token"], "at");

        let top = callback_report(&ctx, "#access_token=at&state=s9", false, &["s9".into()]).unwrap();
        assert_eq!(top["envelope"]["matched_token"], true);
    }

    #[tokio::test]
    async fn nonce_command_checks_bound_nonce() {
        let ctx = context();
        let report = run(&ctx, Command::Nonce { candidate: "x".into() }).await.unwrap();
        assert_eq!(report["bound"], false);

        ctx.login("/home").unwrap();
        let nonce = ctx.expected_nonce().unwrap();
        let report = run(
            &ctx,
            Command::Nonce {
                candidate: nonce.expose().to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(report["bound"], true);
        assert_eq!(report["matches"], true);
    }
}
