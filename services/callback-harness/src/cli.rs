//! Command-line parsing
//!
//! ```text
//! implicit-callback [--config PATH] [--store PATH] [--location URL] [--metrics] <command>
//!
//!   login [START_PAGE]          print the login URL (popup mode waits for the response on stdin)
//!   renew RESOURCE              print a silent renewal URL, wait for the response on stdin
//!   acquire RESOURCE            print a redirect acquisition URL
//!   callback FRAGMENT [--nested] [--parent-state STATE]...
//!                               classify a response fragment; parent states are
//!                               renewals outstanding in the page that opened this frame
//!   nonce CANDIDATE             check a nonce claim against the bound replay nonce
//!   status                      show what the store holds
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Env var naming the session store file.
pub const STORE_PATH_ENV: &str = "IMPLICIT_AUTH_STORE";
pub const DEFAULT_STORE_FILE: &str = ".implicit-auth-session.json";
pub const DEFAULT_LOCATION: &str = "http://localhost/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { start_page: Option<String> },
    Renew { resource: String },
    Acquire { resource: String },
    Callback {
        fragment: String,
        nested: bool,
        parent_states: Vec<String>,
    },
    Nonce { candidate: String },
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<String>,
    pub store: Option<String>,
    pub location: String,
    pub print_metrics: bool,
    pub command: Command,
}

impl Cli {
    /// Parse arguments, excluding the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut config = None;
        let mut store = None;
        let mut location = None;
        let mut print_metrics = false;
        let mut positional = Vec::new();
        let mut nested = false;
        let mut parent_states = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => config = Some(flag_value(&mut iter, "--config")?),
                "--store" => store = Some(flag_value(&mut iter, "--store")?),
                "--location" => location = Some(flag_value(&mut iter, "--location")?),
                "--metrics" => print_metrics = true,
                "--nested" => nested = true,
                "--parent-state" => {
                    parent_states.push(flag_value(&mut iter, "--parent-state")?);
                }
                other if other.starts_with("--") => bail!("unknown flag: {other}"),
                other => positional.push(other.to_string()),
            }
        }

        let mut positional = positional.into_iter();
        let name = positional.next();
        if name.as_deref() != Some("callback") {
            if nested {
                bail!("--nested only applies to callback");
            }
            if !parent_states.is_empty() {
                bail!("--parent-state only applies to callback");
            }
        }

        let command = match name.as_deref() {
            Some("login") => Command::Login {
                start_page: positional.next(),
            },
            Some("renew") => Command::Renew {
                resource: positional.next().context("renew needs a RESOURCE")?,
            },
            Some("acquire") => Command::Acquire {
                resource: positional.next().context("acquire needs a RESOURCE")?,
            },
            Some("callback") => Command::Callback {
                fragment: positional.next().context("callback needs a FRAGMENT")?,
                nested,
                parent_states,
            },
            Some("nonce") => Command::Nonce {
                candidate: positional.next().context("nonce needs a CANDIDATE")?,
            },
            Some("status") => Command::Status,
            Some(other) => bail!("unknown command: {other}"),
            None => bail!("missing command (login, renew, acquire, callback, nonce, status)"),
        };

        if let Some(extra) = positional.next() {
            bail!("unexpected argument: {extra}");
        }

        Ok(Self {
            config,
            store,
            location: location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            print_metrics,
            command,
        })
    }

    /// Resolve the store path: CLI flag, then `IMPLICIT_AUTH_STORE`, then default.
    pub fn store_path(&self) -> PathBuf {
        if let Some(p) = &self.store {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var(STORE_PATH_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_STORE_FILE)
    }
}

fn flag_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String> {
    iter.next()
        .cloned()
        .with_context(|| format!("{flag} needs a value"))
}
