//! Credential lookup for the login host: .netrc, then environment, then an interactive prompt
use crate::error::{Result, SyncError};
use crate::session::Credentials;
use dialoguer::{Input, Password};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const USERNAME_VAR: &str = "EARTHDATA_USERNAME";
pub const PASSWORD_VAR: &str = "EARTHDATA_PASSWORD";
pub const TOKEN_VAR: &str = "EARTHDATA_TOKEN";

pub fn default_netrc() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".netrc"))
}

/// Resolve credentials for `host`. `token` wins outright; a .netrc entry for the
/// host comes next; otherwise the username (argument or environment) and the
/// password (environment or prompt) are combined.
pub fn resolve(
    host: &str,
    token: Option<String>,
    netrc: Option<&Path>,
    username: Option<String>,
) -> Result<Credentials> {
    if let Some(token) = token {
        return Ok(Credentials::Bearer(token));
    }

    if let Some(path) = netrc {
        if let Some((login, password)) = read_netrc(path, host) {
            debug!(path = %path.display(), "Using .netrc credentials");
            return Ok(Credentials::Basic {
                username: login,
                password,
            });
        }
    }

    let username = match username.or_else(|| std::env::var(USERNAME_VAR).ok()) {
        Some(username) => username,
        None => Input::<String>::new()
            .with_prompt(format!("Username for {host}"))
            .interact_text()
            .map_err(|e| SyncError::Configuration(format!("Unable to read username: {e}")))?,
    };

    let password = match std::env::var(PASSWORD_VAR) {
        Ok(password) => password,
        Err(_) => Password::new()
            .with_prompt(format!("Password for {username}@{host}"))
            .interact()
            .map_err(|e| SyncError::Configuration(format!("Unable to read password: {e}")))?,
    };

    Ok(Credentials::Basic { username, password })
}

fn read_netrc(path: &Path, host: &str) -> Option<(String, String)> {
    let content = fs::read_to_string(path).ok()?;
    parse_netrc(&content, host)
}

#[derive(Default)]
struct NetrcEntry {
    machine: Option<String>,
    login: Option<String>,
    password: Option<String>,
}

/// Returns the (login, password) pair for `host`, falling back to a `default` entry.
fn parse_netrc(content: &str, host: &str) -> Option<(String, String)> {
    let mut entries: Vec<NetrcEntry> = vec![];
    let mut tokens = content.split_whitespace();

    while let Some(token) = tokens.next() {
        match token {
            "machine" => entries.push(NetrcEntry {
                machine: Some(tokens.next()?.to_string()),
                ..Default::default()
            }),
            "default" => entries.push(NetrcEntry::default()),
            "login" => {
                let value = tokens.next()?.to_string();
                if let Some(entry) = entries.last_mut() {
                    entry.login = Some(value);
                }
            }
            "password" => {
                let value = tokens.next()?.to_string();
                if let Some(entry) = entries.last_mut() {
                    entry.password = Some(value);
                }
            }
            "account" | "macdef" => {
                tokens.next();
            }
            _ => {}
        }
    }

    let entry = entries
        .iter()
        .find(|e| e.machine.as_deref() == Some(host))
        .or_else(|| entries.iter().find(|e| e.machine.is_none()))?;
    Some((entry.login.clone()?, entry.password.clone()?))
}
