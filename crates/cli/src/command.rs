// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `carelink` subcommands.

use std::io::BufRead;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use carelink_session::claims::epoch_secs;
use carelink_session::{
    AuthSnapshot, AuthWatch, ChangeOrigin, Credentials, DecodedClaims, RequestBody,
    RequestOptions, Session, SessionEvent,
};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and store the token pair
    Login {
        /// Account email
        #[arg(long, env = "CARELINK_EMAIL")]
        email: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "CARELINK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign out and delete the stored tokens
    Logout,
    /// Show whether a session is stored and when its tokens expire
    Status {
        /// Print the decoded access token claims as JSON
        #[arg(long)]
        json: bool,
    },
    /// Issue an authenticated request and print the response body
    Request {
        /// HTTP method
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,

        /// Path relative to the API base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(long, short = 'd')]
        data: Option<String>,

        /// Extra header as "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },
    /// Follow session events, including logouts made by other processes
    Watch,
}

pub async fn run(command: Command, session: Session) -> anyhow::Result<i32> {
    match command {
        Command::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            session.login(&Credentials::new(email.as_str(), password)).await?;
            println!("Logged in as {email}");
            Ok(0)
        }

        Command::Logout => {
            session.logout()?;
            println!("Logged out");
            Ok(0)
        }

        Command::Status { json } => {
            let snapshot = session.auth_snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.claims)?);
            } else {
                print!("{}", format_status(&snapshot, epoch_secs()));
            }
            Ok(if snapshot.authenticated { 0 } else { 1 })
        }

        Command::Request { method, path, data, headers } => {
            let options = build_options(&method, data.as_deref(), &headers)?;
            let resp = session.request(&path, &options).await?;
            let status = resp.status();
            let body = resp.text().await.context("read response body")?;
            eprintln!("HTTP {status}");
            println!("{}", pretty_body(&body));
            Ok(0)
        }

        Command::Watch => watch(session).await,
    }
}

async fn watch(session: Session) -> anyhow::Result<i32> {
    let shutdown = CancellationToken::new();
    let mut handles = session.spawn_store_sync(shutdown.clone())?;
    let (mut auth, auth_handle) = AuthWatch::spawn(&session, shutdown.clone());
    handles.push(auth_handle);

    let mut events = session.subscribe();
    println!("{}", auth_line(&auth.current()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = auth.changed() => match snapshot {
                Some(snapshot) => println!("{}", auth_line(&snapshot)),
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => println!("{}", describe(&event)),
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    shutdown.cancel();
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
    Ok(0)
}

fn auth_line(snapshot: &AuthSnapshot) -> String {
    match (snapshot.authenticated, snapshot.claims.as_ref().and_then(|c| c.user_id.as_deref())) {
        (true, Some(user)) => format!("state: authenticated (user {user})"),
        (true, None) => "state: authenticated".to_owned(),
        (false, _) => "state: logged out".to_owned(),
    }
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).context("read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_owned();
    if password.is_empty() {
        anyhow::bail!("empty password");
    }
    Ok(password)
}

/// Assemble request options from command-line parts.
pub fn build_options(
    method: &str,
    data: Option<&str>,
    headers: &[String],
) -> anyhow::Result<RequestOptions> {
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method: {method}"))?;
    let mut options = RequestOptions::new(method);
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        options = options.header(name, value);
    }
    if let Some(data) = data {
        let value: serde_json::Value =
            serde_json::from_str(data).context("--data must be valid JSON")?;
        options = options.body(RequestBody::Json(value));
    }
    Ok(options)
}

/// Split a `Name: value` header argument.
pub fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) =
        raw.split_once(':').with_context(|| format!("header must be \"Name: value\": {raw}"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("header name is empty: {raw}");
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

/// Human-readable session summary.
pub fn format_status(snapshot: &AuthSnapshot, now: u64) -> String {
    let mut out = String::new();
    if !snapshot.authenticated {
        out.push_str("Not logged in\n");
        return out;
    }
    out.push_str("Logged in\n");
    if let Some(ref claims) = snapshot.claims {
        push_claims(&mut out, claims, now);
    }
    out
}

fn push_claims(out: &mut String, claims: &DecodedClaims, now: u64) {
    if let Some(ref user) = claims.user_id {
        out.push_str(&format!("  user:    {user}\n"));
    }
    if let Some(ref role) = claims.role {
        out.push_str(&format!("  role:    {role}\n"));
    }
    let expiry = match claims.expires_in(now) {
        Some(left) => format_expires(left.as_secs()),
        None => "expired (refreshed on next request)".to_owned(),
    };
    out.push_str(&format!("  access:  {expiry}\n"));
}

fn format_expires(secs: u64) -> String {
    let m = secs / 60;
    let rem = secs % 60;
    format!("{m}m {rem:02}s")
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::LoggedIn => "event: logged in".to_owned(),
        SessionEvent::Refreshed { origin: ChangeOrigin::Local } => {
            "event: access token refreshed".to_owned()
        }
        SessionEvent::Refreshed { origin: ChangeOrigin::External } => {
            "event: access token refreshed by another process".to_owned()
        }
        SessionEvent::LoggedOut { reason } => format!("event: logged out ({reason})"),
    }
}

fn pretty_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| body.to_owned())
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
