//! ledgerchat-cli — terminal frontend for the Ledgerchat server
//!
//! # Subcommands
//! - `chat <session> <message>`       — send one turn, print the streamed reply
//! - `upload <session> <file>`        — upload an expense document into a session
//! - `history <session> [-n <limit>]` — show the stored conversation
//! - `status`                         — show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "ledgerchat-cli",
    version,
    about = "Ledgerchat — conversational expense-document assistant CLI"
)]
struct Cli {
    /// Ledgerchat HTTP server URL (overrides LEDGERCHAT_URL env var)
    #[arg(long, env = "LEDGERCHAT_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one chat message and stream the assistant reply
    Chat {
        /// Session identifier (any stable string)
        session: String,

        /// The message to send
        message: String,
    },

    /// Upload an expense document (PDF or text) into a session
    Upload {
        /// Session identifier
        session: String,

        /// Path to the document
        file: PathBuf,
    },

    /// Show the stored conversation for a session
    History {
        /// Session identifier
        session: String,

        /// Maximum number of messages to show
        #[arg(short = 'n', long)]
        limit: Option<i64>,
    },

    /// Show Ledgerchat server status
    Status,
}

// ============================================================================
// Server event wire format
// ============================================================================

/// One SSE `data:` payload from POST /chat. The server sends flat JSON
/// objects; which fields are present decides the event kind.
#[derive(Debug, Deserialize)]
struct ServerEvent {
    delta: Option<String>,
    done: Option<bool>,
    error: Option<String>,
    partial_saved: Option<bool>,
}

enum ChatEvent {
    Delta(String),
    Done,
    Error { message: String, partial_saved: bool },
}

/// Parse one line of the SSE stream into a chat event, if it carries one.
fn parse_sse_line(line: &str) -> Option<ChatEvent> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    let event: ServerEvent = serde_json::from_str(data).ok()?;

    if let Some(message) = event.error {
        return Some(ChatEvent::Error {
            message,
            partial_saved: event.partial_saved.unwrap_or(false),
        });
    }
    if event.done == Some(true) {
        return Some(ChatEvent::Done);
    }
    event.delta.map(ChatEvent::Delta)
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// Send one chat turn and print the reply token stream as it arrives.
fn do_chat(server: &str, session: &str, message: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        // streaming replies can be slow; no overall deadline
        .timeout(None)
        .build()?;

    let url = format!("{}/chat", server);
    let body = serde_json::json!({
        "session_id": session,
        "message": message,
    });

    let resp = match client.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ledgerchat-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("ledgerchat-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let reader = BufReader::new(resp);
    let mut stdout = std::io::stdout();
    for line in reader.lines() {
        let line = line?;
        match parse_sse_line(&line) {
            Some(ChatEvent::Delta(delta)) => {
                print!("{}", delta);
                stdout.flush()?;
            }
            Some(ChatEvent::Done) => {
                println!();
                return Ok(());
            }
            Some(ChatEvent::Error {
                message,
                partial_saved,
            }) => {
                println!();
                eprintln!("ledgerchat-cli: {}", message);
                if partial_saved {
                    eprintln!("ledgerchat-cli: the partial reply above was saved to the conversation");
                }
                std::process::exit(1);
            }
            None => {}
        }
    }

    // stream ended without a terminal event
    println!();
    eprintln!("ledgerchat-cli: connection closed before the reply finished");
    std::process::exit(1);
}

/// Upload a document into a session.
fn do_upload(server: &str, session: &str, file: &PathBuf) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;

    let url = format!("{}/upload", server);
    let form = reqwest::blocking::multipart::Form::new()
        .text("session_id", session.to_string())
        .file("file", file)?;

    let resp = match client.post(&url).multipart(form).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ledgerchat-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();

    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("upload failed");
        eprintln!("ledgerchat-cli: {}", message);
        std::process::exit(1);
    }

    println!(
        "Uploaded {} ({} characters extracted) into session {}",
        body["filename"].as_str().unwrap_or("?"),
        body["characters"].as_u64().unwrap_or(0),
        session
    );
    Ok(())
}

/// Print the stored conversation for a session.
fn do_history(server: &str, session: &str, limit: Option<i64>) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let mut url = format!("{}/history/{}", server, session);
    if let Some(n) = limit {
        url = format!("{}?limit={}", url, n);
    }

    let resp = match client.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ledgerchat-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        eprintln!("ledgerchat-cli: no conversation for session {}", session);
        std::process::exit(1);
    }
    if !resp.status().is_success() {
        let status = resp.status();
        eprintln!("ledgerchat-cli: server returned {}", status);
        std::process::exit(1);
    }

    let body: serde_json::Value = resp.json()?;
    for message in body["messages"].as_array().unwrap_or(&Vec::new()) {
        let role = message["role"].as_str().unwrap_or("?");
        let attachment = if message["has_attachment"].as_bool().unwrap_or(false) {
            " [attachment]"
        } else {
            ""
        };
        println!(
            "[{}]{} {}",
            role,
            attachment,
            message["content"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Ledgerchat server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:           {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:        {}", body["postgresql"].as_str().unwrap_or("?"));
            println!("Model:             {}", body["model"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("ledgerchat-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("ledgerchat-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat { session, message } => do_chat(&server, &session, &message),
        Commands::Upload { session, file } => do_upload(&server, &session, &file),
        Commands::History { session, limit } => do_history(&server, &session, limit),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("ledgerchat-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_events() {
        let event = parse_sse_line(r#"data: {"delta":"Hel"}"#);
        match event {
            Some(ChatEvent::Delta(d)) => assert_eq!(d, "Hel"),
            _ => panic!("expected delta event"),
        }
    }

    #[test]
    fn parses_done_events() {
        let line = r#"data: {"done":true,"conversation_id":"7b5c24ab-1234-5678-9abc-def012345678","message_id":12}"#;
        assert!(matches!(parse_sse_line(line), Some(ChatEvent::Done)));
    }

    #[test]
    fn parses_error_events_with_partial_flag() {
        let line = r#"data: {"error":"The language model service is temporarily unavailable. Please try again later.","partial_saved":true}"#;
        match parse_sse_line(line) {
            Some(ChatEvent::Error {
                message,
                partial_saved,
            }) => {
                assert!(message.contains("temporarily unavailable"));
                assert!(partial_saved);
            }
            _ => panic!("expected error event"),
        }
    }

    #[test]
    fn ignores_blank_and_non_data_lines() {
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("event: message").is_none());
        assert!(parse_sse_line("data:").is_none());
    }

    #[test]
    fn ignores_unparseable_payloads() {
        assert!(parse_sse_line("data: not json").is_none());
        assert!(parse_sse_line(r#"data: {"unrelated":1}"#).is_none());
    }
}
