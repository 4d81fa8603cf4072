//! Line-oriented command loop.
//!
//! Each input line is echoed as `c> ...`; everything the engine reports is
//! printed by [`StdoutSink`] as `s> ...`.

use anyhow::{Context, Result};
use msgr_client::{ClientSession, MessengerClient, UiSink};
use msgr_core::Identity;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// Prints engine lines to stdout with the server prefix.
pub struct StdoutSink;

impl UiSink for StdoutSink {
    fn print(&self, line: &str) {
        println!("s> {line}");
    }
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Register {
        alias: String,
        date_of_birth: String,
        username: String,
    },
    Unregister,
    Connect,
    Disconnect,
    Send {
        recipient: String,
        text: String,
    },
    SendAttach {
        recipient: String,
        file: PathBuf,
        text: String,
    },
    ConnectedUsers,
    Quit,
}

/// Split off the first whitespace-delimited word; the rest keeps its spacing.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], &input[end..])),
        None => Some((input, "")),
    }
}

/// Strip the single separator after a word, keeping any further spacing.
fn message_text(rest: &str) -> String {
    rest.strip_prefix(|c: char| c.is_whitespace())
        .unwrap_or(rest)
        .to_string()
}

impl UserCommand {
    /// Parse a line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let Some((verb, rest)) = next_word(line) else {
            return Ok(None);
        };
        let command = match verb.to_ascii_uppercase().as_str() {
            "REGISTER" => {
                let (alias, rest) = next_word(rest).ok_or("Syntax error. Usage: REGISTER <alias> <date> <full name>")?;
                let (date, rest) = next_word(rest).ok_or("Syntax error. Usage: REGISTER <alias> <date> <full name>")?;
                let username = rest.trim();
                if username.is_empty() {
                    return Err("Syntax error. Usage: REGISTER <alias> <date> <full name>".into());
                }
                UserCommand::Register {
                    alias: alias.to_string(),
                    date_of_birth: date.to_string(),
                    username: username.to_string(),
                }
            }
            "UNREGISTER" => UserCommand::Unregister,
            "CONNECT" => UserCommand::Connect,
            "DISCONNECT" => UserCommand::Disconnect,
            "SEND" => {
                let (recipient, rest) =
                    next_word(rest).ok_or("Syntax error. Usage: SEND <alias> <message>")?;
                UserCommand::Send {
                    recipient: recipient.to_string(),
                    text: message_text(rest),
                }
            }
            "SENDATTACH" => {
                let usage = "Syntax error. Usage: SENDATTACH <alias> <file> <message>";
                let (recipient, rest) = next_word(rest).ok_or(usage)?;
                let (file, rest) = next_word(rest).ok_or(usage)?;
                UserCommand::SendAttach {
                    recipient: recipient.to_string(),
                    file: PathBuf::from(file),
                    text: message_text(rest),
                }
            }
            "CONNECTEDUSERS" => UserCommand::ConnectedUsers,
            "QUIT" => UserCommand::Quit,
            other => return Err(format!("Error: command {other} not valid.")),
        };
        Ok(Some(command))
    }
}

/// Read commands from `input` until QUIT or end of input.
///
/// A connected session is disconnected before returning.
pub async fn run<R: AsyncBufRead + Unpin>(
    client: &MessengerClient,
    session: &mut ClientSession,
    input: R,
) -> Result<()> {
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        if line.trim().is_empty() {
            continue;
        }
        println!("c> {line}");
        let command = match UserCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("c> {usage}");
                continue;
            }
        };
        debug!(?command, "user command");
        if command == UserCommand::Quit {
            break;
        }
        execute(client, session, command).await;
    }

    if session.is_connected() {
        let _ = client.disconnect(session).await;
    }
    Ok(())
}

/// Outcomes are reported through the client's sink, so results are dropped here.
async fn execute(client: &MessengerClient, session: &mut ClientSession, command: UserCommand) {
    match command {
        UserCommand::Register {
            alias,
            date_of_birth,
            username,
        } => match Identity::new(username, alias, date_of_birth) {
            Ok(identity) => {
                let _ = client.register(session, identity).await;
            }
            Err(e) => println!("c> Invalid identity: {e}"),
        },
        UserCommand::Unregister => {
            let _ = client.unregister(session).await;
        }
        UserCommand::Connect => {
            let _ = client.connect(session).await;
        }
        UserCommand::Disconnect => {
            let _ = client.disconnect(session).await;
        }
        UserCommand::Send { recipient, text } => {
            let _ = client.send(session, &recipient, &text).await;
        }
        UserCommand::SendAttach {
            recipient,
            file,
            text,
        } => {
            let _ = client.send_attach(session, &recipient, &text, &file).await;
        }
        UserCommand::ConnectedUsers => {
            let _ = client.connected_users(session).await;
        }
        UserCommand::Quit => {}
    }
}
