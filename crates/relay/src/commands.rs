//! Operator commands
//!
//! A message in the operator room is a command when it starts with one of the
//! relay's addresses (full id, `@localpart`, bare localpart or display name),
//! optionally followed by `:` or `,`. Example: `@support: done`.

use deskrelay_shared::{MessageContent, RoomEvent, UserId};

use crate::error::{RelayError, RelayResult};
use crate::lifecycle::{CloseOutcome, CloseReason};
use crate::relay::Relay;

const HELP: &str = "Available commands: close (aliases: done, complete)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Close,
    Unknown(String),
}

impl Command {
    fn from_word(word: &str) -> Self {
        match word.to_lowercase().as_str() {
            "close" | "done" | "complete" => Command::Close,
            _ => Command::Unknown(word.to_string()),
        }
    }
}

/// Every prefix the relay answers to, longest first
pub fn addresses(user: &UserId, display_name: Option<&str>) -> Vec<String> {
    let mut addresses = vec![
        user.to_string(),
        format!("@{}", user.localpart()),
        user.localpart().to_string(),
    ];
    if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
        addresses.push(name.trim().to_string());
    }
    addresses.sort_by_key(|a| std::cmp::Reverse(a.len()));
    addresses.dedup();
    addresses
}

/// Parse a command addressed to the relay; `None` if the message is not addressed to it
pub fn parse(body: &str, addresses: &[String]) -> Option<Command> {
    let body = body.trim_start();
    let rest = addresses.iter().find_map(|address| {
        let head = body.get(..address.len())?;
        if !head.eq_ignore_ascii_case(address) {
            return None;
        }
        let rest = &body[address.len()..];
        let boundary = rest
            .chars()
            .next()
            .map_or(true, |c| c == ':' || c == ',' || c.is_whitespace());
        boundary.then_some(rest)
    })?;

    let rest = rest
        .strip_prefix(':')
        .or_else(|| rest.strip_prefix(','))
        .unwrap_or(rest);
    let word = rest.split_whitespace().next().unwrap_or_default();
    Some(Command::from_word(word))
}

impl Relay {
    /// Returns false when the message is not a command
    pub(crate) async fn try_command(&self, event: &RoomEvent, content: &MessageContent) -> RelayResult<bool> {
        let addresses = addresses(
            self.transport.user_id(),
            self.config.bot_display_name.as_deref(),
        );
        let Some(command) = parse(&content.body, &addresses) else {
            return Ok(false);
        };
        let ops = &self.config.operator_room;
        let thread = content.thread_root();

        match command {
            Command::Close => {
                let Some(thread) = thread else {
                    let notice = MessageContent::notice(
                        "Send this command inside the thread you want to close.",
                    )
                    .in_thread(&event.event_id, None);
                    self.send_notice(ops, notice).await;
                    return Ok(true);
                };
                let reason = CloseReason::Command {
                    operator: event.sender.clone(),
                };
                match self.close_thread(thread, reason).await {
                    Ok(CloseOutcome::Closed | CloseOutcome::Skipped) => {}
                    Err(RelayError::NotFound(_)) => {
                        let notice =
                            MessageContent::notice("This thread is not linked to an open conversation.")
                                .in_thread(thread, Some(&event.event_id));
                        self.send_notice(ops, notice).await;
                    }
                    Err(e) => {
                        tracing::error!(thread_id = %thread, error = %e, "Close command failed");
                        self.report_to_operators(Some(thread), "Closing failed", &e)
                            .await;
                    }
                }
            }
            Command::Unknown(word) => {
                tracing::debug!(command = %word, "Unknown operator command");
                let text = if word.is_empty() {
                    HELP.to_string()
                } else {
                    format!("Unknown command \"{word}\". {HELP}")
                };
                let mut notice = MessageContent::notice(text);
                if let Some(thread) = thread {
                    notice = notice.in_thread(thread, Some(&event.event_id));
                }
                self.send_notice(ops, notice).await;
            }
        }
        Ok(true)
    }
}
