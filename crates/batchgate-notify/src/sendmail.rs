use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};

use crate::config::NotifierConfig;
use crate::message::compose_message;
use crate::Notifier;

pub const DEFAULT_COMMAND: &str = "sendmail -t";

/// Pipes the composed message into a local MTA command (`command` key,
/// default `sendmail -t`).
#[derive(Clone, Debug, Default)]
pub struct SendmailNotifier;

impl Notifier for SendmailNotifier {
    fn deliver(&self, config: &NotifierConfig, body: &str) -> Result<()> {
        let message = compose_message(config, body)?;
        let command = config.get_str("command").unwrap_or(DEFAULT_COMMAND);
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| anyhow!("empty notifier command"))?;
        let args: Vec<&str> = parts.collect();

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {} {:?}", program, args))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).with_context(|| format!("write message to {}", program))?;
        }
        let out = child.wait_with_output()?;
        if !out.status.success() {
            return Err(anyhow!(
                "notifier command failed: {} {:?}\nstderr:{}",
                program,
                args,
                String::from_utf8_lossy(&out.stderr)
            ));
        }
        tracing::info!(program, "report delivered");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(command: &str) -> NotifierConfig {
        serde_json::from_value(json!({"sender": "a@x", "recipients": "b@x", "command": command})).unwrap()
    }

    #[test]
    fn delivers_through_command() {
        SendmailNotifier.deliver(&cfg("cat"), "report").unwrap();
    }

    #[test]
    fn failing_command_is_an_error() {
        assert!(SendmailNotifier.deliver(&cfg("false"), "report").is_err());
        assert!(SendmailNotifier.deliver(&cfg("/definitely/not/here"), "report").is_err());
    }
}
