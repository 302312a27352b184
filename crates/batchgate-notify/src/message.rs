use anyhow::{anyhow, Result};

use crate::config::NotifierConfig;

/// Minimal RFC 5322 style message carrying the report as a plain-text body.
pub fn compose_message(config: &NotifierConfig, body: &str) -> Result<String> {
    let sender = config.sender().ok_or_else(|| anyhow!("notifier config has no sender"))?;
    let recipients = config.recipients();
    if recipients.is_empty() {
        return Err(anyhow!("notifier config has no recipients"));
    }

    let mut s = String::new();
    s.push_str(&format!("From: {}\n", sender));
    s.push_str(&format!("To: {}\n", recipients.join(", ")));
    s.push_str(&format!("Subject: {}\n", config.subject()));
    s.push_str("Content-Type: text/plain; charset=utf-8\n");
    s.push('\n');
    s.push_str(body);
    if !body.ends_with('\n') {
        s.push('\n');
    }
    Ok(s)
}
