use anyhow::{anyhow, Context, Result};
use std::path::Path;

use batchgate_core::format_timestamp;
use batchgate_notify::compose_message;

use crate::Settings;

/// Checks that an invocation could run: directories writable, state document
/// readable with a complete gate record, notifier settings usable. Returns
/// a short human summary.
pub fn doctor(settings: &Settings) -> Result<Vec<String>> {
    let mut notes = vec![];
    for (name, dir) in [("config_directory", &settings.config_dir), ("logs_directory", &settings.logs_dir)] {
        probe_writable(dir).with_context(|| format!("{name} {} is not writable", dir.display()))?;
        notes.push(format!("{name}: {} (writable)", dir.display()));
    }

    let store = settings.open_store().map_err(|f| anyhow!("{f}"))?;
    match store.read().with_context(|| format!("read state {}", store.describe()))? {
        None => notes.push(format!("state: {} (not created yet)", store.describe())),
        Some(doc) => {
            let record = doc.gate_record().map_err(|e| anyhow!("state {}: {e}", store.describe()))?;
            notes.push(format!(
                "state: {} ({} since {}, {} queued entries)",
                store.describe(),
                record.run_status,
                format_timestamp(&record.run_date),
                doc.tasks.root().len()
            ));
        }
    }

    if settings.notifier.is_empty() {
        notes.push("notifier: disabled".to_string());
    } else {
        compose_message(&settings.notifier, "").context("notifier settings")?;
        notes.push(format!("notifier: {} recipient(s)", settings.notifier.recipients().len()));
    }
    Ok(notes)
}

fn probe_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(format!(".batchgate-probe-{}", std::process::id()));
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}
