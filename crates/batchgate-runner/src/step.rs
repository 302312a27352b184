use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use batchgate_audit::LogStatus;
use batchgate_core::{Popped, Task};
use tracing::info;

use crate::config::Config;
use crate::context::{BatchContext, FinalReport, Iteration, Opened};
use crate::error::{BatchError, Refusal};
use crate::util::run_cmd;

/// External program run once per popped task; the task is passed as the
/// last argument (plain text for string tasks, JSON otherwise).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskCommand {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

impl TaskCommand {
    /// Splits a whitespace-separated command line.
    pub fn parse(line: &str, workdir: &Path) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| anyhow!("empty task command"))?;
        Ok(Self { program, args: parts.collect(), workdir: workdir.to_path_buf() })
    }

    pub fn run(&self, task: &Task) -> Result<String> {
        let mut args = self.args.clone();
        args.push(task.to_string());
        run_cmd(&self.workdir, &self.program, &args)
    }
}

/// Reads a seed task list from a JSON file.
pub fn load_seed(path: &Path) -> Result<Task> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let v: serde_json::Value = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    Ok(Task::from(v))
}

/// One invocation of the batch entry point: seed a new batch, process one
/// task, then resume or finish.
pub fn run_step(mut ctx: BatchContext, command: &TaskCommand, seed: Option<&Task>) -> Result<Iteration, BatchError> {
    if ctx.is_new_batch() {
        if let Some(seed) = seed {
            if !ctx.has_remaining_work() {
                ctx.add_tasks(seed.clone())?;
            }
        }
    }

    if let Popped::One(task) = ctx.pop_task(None, 1)? {
        match command.run(&task) {
            Ok(out) if out.is_empty() => ctx.log_action(&format!("Task {task} done"), LogStatus::Success)?,
            Ok(out) => ctx.log_action(&format!("Task {task} done: {out}"), LogStatus::Success)?,
            Err(err) => ctx.log_action(&format!("Task {task} failed: {err:#}"), LogStatus::Error)?,
        };
    }
    ctx.iterate_or_finish()
}

/// How a [`drive`] loop ended.
#[derive(Debug)]
pub enum DriveOutcome {
    Refused(Refusal),
    Finished { invocations: usize, report: FinalReport },
    /// `max_invocations` ran out while work remained.
    Exhausted { invocations: usize },
}

/// Plays the hosting environment: keeps invoking [`run_step`] while it asks
/// to be resumed.
pub fn drive(config: &Config, command: &TaskCommand, seed: Option<&Task>, max_invocations: usize) -> Result<DriveOutcome> {
    for n in 1..=max_invocations {
        let ctx = match BatchContext::open(config)? {
            Opened::Admitted(ctx) => ctx,
            Opened::Refused(refusal) if n == 1 => return Ok(DriveOutcome::Refused(refusal)),
            Opened::Refused(refusal) => return Err(anyhow!("refused mid-batch: {}", refusal.message)),
        };
        match run_step(ctx, command, seed)? {
            Iteration::Resume(_) => info!(invocation = n, "resuming"),
            Iteration::Finished(report) => return Ok(DriveOutcome::Finished { invocations: n, report }),
        }
    }
    Ok(DriveOutcome::Exhausted { invocations: max_invocations })
}
