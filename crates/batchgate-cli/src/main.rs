use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use batchgate_audit::{AuditSink, FsAuditLog, LogQuery, LogStatus};
use batchgate_core::{format_timestamp, parse_logical_now, Popped, Task};
use batchgate_runner::{
    doctor, drive, load_seed, run_step, BatchContext, Config, DriveOutcome, FinalReport, Iteration, Settings,
    TaskCommand,
};

/// Exit status asking the host to invoke `step` again.
const EXIT_RESUME: i32 = 75;

#[derive(Parser)]
#[command(name = "batchgate", version)]
struct Cli {
    /// Configuration file (TOML, or YAML by extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config and create the state and log directories
    Init {
        #[arg(long)]
        force: bool,
    },

    /// Check directories, the state document and notifier settings
    Doctor,

    /// Show the stored gate record and queue size without running the gate
    Status,

    /// Run one invocation: seed, process one task, resume or finish
    Step {
        #[command(flatten)]
        work: WorkArgs,
    },

    /// Keep invoking `step` until the batch finishes or is refused
    Drive {
        #[command(flatten)]
        work: WorkArgs,
        #[arg(long, default_value_t = 1000)]
        max_invocations: usize,
    },

    /// Print audit log entries for a day
    Logs {
        /// Y-m-d, defaults to the logical today
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        reverse: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        status: Option<String>,
    },

    /// Inspect or edit the task queue (runs the gate like any invocation)
    Tasks {
        #[command(subcommand)]
        cmd: TasksCommand,
    },
}

#[derive(clap::Args)]
struct WorkArgs {
    /// JSON file with the tasks to seed a new batch with
    #[arg(long)]
    seed: Option<PathBuf>,
    /// Program and arguments; the popped task is appended as the last argument
    #[arg(long, required = true, num_args = 1.., allow_hyphen_values = true)]
    exec: Vec<String>,
    /// Print the final report HTML-escaped, for hosts serving it as a response body
    #[arg(long)]
    html: bool,
}

#[derive(Subcommand)]
enum TasksCommand {
    List {
        #[arg(long)]
        key: Option<String>,
    },
    Add {
        #[arg(long)]
        json: String,
    },
    Pop {
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = 1)]
        amount: usize,
    },
    Remove {
        key: String,
        #[arg(long)]
        must_exist: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let config_path = cli.config.unwrap_or_else(|| Config::default_path(&cwd));

    match cli.cmd {
        Command::Init { force } => {
            if config_path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", config_path.display());
            }
            let cfg = Config::default_for(&cwd);
            cfg.save_to(&config_path)?;
            cfg.validate().unwrap_or_else(|f| f.exit());
            println!("Initialized batchgate config at {}", config_path.display());
        }
        Command::Doctor => {
            let settings = settings(&config_path);
            for note in doctor(&settings)? {
                println!("{note}");
            }
            println!("OK");
        }
        Command::Status => {
            let settings = settings(&config_path);
            let store = settings.open_store().unwrap_or_else(|f| f.exit());
            match store.read()? {
                None => println!("No state document at {}", store.describe()),
                Some(doc) => {
                    let record = doc.gate_record().map_err(|e| anyhow!("{}: {e}", store.describe()))?;
                    println!("Run status: {}", record.run_status);
                    println!("Run date: {}", format_timestamp(&record.run_date));
                    println!("Queued entries: {}", doc.tasks.root().len());
                    println!("Work remaining: {}", doc.tasks.has_remaining_work());
                }
            }
        }
        Command::Step { work } => {
            let cfg = load_config(&config_path);
            let (command, seed) = work_parts(&work, &cwd)?;
            let ctx = BatchContext::open_or_exit(&cfg);
            match run_step(ctx, &command, seed.as_ref())? {
                Iteration::Resume(signal) => {
                    println!("RESUME");
                    for (k, v) in &signal.headers {
                        println!("{k}: {v}");
                    }
                    std::process::exit(EXIT_RESUME);
                }
                Iteration::Finished(report) => print!("{}", render(&report, work.html)),
            }
        }
        Command::Drive { work, max_invocations } => {
            let cfg = load_config(&config_path);
            let (command, seed) = work_parts(&work, &cwd)?;
            match drive(&cfg, &command, seed.as_ref(), max_invocations)? {
                DriveOutcome::Refused(refusal) => refusal.exit(),
                DriveOutcome::Finished { invocations, report } => {
                    print!("{}", render(&report, work.html));
                    tracing::info!(invocations, "batch finished");
                }
                DriveOutcome::Exhausted { invocations } => {
                    bail!("batch still has work after {invocations} invocations")
                }
            }
        }
        Command::Logs { date, reverse, limit, status } => {
            let settings = settings(&config_path);
            let date = match date {
                Some(raw) => parse_logical_now(&raw).map_err(|e| anyhow!("--date: {e}"))?.date(),
                None => settings.today,
            };
            let query = LogQuery { date, status: status.as_deref().map(LogStatus::from), reverse, limit };
            for entry in FsAuditLog::new(settings.logs_dir.clone()).read(&query)? {
                print!("{}", entry.to_line());
            }
        }
        Command::Tasks { cmd } => {
            let cfg = load_config(&config_path);
            let mut ctx = BatchContext::open_or_exit(&cfg);
            match cmd {
                TasksCommand::List { key } => {
                    let tasks = ctx.get_tasks(key.as_deref()).map(|t| t.to_value());
                    println!("{}", serde_json::to_string_pretty(&tasks)?);
                }
                TasksCommand::Add { json } => {
                    let value: serde_json::Value = serde_json::from_str(&json).context("--json")?;
                    ctx.add_tasks(Task::from(value))?;
                    println!("Added");
                }
                TasksCommand::Pop { key, amount } => match ctx.pop_task(key.as_deref(), amount)? {
                    Popped::Nothing => println!("null"),
                    Popped::One(task) => println!("{}", task.to_value()),
                    Popped::Many(tasks) => {
                        let values: Vec<_> = tasks.iter().map(Task::to_value).collect();
                        println!("{}", serde_json::Value::Array(values));
                    }
                },
                TasksCommand::Remove { key, must_exist } => match ctx.remove_task(&key, must_exist)? {
                    Some(task) => println!("Removed {key}: {}", task.to_value()),
                    None => println!("No task at {key}"),
                },
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Config {
    Config::load_from(path).unwrap_or_else(|err| batchgate_runner::Fatal::ConfigFile(err).exit())
}

fn settings(path: &Path) -> Settings {
    load_config(path).validate().unwrap_or_else(|f| f.exit())
}

fn render(report: &FinalReport, html: bool) -> String {
    if html {
        report.escaped()
    } else {
        report.text.clone()
    }
}

fn work_parts(work: &WorkArgs, cwd: &Path) -> anyhow::Result<(TaskCommand, Option<Task>)> {
    let (program, args) = work.exec.split_first().ok_or_else(|| anyhow!("--exec needs a program"))?;
    let command = TaskCommand { program: program.clone(), args: args.to_vec(), workdir: cwd.to_path_buf() };
    let seed = work.seed.as_deref().map(load_seed).transpose()?;
    Ok((command, seed))
}
