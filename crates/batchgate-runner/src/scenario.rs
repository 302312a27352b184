use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use batchgate_core::{StateDocument, Task};
use batchgate_storage::{with_document, Commit, JsonFileStore, StateStore};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{Config, Flags};
use crate::context::{BatchContext, Iteration, Opened};

/// A replayable sequence of invocations against one state document, read
/// from `scenario.yaml`.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub scenario_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_interval")]
    pub run_interval: String,
    #[serde(default)]
    pub allow_dynamic_tasks: bool,
    /// Stored document before the first invocation; absent means a new store.
    #[serde(default)]
    pub initial_state: Option<Value>,
    /// Seeded whenever an invocation starts a new batch.
    #[serde(default)]
    pub seed: Option<Value>,
    pub invocations: Vec<ScenarioInvocation>,
    pub expected: ScenarioExpected,
}

fn default_interval() -> String {
    "-24 hours".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ScenarioInvocation {
    /// Logical time of the invocation.
    pub today: String,
    #[serde(default)]
    pub add: Vec<Value>,
    #[serde(default)]
    pub pop: usize,
    /// `false` simulates a crash: the invocation ends without iterating.
    #[serde(default = "default_true")]
    pub finish: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct ScenarioExpected {
    #[serde(default)]
    pub admissions: Vec<String>,
    #[serde(default)]
    pub popped: Vec<Value>,
    #[serde(default)]
    pub iterations: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub final_status: Option<String>,
    #[serde(default)]
    pub final_tasks: Option<Value>,
    #[serde(default)]
    pub state_unchanged: bool,
    #[serde(default)]
    pub log_contains: Vec<String>,
}

#[derive(Debug)]
pub struct ScenarioResult {
    /// `fresh`, `resume` or `refused` per invocation.
    pub admissions: Vec<String>,
    pub popped: Vec<Task>,
    /// `resume`, `finished` or `crashed` per admitted invocation.
    pub iterations: Vec<String>,
    /// Queue errors, in order.
    pub errors: Vec<String>,
    pub document: Option<StateDocument>,
    pub state_unchanged: bool,
    /// Every audit log under the scenario's log directory, oldest day first.
    pub log_text: String,
}

pub fn load_scenario(dir: &Path) -> Result<Scenario> {
    let p = dir.join("scenario.yaml");
    let s = std::fs::read_to_string(&p).with_context(|| format!("read scenario.yaml: {}", p.display()))?;
    let sc: Scenario = serde_yaml::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
    Ok(sc)
}

/// Replays the scenario in `dir` against a JSON state store under `work_dir`.
pub fn simulate(dir: &Path, work_dir: &Path) -> Result<ScenarioResult> {
    let sc = load_scenario(dir)?;
    let mut base = Config::default_for(work_dir);
    base.run_interval = Some(sc.run_interval.clone());
    base.flags = Flags { allow_dynamic_tasks: sc.allow_dynamic_tasks, ..Flags::default() };

    let state_dir = PathBuf::from(base.config_directory.clone().unwrap_or_default());
    std::fs::create_dir_all(&state_dir)?;
    let store = JsonFileStore::new(&state_dir, &base.storage.document);
    if let Some(initial) = &sc.initial_state {
        let doc: StateDocument = serde_json::from_value(initial.clone()).context("initial_state")?;
        with_document(&store, |slot| {
            *slot = Some(doc.clone());
            (Commit::Write, ())
        })?;
    }
    let before = std::fs::read(store.path()).ok();
    let seed = sc.seed.clone().map(Task::from);

    let mut res = ScenarioResult {
        admissions: vec![],
        popped: vec![],
        iterations: vec![],
        errors: vec![],
        document: None,
        state_unchanged: false,
        log_text: String::new(),
    };

    for inv in &sc.invocations {
        let cfg = Config { today: Some(inv.today.clone()), ..base.clone() };
        let mut ctx = match BatchContext::open(&cfg).map_err(|f| anyhow!("{}: {f}", sc.scenario_id))? {
            Opened::Refused(_) => {
                res.admissions.push("refused".to_string());
                continue;
            }
            Opened::Admitted(ctx) => ctx,
        };
        res.admissions.push(format!("{:?}", ctx.admission()).to_lowercase());

        if ctx.is_new_batch() {
            if let Some(seed) = &seed {
                if let Err(err) = ctx.add_tasks(seed.clone()) {
                    res.errors.push(err.to_string());
                }
            }
        }
        for extra in &inv.add {
            if let Err(err) = ctx.add_tasks(Task::from(extra.clone())) {
                res.errors.push(err.to_string());
            }
        }
        if inv.pop > 0 {
            res.popped.extend(ctx.pop_task(None, inv.pop)?.into_vec());
        }
        if !inv.finish {
            res.iterations.push("crashed".to_string());
            continue;
        }
        match ctx.iterate_or_finish()? {
            Iteration::Resume(_) => res.iterations.push("resume".to_string()),
            Iteration::Finished(_) => res.iterations.push("finished".to_string()),
        }
    }

    res.document = store.read()?;
    res.state_unchanged = before.is_some() && std::fs::read(store.path()).ok() == before;
    res.log_text = read_all_logs(&work_dir.join("logs"))?;
    Ok(res)
}

/// Compares a result with the scenario's `expected` block.
pub fn verify(dir: &Path, res: &ScenarioResult) -> Result<()> {
    let sc = load_scenario(dir)?;
    let exp = &sc.expected;
    let id = &sc.scenario_id;

    if res.admissions != exp.admissions {
        bail!("{id}: admissions {:?}, expected {:?}", res.admissions, exp.admissions);
    }
    let popped: Vec<Value> = res.popped.iter().map(Task::to_value).collect();
    if popped != exp.popped {
        bail!("{id}: popped {:?}, expected {:?}", popped, exp.popped);
    }
    if res.iterations != exp.iterations {
        bail!("{id}: iterations {:?}, expected {:?}", res.iterations, exp.iterations);
    }
    if res.errors.len() != exp.errors.len() || res.errors.iter().zip(&exp.errors).any(|(got, want)| !got.contains(want.as_str())) {
        bail!("{id}: errors {:?}, expected {:?}", res.errors, exp.errors);
    }
    let doc = res.document.as_ref().ok_or_else(|| anyhow!("{id}: no state document"))?;
    if let Some(status) = &exp.final_status {
        let record = doc.gate_record().map_err(|e| anyhow!("{id}: {e}"))?;
        if record.run_status.as_str() != status {
            bail!("{id}: final status {}, expected {status}", record.run_status);
        }
    }
    if let Some(tasks) = &exp.final_tasks {
        let got = serde_json::to_value(&doc.tasks)?;
        if &got != tasks {
            bail!("{id}: final tasks {got}, expected {tasks}");
        }
    }
    if exp.state_unchanged && !res.state_unchanged {
        bail!("{id}: state document was modified");
    }
    for needle in &exp.log_contains {
        if !res.log_text.contains(needle.as_str()) {
            bail!("{id}: audit log lacks `{needle}`");
        }
    }
    Ok(())
}

fn read_all_logs(dir: &Path) -> Result<String> {
    let mut files = vec![];
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                files.push(path);
            }
        }
    }
    files.sort();
    let mut text = String::new();
    for f in files {
        text.push_str(&std::fs::read_to_string(&f).with_context(|| format!("read {}", f.display()))?);
    }
    Ok(text)
}
