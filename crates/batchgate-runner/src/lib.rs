pub mod config;
pub mod context;
pub mod doctor;
pub mod error;
pub mod scenario;
pub mod step;
pub mod util;

pub use config::*;
pub use context::*;
pub use doctor::*;
pub use error::*;
pub use step::*;
pub use util::*;

#[cfg(test)]
mod scenario_tests {
    use super::scenario::*;
    use std::path::{Path, PathBuf};

    fn scenario_dir(id: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/scenarios").join(id)
    }

    fn run(id: &str) -> ScenarioResult {
        let dir = scenario_dir(id);
        let work = tempfile::tempdir().unwrap();
        let res = simulate(&dir, work.path()).unwrap();
        verify(&dir, &res).unwrap();
        res
    }

    #[test]
    fn scenario_sc01_end_to_end() {
        let res = run("SC-01-end-to-end");
        let started = res.log_text.find("BATCH INITIATED").unwrap();
        let finished = res.log_text.find("BATCH COMPLETED").unwrap();
        assert!(started < finished);
    }

    #[test]
    fn scenario_sc02_refusal_writes_nothing() {
        let res = run("SC-02-refused-within-interval");
        assert!(res.state_unchanged);
        assert!(res.popped.is_empty());
        assert_eq!(res.document.unwrap().extra.get("owner"), Some(&serde_json::json!("ops")));
    }

    #[test]
    fn scenario_sc03_crash_recovery_does_not_reseed() {
        let res = run("SC-03-crash-recovery");
        assert!(!res.log_text.contains("ignored"));
    }

    #[test]
    fn scenario_sc04_dynamic_add_forbidden() {
        let res = run("SC-04-dynamic-add-forbidden");
        assert_eq!(res.errors.len(), 1);
    }

    #[test]
    fn scenario_sc05_nested_groups() {
        run("SC-05-nested-groups");
    }

    #[test]
    fn every_fixture_loads() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/scenarios");
        for entry in std::fs::read_dir(root).unwrap() {
            let dir = entry.unwrap().path();
            let sc = load_scenario(&dir).unwrap();
            assert_eq!(dir.file_name().unwrap().to_str().unwrap(), sc.scenario_id);
            assert!(!sc.invocations.is_empty());
        }
    }
}
