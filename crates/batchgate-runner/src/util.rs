use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;

/// Runs `program args..` in `dir` and returns trimmed stdout; a non-zero exit
/// becomes an error carrying both output streams.
pub fn run_cmd(dir: &Path, program: &str, args: &[String]) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(dir);
    let out = cmd.output().with_context(|| format!("run {} {:?}", program, args))?;
    if !out.status.success() {
        return Err(anyhow!(
            "command failed ({}): {} {:?}\nstdout:{}\nstderr:{}",
            out.status,
            program,
            args,
            String::from_utf8_lossy(&out.stdout).trim(),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}
