//! External marker-compiler subprocess invocation.
//!
//! The compiler binary itself is an external collaborator; this module
//! only owns the contract: take a source image and a feature-count cap,
//! produce a `.mind` artifact, and report how many features it found on
//! the last line of stdout as `{"feature_points": N}`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug)]
pub enum CompilerError {
    /// Non-zero exit or malformed output. Retriable.
    Failed(String),
    /// Did not finish within the configured timeout. Retriable.
    TimedOut,
    /// Could not even spawn the process (bad path, permissions). Not
    /// retriable — the config itself is broken.
    SpawnFailed(String),
}

impl std::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompilerError::Failed(msg) => write!(f, "compiler failed: {msg}"),
            CompilerError::TimedOut => write!(f, "compiler timed out"),
            CompilerError::SpawnFailed(msg) => write!(f, "could not spawn compiler: {msg}"),
        }
    }
}

pub struct CompilerOutput {
    pub artifact_path: PathBuf,
    pub feature_points: i64,
}

#[derive(serde::Deserialize)]
struct CompilerReport {
    feature_points: i64,
}

pub async fn compile_marker(
    compiler_path: &Path,
    source_image: &Path,
    output_dir: &Path,
    max_features: u32,
    timeout: Duration,
) -> Result<CompilerOutput, CompilerError> {
    let artifact_path = output_dir.join("marker.mind");

    let mut child = Command::new(compiler_path)
        .arg("--input")
        .arg(source_image)
        .arg("--output")
        .arg(&artifact_path)
        .arg("--max-features")
        .arg(max_features.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CompilerError::SpawnFailed(e.to_string()))?;

    let stdout = child.stdout.take();
    let run = async move {
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CompilerError::Failed(e.to_string()))?;
        Ok::<_, CompilerError>(output)
    };

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result?,
        Err(_) => {
            drop(stdout);
            return Err(CompilerError::TimedOut);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompilerError::Failed(format!(
            "exit code {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let last_line = stdout.lines().last().unwrap_or("").trim();
    let report: CompilerReport = serde_json::from_str(last_line)
        .map_err(|e| CompilerError::Failed(format!("could not parse compiler report: {e}")))?;

    if !artifact_path.exists() {
        return Err(CompilerError::Failed("compiler reported success but wrote no artifact".into()));
    }

    Ok(CompilerOutput { artifact_path, feature_points: report.feature_points })
}
