// src/utils/streams.rs: Spawning external tools and collecting their output
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use crate::config::defs::PipelineError;
use crate::utils::logging::RunLog;


#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildStream {
    Stdout,
    Stderr,
}

/// Where a tool's stdout goes. Stderr always goes to the run log.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    RunLog,
    File(PathBuf),
}

/// A fully built command line for one tool run on one sample.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub sample: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub stdout: ToolOutput,
}


/// Reads all lines of a child's stdout or stderr.
///
/// # Arguments
///
/// * `child` - Spawned child with the requested stream piped.
/// * `stream` - Which stream to drain.
///
/// # Returns
/// Vector of lines without terminators.
pub async fn read_child_output_to_vec(child: &mut Child, stream: ChildStream) -> Result<Vec<String>> {
    let mut out = Vec::new();
    match stream {
        ChildStream::Stdout => {
            let stdout = child.stdout.take().ok_or_else(|| anyhow!("Child stdout is not piped"))?;
            let mut lines = LinesStream::new(BufReader::new(stdout).lines());
            while let Some(line) = lines.next().await {
                out.push(line?);
            }
        }
        ChildStream::Stderr => {
            let stderr = child.stderr.take().ok_or_else(|| anyhow!("Child stderr is not piped"))?;
            let mut lines = LinesStream::new(BufReader::new(stderr).lines());
            while let Some(line) = lines.next().await {
                out.push(line?);
            }
        }
    }
    Ok(out)
}


fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    "unknown exit status".to_string()
}


/// Runs one tool to completion, waiting at most `limit`.
/// Stderr is appended to the run log; stdout goes where the invocation says.
/// A non-zero exit, a timeout or a spawn failure is an error, and a stdout
/// file from a failed run is removed.
pub async fn run_tool(run_log: &RunLog, invocation: &ToolInvocation, limit: Duration) -> Result<(), PipelineError> {
    let result = spawn_and_wait(run_log, invocation, limit).await;
    if result.is_err() {
        if let ToolOutput::File(path) = &invocation.stdout {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!("Could not remove partial output {:?}: {}", path, e);
                }
            }
        }
    }
    result
}

async fn spawn_and_wait(run_log: &RunLog, invocation: &ToolInvocation, limit: Duration) -> Result<(), PipelineError> {
    let tool_error = |error: String| PipelineError::ToolExecution {
        tool: invocation.tool.clone(),
        error,
    };

    debug!("Running in {:?}: {} {}", invocation.cwd, invocation.program, invocation.args.join(" "));

    let stdout = match &invocation.stdout {
        ToolOutput::RunLog => run_log.stdio(),
        ToolOutput::File(path) => File::create(path),
    }
    .map_err(|e| tool_error(format!("Cannot open stdout target: {}", e)))?;
    let stderr = run_log
        .stdio()
        .map_err(|e| tool_error(format!("Cannot open run log {:?}: {}", run_log.path(), e)))?;

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| tool_error(format!("Failed to spawn {}: {}", invocation.program, e)))?;

    let waited = timeout(limit, child.wait()).await;
    match waited {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(PipelineError::ToolExit {
            tool: invocation.tool.clone(),
            sample: invocation.sample.clone(),
            status: describe_status(status),
        }),
        Ok(Err(e)) => Err(tool_error(format!("Failed waiting on {}: {}", invocation.program, e))),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("Could not kill timed out {}: {}", invocation.tool, e);
            }
            Err(PipelineError::Timeout {
                tool: invocation.tool.clone(),
                sample: invocation.sample.clone(),
                secs: limit.as_secs(),
            })
        }
    }
}


/// Asks an executable for its version with `--version`, waiting at most `limit`.
///
/// # Returns
/// Last whitespace separated token of the first output line,
/// e.g. `3.11.4` for `singularity-ce version 3.11.4`.
pub async fn check_version(program: &str, limit: Duration) -> Result<String> {
    timeout(limit, query_version(program))
        .await
        .map_err(|_| anyhow!("{} --version did not finish within {} ms", program, limit.as_millis()))?
}

async fn query_version(program: &str) -> Result<String> {
    let mut child = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is it installed?", program, e))?;

    let lines = read_child_output_to_vec(&mut child, ChildStream::Stdout).await?;
    let status = child.wait().await?;
    if !status.success() {
        return Err(anyhow!("{} --version failed with {}", program, describe_status(status)));
    }
    let first_line = lines
        .first()
        .ok_or_else(|| anyhow!("No output from {} --version", program))?;
    let version = first_line
        .split_whitespace()
        .last()
        .ok_or_else(|| anyhow!("Invalid {} --version output: {}", program, first_line))?
        .to_string();
    Ok(version)
}
