// src/utils/logging.rs: Append-only run log shared by every pipeline step

use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{error, info};


/// Append-only plain text log. Each write opens the file, appends, flushes
/// and closes it again, so no handle outlives the call that made it.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RunLog { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens an append handle for a child process stderr.
    pub fn stdio(&self) -> io::Result<File> {
        OpenOptions::new().append(true).open(&self.path)
    }

    /// Writes one `<timestamp>\t<step>\t<sample>\t<elapsed>\t<status>` line.
    pub fn record(&self, step: &str, sample: &str, elapsed: Duration, ok: bool) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{}\t{}\t{}\t{:.3}s\t{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            step,
            sample,
            elapsed.as_secs_f64(),
            if ok { "OK" } else { "FAILED" }
        )?;
        file.flush()
    }
}


/// Runs `fut` and records its wall time in the run log, success or not.
///
/// # Arguments
///
/// * `run_log` - Log receiving the timing line.
/// * `step` - Step name, e.g. the tool tag.
/// * `sample` - Sample the step ran for.
/// * `fut` - The step itself.
///
/// # Returns
/// Whatever `fut` returns. A failure to write the log line is reported but
/// never replaces the step's own result.
pub async fn timed<F, T, E>(run_log: &RunLog, step: &str, sample: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = fut.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => info!("{} finished for {} in {:.1} s", step, sample, elapsed.as_secs_f64()),
        Err(e) => error!("{} failed for {} after {:.1} s: {}", step, sample, elapsed.as_secs_f64(), e),
    }
    if let Err(e) = run_log.record(step, sample, elapsed, result.is_ok()) {
        error!("Could not write to run log {:?}: {}", run_log.path(), e);
    }
    result
}
