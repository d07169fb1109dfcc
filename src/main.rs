use std::time::{Duration, Instant};
use std::{env, fs};
use std::path::PathBuf;
use std::sync::Arc;
use std::io::Write;

use anyhow::Result;
use log::{self, LevelFilter, debug, info, error};
use env_logger::Builder;

use rnaseq_pipelines::cli::{self, parse};
use rnaseq_pipelines::config::defs::{absolutize, RunConfig, DEFAULT_TOOL_TIMEOUT_SECS, RUN_LOG};
use rnaseq_pipelines::pipelines::rnaseq;
use rnaseq_pipelines::utils::logging::RunLog;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let out_dir = setup_output_dir(&args, &dir)?;
    let log_path = match &args.log_file {
        Some(path) => absolutize(&dir, path),
        None => out_dir.join(RUN_LOG),
    };
    let run_log = RunLog::open(&log_path)?;
    debug!("Tool output is appended to {:?}", log_path);

    let tool_timeout = Duration::from_secs(args.tool_timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS));
    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd: dir,
        out_dir,
        args,
        run_log,
        tool_timeout,
    });

    if let Err(e) = rnaseq::run_module(run_config, &module).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Sets up output directory
/// Uses `out_dir` from args if given, otherwise the current directory.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &cli::Arguments, cwd: &PathBuf) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => absolutize(cwd, out),
        None => cwd.clone(),
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}
