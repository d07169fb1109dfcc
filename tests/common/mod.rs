#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rnaseq_pipelines::cli::Arguments;
use rnaseq_pipelines::config::defs::RunConfig;
use rnaseq_pipelines::utils::logging::RunLog;

// Stands in for `singularity`: strips `run [--bind dir] <image>`, then fakes the tool.
pub const FAKE_RUNTIME: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "singularity-ce version 3.11.4"
    exit 0
fi
[ "$1" = "run" ] || exit 64
shift
if [ "$1" = "--bind" ]; then
    shift 2
fi
shift
tool="$1"
shift
echo "CALL $tool $*" >&2
name=$(basename "$PWD")
case "$tool" in
    */STAR) touch Aligned.sortedByCoord.out.bam ;;
    */samtools) touch "$2.bai" ;;
    */htseq-count)
        printf 'G_%s\t1\nshared\t2\n' "$name"
        case "$name" in
            *_fail) exit 1 ;;
        esac
        ;;
    *) exit 2 ;;
esac
"#;

// A runtime whose version query never answers.
pub const HANGING_RUNTIME: &str = "#!/bin/sh\nsleep 10\n";

pub fn install_script(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, contents)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

pub fn add_sample(root: &Path, name: &str) -> Result<()> {
    let dir = root.join(name);
    fs::create_dir_all(&dir)?;
    for read in ["R1", "R2"] {
        fs::write(dir.join(format!("{}_S1_L001_{}_001.fastq.gz", name, read)), [0x1F, 0x8B, 0x08])?;
    }
    Ok(())
}

pub fn add_genome(work: &Path) -> Result<()> {
    fs::create_dir_all(work.join("genome"))?;
    fs::write(work.join("genome").join("genes.gtf"), "")?;
    Ok(())
}

/// Config rooted at `work` with samples in `work/samples`, genome in
/// `work/genome` and output in `work/out`, plus any `extra` arguments.
pub fn config(work: &Path, runtime: &Path, extra: &[&str]) -> Result<RunConfig> {
    let out_dir = work.join("out");
    fs::create_dir_all(&out_dir)?;
    let mut argv: Vec<String> = vec![
        "rnaseq-pipelines".to_string(),
        "--runtime".to_string(), runtime.to_string_lossy().into_owned(),
        "-s".to_string(), "/images/rnaseq.sif".to_string(),
        "-b".to_string(), "/data".to_string(),
        "-p".to_string(), "samples".to_string(),
        "-g".to_string(), "genome".to_string(),
        "-o".to_string(), "out".to_string(),
    ];
    argv.extend(extra.iter().map(|a| a.to_string()));
    Ok(RunConfig {
        cwd: work.to_path_buf(),
        out_dir: out_dir.clone(),
        args: Arguments::parse_from(argv),
        run_log: RunLog::open(&out_dir.join("rna_pipeline.log"))?,
        tool_timeout: Duration::from_secs(30),
    })
}
