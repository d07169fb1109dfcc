use std::path::PathBuf;
use std::time::Duration;
use std::collections::HashMap;
use lazy_static::lazy_static;
use thiserror::Error;
use crate::cli::Arguments;
use crate::utils::logging::RunLog;

// External software
pub const SINGULARITY_TAG: &str = "singularity";
pub const STAR_TAG: &str = "STAR";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const HTSEQ_TAG: &str = "htseq-count";


lazy_static! {
    // Tool locations inside the container image
    pub static ref TOOL_PATHS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(STAR_TAG, "/STAR/source/STAR");
        m.insert(SAMTOOLS_TAG, "/usr/miniconda3/bin/samtools");
        m.insert(HTSEQ_TAG, "/usr/miniconda3/bin/htseq-count");
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    Index,
}

// Pipeline modules
pub const RNASEQ_MODULE: &str = "rnaseq";
pub const ALIGN_MODULE: &str = "align";
pub const INDEX_MODULE: &str = "index";
pub const COUNT_MODULE: &str = "count";
pub const MERGE_COUNTS_MODULE: &str = "merge_counts";

// Static Filenames
pub const ALIGNED_BAM: &str = "Aligned.sortedByCoord.out.bam";
pub const RESULTS_DIR: &str = "results";
pub const MERGED_COUNTS: &str = "counts.txt";
pub const RUN_LOG: &str = "rna_pipeline.log";
pub const GTF_EXT: &str = ".gtf";

// Static Parameters
pub const COUNTS_SUFFIX: &str = ".counts";
pub const GENE_ID_HEADER: &str = "gene_id";
pub const HTSEQ_SPECIAL_PREFIX: &str = "__";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 86_400;


pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub run_log: RunLog,
    pub tool_timeout: Duration,
}

impl RunConfig {
    pub fn results_dir(&self) -> PathBuf {
        self.out_dir.join(RESULTS_DIR)
    }

    /// Directory the merge step reads from: `--counts-dir` if given, else the results directory.
    pub fn counts_dir(&self) -> PathBuf {
        match &self.args.counts_dir {
            Some(dir) => absolutize(&self.cwd, dir),
            None => self.results_dir(),
        }
    }

    pub fn merged_counts_path(&self) -> PathBuf {
        self.results_dir().join(MERGED_COUNTS)
    }
}

/// Resolves `path` against `cwd` unless it is already absolute.
pub fn absolutize(cwd: &PathBuf, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to run {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("{tool} failed for sample {sample}: {status}")]
    ToolExit { tool: String, sample: String, status: String },

    #[error("{tool} timed out after {secs} seconds for sample {sample}")]
    Timeout { tool: String, sample: String, secs: u64 },

    #[error("Malformed count file {path:?} at line {line}: {msg}")]
    Parse { path: PathBuf, line: u64, msg: String },

    #[error("I/O error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}
