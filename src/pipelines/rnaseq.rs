use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::fs;

use log::{debug, info, warn};

use crate::config::defs::{
    absolutize, PipelineError, RunConfig, SamtoolsSubcommand, ALIGNED_BAM, ALIGN_MODULE, COUNT_MODULE,
    GTF_EXT, HTSEQ_TAG, INDEX_MODULE, MERGE_COUNTS_MODULE, RNASEQ_MODULE, SAMTOOLS_TAG, STAR_TAG,
};
use crate::utils::command::generate_container_cli;
use crate::utils::command::htseq::HtseqConfig;
use crate::utils::command::samtools::SamtoolsConfig;
use crate::utils::command::star::StarConfig;
use crate::utils::counts::{merge_counts, CountMatrix, MergeOptions};
use crate::utils::file::{file_name_string, files_with_suffix, is_gzipped, subdirectories};
use crate::utils::logging::timed;
use crate::utils::streams::{check_version, run_tool, ToolInvocation, ToolOutput};


/// One sample directory and its read files.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub dir: PathBuf,
    pub r1: Vec<PathBuf>,
    pub r2: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    Align,
    Index,
    Count,
}


/// Finds every sample directory under `root`, sorted by name.
///
/// # Arguments
///
/// * `root` - Directory holding one directory per sample.
/// * `r1_pattern` - Filename ending of forward read files.
/// * `r2_pattern` - Filename ending of reverse read files; none found means single-end.
///
/// # Returns
/// Samples with their R1 (and possibly R2) lanes, sorted.
pub fn discover_samples(root: &Path, r1_pattern: &str, r2_pattern: &str) -> Result<Vec<Sample>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::InvalidConfig(format!("Sample directory {:?} does not exist", root)));
    }

    let mut samples = Vec::new();
    for dir in subdirectories(root)? {
        let name = file_name_string(&dir)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("Unnamed sample directory {:?}", dir)))?;
        let r1 = files_with_suffix(&dir, r1_pattern)?;
        if r1.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "Sample {} has no *{} read files in {:?}",
                name, r1_pattern, dir
            )));
        }
        let r2 = files_with_suffix(&dir, r2_pattern)?;
        if !r2.is_empty() && r2.len() != r1.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "Sample {} has {} R1 files but {} R2 files",
                name, r1.len(), r2.len()
            )));
        }
        debug!("Sample {}: {} R1 and {} R2 files", name, r1.len(), r2.len());
        samples.push(Sample { name, dir, r1, r2 });
    }

    if samples.is_empty() {
        return Err(PipelineError::InvalidConfig(format!("No sample directories found in {:?}", root)));
    }
    Ok(samples)
}


/// The single `.gtf` annotation in the genome directory.
pub fn find_gtf(genome_dir: &Path) -> Result<PathBuf, PipelineError> {
    if !genome_dir.is_dir() {
        return Err(PipelineError::InvalidConfig(format!("Genome directory {:?} does not exist", genome_dir)));
    }
    let mut gtfs = files_with_suffix(genome_dir, GTF_EXT)?;
    match gtfs.len() {
        1 => Ok(gtfs.remove(0)),
        0 => Err(PipelineError::InvalidConfig(format!("No {} file in {:?}", GTF_EXT, genome_dir))),
        n => Err(PipelineError::InvalidConfig(format!(
            "Expected one {} file in {:?}, found {}",
            GTF_EXT, genome_dir, n
        ))),
    }
}


fn required_dir(config: &RunConfig, value: &Option<String>, flag: &str) -> Result<PathBuf, PipelineError> {
    value
        .as_ref()
        .map(|v| absolutize(&config.cwd, v))
        .ok_or_else(|| PipelineError::InvalidConfig(format!("{} is required for module {}", flag, config.args.module)))
}

fn container_invocation(
    config: &RunConfig,
    tool: &str,
    tool_config: &dyn std::any::Any,
    sample: &Sample,
    stdout: ToolOutput,
) -> Result<ToolInvocation, PipelineError> {
    let (program, args) = generate_container_cli(tool, config, Some(tool_config))
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    Ok(ToolInvocation {
        tool: tool.to_string(),
        sample: sample.name.clone(),
        program,
        args,
        cwd: sample.dir.clone(),
        stdout,
    })
}

async fn run_timed(config: &RunConfig, invocation: ToolInvocation) -> Result<(), PipelineError> {
    timed(
        &config.run_log,
        &invocation.tool,
        &invocation.sample,
        run_tool(&config.run_log, &invocation, config.tool_timeout),
    )
    .await
}


/// STAR alignment inside the sample directory, producing `Aligned.sortedByCoord.out.bam`.
pub async fn align_sample(config: &RunConfig, sample: &Sample, genome_dir: &Path) -> Result<(), PipelineError> {
    info!("Aligning {}...", sample.name);
    let star_config = StarConfig {
        genome_dir: genome_dir.to_path_buf(),
        r1: sample.r1.clone(),
        r2: sample.r2.clone(),
        gzipped: is_gzipped(&sample.r1[0])?,
    };
    let invocation = container_invocation(config, STAR_TAG, &star_config, sample, ToolOutput::RunLog)?;
    run_timed(config, invocation).await
}

pub async fn index_sample(config: &RunConfig, sample: &Sample) -> Result<(), PipelineError> {
    info!("Indexing bam file for {}...", sample.name);
    let bam = sample.dir.join(ALIGNED_BAM);
    if !bam.is_file() {
        return Err(PipelineError::InvalidConfig(format!("Sample {} has no {:?} to index", sample.name, bam)));
    }
    let samtools_config = SamtoolsConfig {
        subcommand: SamtoolsSubcommand::Index,
        subcommand_fields: vec![(ALIGNED_BAM.to_string(), None)],
    };
    let invocation = container_invocation(config, SAMTOOLS_TAG, &samtools_config, sample, ToolOutput::RunLog)?;
    run_timed(config, invocation).await
}

/// HTSeq counting; stdout becomes `<results>/<sample><suffix>`.
pub async fn count_sample(config: &RunConfig, sample: &Sample, gtf: &Path) -> Result<PathBuf, PipelineError> {
    info!("Counting {}...", sample.name);
    let counts_path = config
        .results_dir()
        .join(format!("{}{}", sample.name, config.args.counts_suffix));
    let htseq_config = HtseqConfig {
        bam: PathBuf::from(ALIGNED_BAM),
        gtf: gtf.to_path_buf(),
    };
    let invocation = container_invocation(
        config,
        HTSEQ_TAG,
        &htseq_config,
        sample,
        ToolOutput::File(counts_path.clone()),
    )?;
    run_timed(config, invocation).await?;
    Ok(counts_path)
}


/// Merges the count files in `counts_dir` into `<results>/counts.txt`.
pub fn merge_from(config: &RunConfig, counts_dir: &Path) -> Result<CountMatrix, PipelineError> {
    let options = MergeOptions {
        suffix: config.args.counts_suffix.clone(),
        drop_special_counters: config.args.drop_special_counters,
    };
    info!("Merging count files...");
    merge_counts(counts_dir, &config.merged_counts_path(), &options)
}

/// Standalone merge: reads `--counts-dir`, or the results directory when unset.
pub fn merge(config: &RunConfig) -> Result<CountMatrix, PipelineError> {
    merge_from(config, &config.counts_dir())
}


/// Runs the given stages for every sample, one sample at a time, in sample order.
pub async fn run_stages(config: Arc<RunConfig>, stages: &[Stage]) -> Result<Vec<Sample>, PipelineError> {
    let samples_root = required_dir(&config, &config.args.samples, "-p/--samples")?;
    let samples = discover_samples(&samples_root, &config.args.r1_pattern, &config.args.r2_pattern)?;
    info!("Found {} samples in {:?}", samples.len(), samples_root);

    let needs_genome = stages.iter().any(|s| matches!(s, Stage::Align | Stage::Count));
    let genome_dir = if needs_genome {
        let dir = required_dir(&config, &config.args.genome_dir, "-g/--genomedir")?;
        if !dir.is_dir() {
            return Err(PipelineError::InvalidConfig(format!("Genome directory {:?} does not exist", dir)));
        }
        Some(dir)
    } else {
        None
    };
    let gtf = match (&genome_dir, stages.contains(&Stage::Count)) {
        (Some(dir), true) => Some(find_gtf(dir)?),
        _ => None,
    };
    if stages.contains(&Stage::Count) {
        fs::create_dir_all(config.results_dir())?;
    }

    let version = check_version(&config.args.runtime, config.tool_timeout).await.map_err(|e| PipelineError::ToolExecution {
        tool: config.args.runtime.clone(),
        error: e.to_string(),
    })?;
    info!("Using {} version {}", config.args.runtime, version);

    for sample in &samples {
        for stage in stages {
            match (stage, &genome_dir, &gtf) {
                (Stage::Align, Some(dir), _) => align_sample(&config, sample, dir).await?,
                (Stage::Index, _, _) => index_sample(&config, sample).await?,
                (Stage::Count, _, Some(gtf)) => {
                    count_sample(&config, sample, gtf).await?;
                }
                _ => unreachable!("genome directory and annotation are resolved above"),
            }
        }
    }
    Ok(samples)
}


/// Full pipeline: align, index and count every sample, then merge.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    println!("\n-------------\n RNA-seq\n-------------\n");

    if config.args.counts_dir.is_some() {
        warn!("--counts-dir only applies to -m {}; merging this run's results instead", MERGE_COUNTS_MODULE);
    }
    let samples = run_stages(config.clone(), &[Stage::Align, Stage::Index, Stage::Count]).await?;
    let matrix = merge_from(&config, &config.results_dir())?;
    info!(
        "Processed {} samples; count matrix has {} genes",
        samples.len(),
        matrix.genes().len()
    );
    Ok(())
}


/// Dispatches a `--module` name to its pipeline entry point.
pub async fn run_module(config: Arc<RunConfig>, module: &str) -> Result<(), PipelineError> {
    match module {
        RNASEQ_MODULE => run(config).await,
        ALIGN_MODULE => run_stages(config, &[Stage::Align]).await.map(|_| ()),
        INDEX_MODULE => run_stages(config, &[Stage::Index]).await.map(|_| ()),
        COUNT_MODULE => run_stages(config, &[Stage::Count]).await.map(|_| ()),
        MERGE_COUNTS_MODULE => merge(&config).map(|_| ()),
        _ => Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn touch(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, [0x1F, 0x8B])?;
        Ok(())
    }

    #[test]
    fn test_discover_samples_sorted_paired_and_single() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        touch(&root.join("S2/s2_L001_R1_001.fastq.gz"))?;
        touch(&root.join("S1/s1_L002_R1_001.fastq.gz"))?;
        touch(&root.join("S1/s1_L001_R1_001.fastq.gz"))?;
        touch(&root.join("S1/s1_L001_R2_001.fastq.gz"))?;
        touch(&root.join("S1/s1_L002_R2_001.fastq.gz"))?;
        touch(&root.join("notes.txt"))?;

        let samples = discover_samples(root, "R1_001.fastq.gz", "R2_001.fastq.gz")?;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, "S1");
        assert_eq!(samples[0].r1, vec![root.join("S1/s1_L001_R1_001.fastq.gz"), root.join("S1/s1_L002_R1_001.fastq.gz")]);
        assert_eq!(samples[0].r2.len(), 2);
        assert_eq!(samples[1].name, "S2");
        assert!(samples[1].r2.is_empty());
        Ok(())
    }

    #[test]
    fn test_discover_samples_errors() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        assert!(matches!(
            discover_samples(root, "R1_001.fastq.gz", "R2_001.fastq.gz"),
            Err(PipelineError::InvalidConfig(_))
        ));

        fs::create_dir(root.join("S1"))?;
        assert!(matches!(
            discover_samples(root, "R1_001.fastq.gz", "R2_001.fastq.gz"),
            Err(PipelineError::InvalidConfig(_))
        ));

        touch(&root.join("S1/a_L001_R1_001.fastq.gz"))?;
        touch(&root.join("S1/a_L002_R1_001.fastq.gz"))?;
        touch(&root.join("S1/a_L001_R2_001.fastq.gz"))?;
        assert!(matches!(
            discover_samples(root, "R1_001.fastq.gz", "R2_001.fastq.gz"),
            Err(PipelineError::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn test_find_gtf() -> Result<()> {
        let dir = tempdir()?;
        assert!(find_gtf(dir.path()).is_err());
        fs::write(dir.path().join("genes.gtf"), "")?;
        assert_eq!(find_gtf(dir.path())?, dir.path().join("genes.gtf"));
        fs::write(dir.path().join("other.gtf"), "")?;
        assert!(matches!(find_gtf(dir.path()), Err(PipelineError::InvalidConfig(_))));
        Ok(())
    }
}
