use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, ValueEnum, Default, PartialEq)]
pub enum Strandedness {
    #[default]
    No,
    Yes,
    Reverse,
}

impl Strandedness {
    pub fn as_htseq(&self) -> &'static str {
        match self {
            Strandedness::No => "no",
            Strandedness::Yes => "yes",
            Strandedness::Reverse => "reverse",
        }
    }
}

#[derive(Debug, Clone, ValueEnum, Default, PartialEq)]
pub enum HtseqMode {
    #[default]
    Union,
    IntersectionStrict,
    IntersectionNonempty,
}

impl HtseqMode {
    pub fn as_htseq(&self) -> &'static str {
        match self {
            HtseqMode::Union => "union",
            HtseqMode::IntersectionStrict => "intersection-strict",
            HtseqMode::IntersectionNonempty => "intersection-nonempty",
        }
    }
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rnaseq-pipelines", version, about = "Wrapper for STAR alignment, samtools indexing, HTSeq counting and count merging")]
pub struct Arguments {

    #[arg(short, long, default_value = "rnaseq", help = "One of: rnaseq, align, index, count, merge_counts")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'p', long = "samples", help = "Path to directory with directories of samples")]
    pub samples: Option<String>,

    #[arg(short = 'b', long = "bind", help = "Path to bind into the container")]
    pub bind: Option<String>,

    #[arg(short = 's', long = "singularity", help = "Path to container image")]
    pub image: Option<String>,

    #[arg(short = 'g', long = "genomedir", help = "Path to STAR genome directory (must hold exactly one .gtf)")]
    pub genome_dir: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for count results. Defaults to the current directory.")]
    pub out_dir: Option<String>,

    #[arg(long, default_value = "singularity", help = "Container runtime executable")]
    pub runtime: String,

    #[arg(long, default_value_t = 20, help = "STAR threads; 0 uses all cores")]
    pub threads: usize,

    #[arg(long, default_value = "R1_001.fastq.gz")]
    pub r1_pattern: String,

    #[arg(long, default_value = "R2_001.fastq.gz")]
    pub r2_pattern: String,

    #[arg(long, default_value = "no", value_enum)]
    pub stranded: Strandedness,

    #[arg(long, default_value = "union", value_enum)]
    pub htseq_mode: HtseqMode,

    #[arg(long, default_value_t = 10)]
    pub min_aqual: u32,

    #[arg(long, help = "Directory of per-sample count files to merge. Defaults to <out>/results.")]
    pub counts_dir: Option<String>,

    #[arg(long, default_value = ".counts")]
    pub counts_suffix: String,

    #[arg(long, default_value_t = false, help = "Drop HTSeq summary rows (__no_feature, __ambiguous, ...) from the merged matrix")]
    pub drop_special_counters: bool,

    #[arg(long, help = "Run log. Defaults to <out>/rna_pipeline.log")]
    pub log_file: Option<String>,

    #[clap(long, help = "Seconds to wait for any single tool invocation")]
    pub tool_timeout: Option<u64>,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_wrapper() {
        let args = Arguments::parse_from(["rnaseq-pipelines", "-p", "samples", "-g", "genome"]);
        assert_eq!(args.module, "rnaseq");
        assert_eq!(args.threads, 20);
        assert_eq!(args.min_aqual, 10);
        assert_eq!(args.stranded, Strandedness::No);
        assert_eq!(args.htseq_mode.as_htseq(), "union");
        assert_eq!(args.counts_suffix, ".counts");
        assert_eq!(args.samples.as_deref(), Some("samples"));
        assert!(!args.drop_special_counters);
    }

    #[test]
    fn test_value_enums() {
        let args = Arguments::parse_from([
            "rnaseq-pipelines",
            "-m", "count",
            "--stranded", "reverse",
            "--htseq-mode", "intersection-strict",
        ]);
        assert_eq!(args.module, "count");
        assert_eq!(args.stranded.as_htseq(), "reverse");
        assert_eq!(args.htseq_mode, HtseqMode::IntersectionStrict);
    }
}
