/// Functions and structs for building the command lines of the containerized tools

use std::any::Any;
use anyhow::{anyhow, Result};
use crate::config::defs::{RunConfig, TOOL_PATHS, STAR_TAG, SAMTOOLS_TAG, HTSEQ_TAG};


pub mod star {
    use std::path::PathBuf;
    use crate::config::defs::RunConfig;

    #[derive(Debug, Clone)]
    pub struct StarConfig {
        pub genome_dir: PathBuf,
        pub r1: Vec<PathBuf>,
        pub r2: Vec<PathBuf>,
        pub gzipped: bool,
    }

    fn join_lanes(files: &[PathBuf]) -> String {
        files
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn arg_generator(config: &RunConfig, star_config: &StarConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();

        let num_cores: usize = match config.args.threads {
            0 => num_cpus::get(),
            n => n,
        };
        args_vec.push("--runThreadN".to_string());
        args_vec.push(num_cores.to_string());

        args_vec.push("--genomeDir".to_string());
        args_vec.push(star_config.genome_dir.to_string_lossy().into_owned());

        if star_config.gzipped {
            args_vec.push("--readFilesCommand".to_string());
            args_vec.push("zcat".to_string());
        }

        args_vec.push("--readFilesIn".to_string());
        args_vec.push(join_lanes(&star_config.r1));
        if !star_config.r2.is_empty() {
            args_vec.push(join_lanes(&star_config.r2));
        }

        args_vec.push("--outSAMtype".to_string());
        args_vec.push("BAM".to_string());
        args_vec.push("SortedByCoordinate".to_string());
        args_vec.push("--quantMode".to_string());
        args_vec.push("GeneCounts".to_string());

        args_vec
    }
}

pub mod samtools {
    use crate::config::defs::SamtoolsSubcommand;

    #[derive(Debug, Clone)]
    pub struct SamtoolsConfig {
        pub subcommand: SamtoolsSubcommand,
        pub subcommand_fields: Vec<(String, Option<String>)>,
    }

    pub fn arg_generator(samtools_config: &SamtoolsConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();

        match samtools_config.subcommand {
            SamtoolsSubcommand::Index => {
                args_vec.push("index".to_string());
            }
        }

        for (key, value) in &samtools_config.subcommand_fields {
            args_vec.push(key.clone());
            if let Some(v) = value {
                args_vec.push(v.clone());
            }
        }

        args_vec
    }
}

pub mod htseq {
    use std::path::PathBuf;
    use crate::config::defs::RunConfig;

    #[derive(Debug, Clone)]
    pub struct HtseqConfig {
        pub bam: PathBuf,
        pub gtf: PathBuf,
    }

    pub fn arg_generator(config: &RunConfig, htseq_config: &HtseqConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-m".to_string());
        args_vec.push(config.args.htseq_mode.as_htseq().to_string());
        args_vec.push("-r".to_string());
        args_vec.push("pos".to_string());
        args_vec.push("-a".to_string());
        args_vec.push(config.args.min_aqual.to_string());
        args_vec.push(format!("--stranded={}", config.args.stranded.as_htseq()));
        args_vec.push("-f".to_string());
        args_vec.push("bam".to_string());
        args_vec.push(htseq_config.bam.to_string_lossy().into_owned());
        args_vec.push(htseq_config.gtf.to_string_lossy().into_owned());
        args_vec
    }
}

pub mod container {
    use anyhow::{anyhow, Result};
    use crate::config::defs::RunConfig;

    /// Wraps a tool path and its arguments as `<runtime> run [--bind <dir>] <image> <tool> <args...>`.
    pub fn wrap(config: &RunConfig, tool_path: &str, tool_args: Vec<String>) -> Result<(String, Vec<String>)> {
        let image = config
            .args
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("A container image (-s/--singularity) is required"))?;

        let mut args_vec: Vec<String> = vec!["run".to_string()];
        if let Some(bind) = &config.args.bind {
            args_vec.push("--bind".to_string());
            args_vec.push(bind.clone());
        }
        args_vec.push(image.clone());
        args_vec.push(tool_path.to_string());
        args_vec.extend(tool_args);

        Ok((config.args.runtime.clone(), args_vec))
    }
}


/// Builds the argument vector for `tool`. `tool_config` must be the
/// matching config struct (`StarConfig`, `SamtoolsConfig`, `HtseqConfig`).
pub fn generate_cli(tool: &str, config: &RunConfig, tool_config: Option<&dyn Any>) -> Result<Vec<String>> {
    let cmd = match tool {
        STAR_TAG => {
            let star_config = tool_config
                .and_then(|c| c.downcast_ref::<star::StarConfig>())
                .ok_or_else(|| anyhow!("{} requires a StarConfig", tool))?;
            star::arg_generator(config, star_config)
        }
        SAMTOOLS_TAG => {
            let samtools_config = tool_config
                .and_then(|c| c.downcast_ref::<samtools::SamtoolsConfig>())
                .ok_or_else(|| anyhow!("{} requires a SamtoolsConfig", tool))?;
            samtools::arg_generator(samtools_config)
        }
        HTSEQ_TAG => {
            let htseq_config = tool_config
                .and_then(|c| c.downcast_ref::<htseq::HtseqConfig>())
                .ok_or_else(|| anyhow!("{} requires an HtseqConfig", tool))?;
            htseq::arg_generator(config, htseq_config)
        }
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    };

    Ok(cmd)
}


/// Full containerized command line for `tool`: program plus arguments.
pub fn generate_container_cli(tool: &str, config: &RunConfig, tool_config: Option<&dyn Any>) -> Result<(String, Vec<String>)> {
    let tool_path = TOOL_PATHS
        .get(tool)
        .ok_or_else(|| anyhow!("No container path known for {}", tool))?;
    let tool_args = generate_cli(tool, config, tool_config)?;
    container::wrap(config, tool_path, tool_args)
}
