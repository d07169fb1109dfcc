// src/utils/counts.rs: Merging per-sample HTSeq count files into one matrix

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};
use fxhash::FxHashMap;
use log::{debug, info, warn};
use ndarray::Array2;

use crate::config::defs::{PipelineError, COUNTS_SUFFIX, GENE_ID_HEADER, HTSEQ_SPECIAL_PREFIX};
use crate::utils::file::{file_name_string, files_with_suffix, write_atomically};


#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub suffix: String,
    pub drop_special_counters: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            suffix: COUNTS_SUFFIX.to_string(),
            drop_special_counters: false,
        }
    }
}


/// One parsed count file.
#[derive(Debug, Clone)]
pub struct SampleCounts {
    pub sample: String,
    pub path: PathBuf,
    pub counts: FxHashMap<String, u64>,
    pub duplicates: usize,
}

impl SampleCounts {
    /// Removes HTSeq's `__no_feature`, `__ambiguous`, ... summary rows.
    pub fn drop_special_counters(&mut self) {
        self.counts.retain(|gene, _| !gene.starts_with(HTSEQ_SPECIAL_PREFIX));
    }
}


/// Count files in `dir` ending in `suffix`, sorted by path so column order
/// does not depend on directory listing order. `exclude` (the merge output)
/// is never returned even when it matches the suffix.
pub fn collect_count_files(dir: &Path, suffix: &str, exclude: Option<&Path>) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.exists() {
        return Err(PipelineError::InvalidConfig(format!("Count directory {:?} does not exist", dir)));
    }
    if !dir.is_dir() {
        return Err(PipelineError::InvalidConfig(format!("Count directory {:?} is not a directory", dir)));
    }
    let mut files = files_with_suffix(dir, suffix)?;
    if let Some(excluded) = exclude.and_then(|p| fs::canonicalize(p).ok()) {
        files.retain(|f| fs::canonicalize(f).map(|c| c != excluded).unwrap_or(true));
    }
    if files.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "No files matching *{} in {:?}",
            suffix, dir
        )));
    }
    Ok(files)
}


pub fn sample_name(path: &Path, suffix: &str) -> Result<String, PipelineError> {
    file_name_string(path)
        .and_then(|name| name.strip_suffix(suffix).map(str::to_string))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PipelineError::InvalidConfig(format!(
            "Cannot derive a sample name from {:?} with suffix {}",
            path, suffix
        )))
}


/// Parses a two-column `gene_id<TAB>count` file without header.
/// A gene id seen twice keeps its last count. Line numbers in errors are
/// physical lines, blank ones included.
pub fn read_sample_counts(path: &Path, suffix: &str) -> Result<SampleCounts, PipelineError> {
    let sample = sample_name(path, suffix)?;
    let file = File::open(path)
        .map_err(|e| PipelineError::IOError(format!("Cannot open {:?}: {}", path, e)))?;

    let parse_error = |line: u64, msg: String| PipelineError::Parse {
        path: path.to_path_buf(),
        line,
        msg,
    };

    let mut counts: FxHashMap<String, u64> = FxHashMap::default();
    let mut duplicates = 0usize;
    for (idx, raw) in BufReader::new(file).lines().enumerate() {
        let line = idx as u64 + 1;
        let raw = raw.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => parse_error(line, "line is not valid UTF-8".to_string()),
            _ => PipelineError::IOError(format!("Reading {:?}: {}", path, e)),
        })?;
        let text = raw.strip_suffix('\r').unwrap_or(&raw);
        if text.is_empty() {
            continue;
        }

        let fields: Vec<&str> = text.split('\t').collect();
        if fields.len() != 2 {
            return Err(parse_error(line, format!("expected 2 tab-separated fields, found {}", fields.len())));
        }
        let (gene_id, count_field) = (fields[0], fields[1]);
        if gene_id.is_empty() {
            return Err(parse_error(line, "empty gene id".to_string()));
        }
        if gene_id.trim() != gene_id {
            return Err(parse_error(line, format!("gene id {:?} has leading or trailing whitespace", gene_id)));
        }
        if count_field.is_empty() || !count_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(parse_error(line, format!("count {:?} is not a non-negative integer", count_field)));
        }
        let count = count_field.parse::<u64>().map_err(|_| {
            parse_error(line, format!("count {:?} does not fit in 64 bits", count_field))
        })?;

        if counts.insert(gene_id.to_string(), count).is_some() {
            warn!("Duplicate gene id {} in {:?} at line {}; keeping the last value", gene_id, path, line);
            duplicates += 1;
        }
    }

    debug!("Read {} genes for sample {} from {:?}", counts.len(), sample, path);
    Ok(SampleCounts {
        sample,
        path: path.to_path_buf(),
        counts,
        duplicates,
    })
}


/// Genes x samples count table. Genes are the sorted union over all samples;
/// a gene absent from a sample counts 0 there.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    genes: Vec<String>,
    samples: Vec<String>,
    counts: Array2<u64>,
}

impl CountMatrix {
    pub fn from_samples(samples: &[SampleCounts]) -> Result<Self, PipelineError> {
        let mut seen = BTreeSet::new();
        for s in samples {
            if !seen.insert(s.sample.as_str()) {
                return Err(PipelineError::InvalidConfig(format!("Sample {} appears more than once", s.sample)));
            }
        }

        let genes: Vec<String> = samples
            .iter()
            .flat_map(|s| s.counts.keys().map(String::as_str))
            .collect::<BTreeSet<&str>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let row_of: FxHashMap<&str, usize> = genes
            .iter()
            .enumerate()
            .map(|(i, g)| (g.as_str(), i))
            .collect();

        let mut counts = Array2::<u64>::zeros((genes.len(), samples.len()));
        for (col, s) in samples.iter().enumerate() {
            for (gene, count) in &s.counts {
                counts[[row_of[gene.as_str()], col]] = *count;
            }
        }

        Ok(CountMatrix {
            genes,
            samples: samples.iter().map(|s| s.sample.clone()).collect(),
            counts,
        })
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    pub fn get(&self, gene: &str, sample: &str) -> Option<u64> {
        let row = self.genes.binary_search_by(|g| g.as_str().cmp(gene)).ok()?;
        let col = self.samples.iter().position(|s| s == sample)?;
        Some(self.counts[[row, col]])
    }

    pub fn row(&self, gene: &str) -> Option<Vec<u64>> {
        let row = self.genes.binary_search_by(|g| g.as_str().cmp(gene)).ok()?;
        Some(self.counts.row(row).to_vec())
    }

    /// Writes the matrix as TSV with a `gene_id` header column. The file only
    /// appears once it has been fully written.
    pub fn write_tsv(&self, path: &Path) -> Result<(), PipelineError> {
        write_atomically(path, |out| {
            let mut writer = WriterBuilder::new()
                .delimiter(b'\t')
                .quote_style(QuoteStyle::Never)
                .from_writer(out);

            let mut header = Vec::with_capacity(self.samples.len() + 1);
            header.push(GENE_ID_HEADER);
            header.extend(self.samples.iter().map(String::as_str));
            writer.write_record(&header)?;

            for (gene, row) in self.genes.iter().zip(self.counts.rows()) {
                let mut fields = Vec::with_capacity(row.len() + 1);
                fields.push(gene.clone());
                fields.extend(row.iter().map(|c| c.to_string()));
                writer.write_record(&fields)?;
            }
            writer.flush()?;
            Ok(())
        })
        .map_err(|e| PipelineError::IOError(format!("Writing {:?}: {}", path, e)))
    }
}


/// Reads every count file in `dir`, joins them on gene id and writes the
/// matrix to `out_path`. Nothing is written unless every file parses.
///
/// # Arguments
///
/// * `dir` - Directory holding `<sample><suffix>` files.
/// * `out_path` - Destination TSV; parent directories are created.
/// * `options` - Suffix and HTSeq summary row handling.
///
/// # Returns
/// The merged matrix.
pub fn merge_counts(dir: &Path, out_path: &Path, options: &MergeOptions) -> Result<CountMatrix, PipelineError> {
    let files = collect_count_files(dir, &options.suffix, Some(out_path))?;
    info!("Merging {} count files from {:?}", files.len(), dir);

    let mut samples = Vec::with_capacity(files.len());
    for file in &files {
        let mut sample = read_sample_counts(file, &options.suffix)?;
        if options.drop_special_counters {
            sample.drop_special_counters();
        }
        samples.push(sample);
    }

    let matrix = CountMatrix::from_samples(&samples)?;

    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    matrix.write_tsv(out_path)?;
    info!(
        "Wrote {} genes x {} samples to {:?}",
        matrix.genes().len(),
        matrix.samples().len(),
        out_path
    );
    Ok(matrix)
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn test_sample_name_strips_suffix() -> Result<()> {
        assert_eq!(sample_name(Path::new("/out/results/S1.counts"), ".counts")?, "S1");
        assert_eq!(sample_name(Path::new("liver.rep2.counts"), ".counts")?, "liver.rep2");
        assert!(matches!(
            sample_name(Path::new("/out/.counts"), ".counts"),
            Err(PipelineError::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn test_read_sample_counts_last_value_wins() -> Result<()> {
        let dir = tempdir()?;
        let path = write(dir.path(), "S1.counts", "G1\t5\nG2\t3\nG1\t9\n")?;
        let sample = read_sample_counts(&path, ".counts")?;
        assert_eq!(sample.sample, "S1");
        assert_eq!(sample.counts.len(), 2);
        assert_eq!(sample.counts["G1"], 9);
        assert_eq!(sample.duplicates, 1);
        Ok(())
    }

    #[test]
    fn test_read_sample_counts_skips_blank_lines_and_handles_crlf() -> Result<()> {
        let dir = tempdir()?;
        let path = write(dir.path(), "S1.counts", "G1\t5\r\n\r\nG2\t3\r\n")?;
        let sample = read_sample_counts(&path, ".counts")?;
        assert_eq!(sample.counts["G1"], 5);
        assert_eq!(sample.counts["G2"], 3);
        Ok(())
    }

    #[test]
    fn test_read_sample_counts_rejects_bad_counts() -> Result<()> {
        let dir = tempdir()?;
        for (name, contents, bad_line) in [
            ("neg.counts", "G1\t5\nG2\t-1\n", 2),
            ("float.counts", "G1\t5.5\n", 1),
            ("missing.counts", "G1\t5\nG2\t3\nG3\n", 3),
            ("empty_id.counts", "\t4\n", 1),
        ] {
            let path = write(dir.path(), name, contents)?;
            match read_sample_counts(&path, ".counts") {
                Err(PipelineError::Parse { path: p, line, .. }) => {
                    assert_eq!(p, path);
                    assert_eq!(line, bad_line, "{}", name);
                }
                other => panic!("{}: expected parse error, got {:?}", name, other),
            }
        }
        Ok(())
    }

    #[test]
    fn test_parse_error_line_counts_blank_lines() -> Result<()> {
        let dir = tempdir()?;
        let path = write(dir.path(), "S1.counts", "G1\t5\n\nG2\t3\tx\n")?;
        match read_sample_counts(&path, ".counts") {
            Err(PipelineError::Parse { line, msg, .. }) => {
                assert_eq!(line, 3);
                assert!(msg.contains("found 3"), "{}", msg);
            }
            other => panic!("expected parse error, got {:?}", other),
        }

        let path = write(dir.path(), "S2.counts", "\r\n\r\nG1\tmany\r\n")?;
        assert!(matches!(
            read_sample_counts(&path, ".counts"),
            Err(PipelineError::Parse { line: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_whitespace_around_fields_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        for (name, contents, bad_line) in [
            ("trailing_id.counts", "G1\t5\nG1 \t9\n", 2),
            ("leading_id.counts", " G1\t5\n", 1),
            ("padded_count.counts", "G1\t5\nG2\t 7\n", 2),
            ("plus_count.counts", "G1\t+5\n", 1),
        ] {
            let path = write(dir.path(), name, contents)?;
            match read_sample_counts(&path, ".counts") {
                Err(PipelineError::Parse { line, .. }) => assert_eq!(line, bad_line, "{}", name),
                other => panic!("{}: expected parse error, got {:?}", name, other),
            }
        }
        Ok(())
    }

    #[test]
    fn test_drop_special_counters() -> Result<()> {
        let dir = tempdir()?;
        let path = write(
            dir.path(),
            "S1.counts",
            "ENSG01\t12\n__no_feature\t400\n__ambiguous\t3\n__alignment_not_unique\t80\n",
        )?;
        let mut sample = read_sample_counts(&path, ".counts")?;
        sample.drop_special_counters();
        assert_eq!(sample.counts.len(), 1);
        assert_eq!(sample.counts["ENSG01"], 12);
        Ok(())
    }

    #[test]
    fn test_from_samples_rejects_duplicate_sample_columns() -> Result<()> {
        let dir = tempdir()?;
        let path = write(dir.path(), "S1.counts", "G1\t1\n")?;
        let sample = read_sample_counts(&path, ".counts")?;
        let result = CountMatrix::from_samples(&[sample.clone(), sample]);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_matrix_accessors() -> Result<()> {
        let dir = tempdir()?;
        let a = read_sample_counts(&write(dir.path(), "A.counts", "G2\t3\nG1\t5\n")?, ".counts")?;
        let b = read_sample_counts(&write(dir.path(), "B.counts", "G3\t1\nG2\t7\n")?, ".counts")?;
        let matrix = CountMatrix::from_samples(&[a, b])?;

        assert_eq!(matrix.genes(), ["G1", "G2", "G3"]);
        assert_eq!(matrix.samples(), ["A", "B"]);
        assert_eq!(matrix.counts().dim(), (3, 2));
        assert_eq!(matrix.get("G3", "A"), Some(0));
        assert_eq!(matrix.get("G3", "B"), Some(1));
        assert_eq!(matrix.get("G9", "A"), None);
        assert_eq!(matrix.row("G2"), Some(vec![3, 7]));
        Ok(())
    }

    #[test]
    fn test_collect_count_files_missing_dir() {
        let result = collect_count_files(Path::new("/definitely/not/here"), ".counts", None);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}
