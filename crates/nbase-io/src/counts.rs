//! Gene-level total read counts.
//!
//! Expected format: `gene_id, <sample1>, <sample2>, ...` with one row per gene.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::{table_reader, SampleId};

/// Total RNA-seq read counts of one gene across samples.
#[derive(Clone, Debug)]
pub struct GeneCounts {
    pub gene_id: String,
    pub sample_ids: Vec<SampleId>,
    pub counts: Vec<u64>,
}

impl GeneCounts {
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }
}

/// Load the counts row of `gene_id`.
///
/// The lookup is an exact match on the first column. Returns `Ok(None)` when the
/// gene is absent so the caller can classify the failure.
pub fn load_gene_counts<P: AsRef<Path>>(path: P, gene_id: &str) -> Result<Option<GeneCounts>> {
    let path = path.as_ref();
    let mut rdr = table_reader(path)?;
    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err(anyhow!(
            "Counts file {} needs at least 2 columns: gene_id, <samples...>",
            path.display()
        ));
    }
    let sample_ids: Vec<SampleId> = headers.iter().skip(1).map(|s| s.to_string()).collect();

    for result in rdr.records() {
        let record = result?;
        if record.get(0) != Some(gene_id) {
            continue;
        }
        if record.len() != headers.len() {
            return Err(anyhow!(
                "Counts row for {} has {} fields, header has {}",
                gene_id,
                record.len(),
                headers.len()
            ));
        }
        let counts = record
            .iter()
            .skip(1)
            .zip(&sample_ids)
            .map(|(raw, sample)| parse_count(raw, gene_id, sample))
            .collect::<Result<Vec<u64>>>()?;
        return Ok(Some(GeneCounts {
            gene_id: gene_id.to_string(),
            sample_ids,
            counts,
        }));
    }

    Ok(None)
}

fn parse_count(raw: &str, gene_id: &str, sample: &str) -> Result<u64> {
    let value: f64 = raw
        .parse()
        .map_err(|_| anyhow!("Non-numeric count '{}' for {} in sample {}", raw, gene_id, sample))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("Invalid count {} for {} in sample {}", value, gene_id, sample));
    }
    Ok(value.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn counts_file() -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "gene_id\tS1\tS2\tS3").unwrap();
        writeln!(f, "ENSG01\t10\t20\t30").unwrap();
        writeln!(f, "ENSG02\t1\t2\t3").unwrap();
        f
    }

    #[test]
    fn test_load_gene_counts_exact_match() {
        let f = counts_file();
        let counts = load_gene_counts(f.path(), "ENSG02").unwrap().unwrap();
        assert_eq!(counts.sample_ids, vec!["S1", "S2", "S3"]);
        assert_eq!(counts.counts, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_gene_counts_absent() {
        let f = counts_file();
        assert!(load_gene_counts(f.path(), "ENSG0").unwrap().is_none());
    }

    #[test]
    fn test_load_gene_counts_rejects_negative() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "gene_id,S1").unwrap();
        writeln!(f, "G,-4").unwrap();
        assert!(load_gene_counts(f.path(), "G").is_err());
    }
}
