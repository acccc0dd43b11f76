//! Small auxiliary tables: unique fSNP lists, allelic-imbalance estimates and
//! reference panel sample descriptions.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::{find_col, open_text, require_col, table_reader, SnpId};
use std::io::BufRead;

/// Reference-mapping bias estimate of one fSNP, on the log-odds scale of the
/// alt read fraction (0 = unbiased).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AiEstimate {
    pub mean: f64,
    pub sd: f64,
}

/// One panel individual from the sample description file.
#[derive(Clone, Debug, PartialEq)]
pub struct PanelSample {
    pub id: String,
    pub population: String,
    pub group: String,
}

/// Load the unique fSNPs of `gene_id` (columns `gene_id, id`).
///
/// Returns `Ok(None)` when the file has no entry for the gene.
pub fn load_unique_fsnps<P: AsRef<Path>>(path: P, gene_id: &str) -> Result<Option<HashSet<SnpId>>> {
    let path = path.as_ref();
    let mut rdr = table_reader(path)?;
    let headers = rdr.headers()?.clone();
    let gene_idx = require_col(&headers, &["gene_id", "gene"], path)?;
    let id_idx = require_col(&headers, &["id", "snp", "fsnp"], path)?;

    let mut found = false;
    let mut ids = HashSet::new();
    for result in rdr.records() {
        let record = result?;
        if record.get(gene_idx) != Some(gene_id) {
            continue;
        }
        found = true;
        if let Some(id) = record.get(id_idx).and_then(SnpId::parse) {
            ids.insert(id);
        }
    }
    Ok(found.then_some(ids))
}

/// Load allelic-imbalance estimates keyed by fSNP id.
///
/// Columns: `id`, `ai_mean` (or `AI_post`), `ai_sd` (or `AI_sd`).
pub fn load_ai_estimates<P: AsRef<Path>>(path: P) -> Result<HashMap<SnpId, AiEstimate>> {
    let path = path.as_ref();
    let mut rdr = table_reader(path)?;
    let headers = rdr.headers()?.clone();
    let id_idx = require_col(&headers, &["id", "snp"], path)?;
    let mean_idx = require_col(&headers, &["ai_mean", "AI_post", "mean"], path)?;
    let sd_idx = require_col(&headers, &["ai_sd", "AI_sd", "sd"], path)?;

    let mut estimates = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let Some(id) = record.get(id_idx).and_then(SnpId::parse) else {
            continue;
        };
        let parse = |idx: usize| -> Result<f64> {
            let raw = record.get(idx).unwrap_or("");
            raw.parse::<f64>()
                .map_err(|_| anyhow!("Invalid AI estimate '{}' for {} in {}", raw, id, path.display()))
        };
        let mean = parse(mean_idx)?;
        let sd = parse(sd_idx)?;
        if mean.is_finite() && sd.is_finite() && sd >= 0.0 {
            estimates.insert(id, AiEstimate { mean, sd });
        }
    }
    Ok(estimates)
}

/// Load a panel sample description (`ID POP GROUP [SEX]`, whitespace separated).
///
/// Row order must match the individual order of the haplotype file.
pub fn load_panel_samples<P: AsRef<Path>>(path: P) -> Result<Vec<PanelSample>> {
    let path = path.as_ref();
    let mut lines = open_text(path)?.lines();
    let header = lines
        .next()
        .ok_or_else(|| anyhow!("Sample file {} is empty", path.display()))??;
    let header_rec = csv::StringRecord::from(header.split_whitespace().collect::<Vec<_>>());
    let id_idx = require_col(&header_rec, &["ID", "sample"], path)?;
    let pop_idx = require_col(&header_rec, &["POP", "population"], path)?;
    let group_idx = find_col(&header_rec, &["GROUP", "super_pop"]);

    let mut samples = Vec::new();
    for line in lines {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let get = |i: usize| fields.get(i).copied().unwrap_or("").to_string();
        samples.push(PanelSample {
            id: get(id_idx),
            population: get(pop_idx),
            group: group_idx.map(get).unwrap_or_default(),
        });
    }
    Ok(samples)
}

/// Haplotype column indices of the individuals belonging to `population`
/// (matched against either the population or the group label).
pub fn population_haplotypes(samples: &[PanelSample], population: &str) -> Vec<usize> {
    samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.population == population || s.group == population)
        .flat_map(|(k, _)| [2 * k, 2 * k + 1])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_unique_fsnps_gene_absent_vs_present() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "gene_id\tid").unwrap();
        writeln!(f, "G1\t100:A:G").unwrap();
        writeln!(f, "G1\t300:C:T").unwrap();
        writeln!(f, "G2\t500:C:T").unwrap();

        let ids = load_unique_fsnps(f.path(), "G1").unwrap().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&SnpId::new(100, "A", "G")));
        assert!(load_unique_fsnps(f.path(), "G3").unwrap().is_none());
    }

    #[test]
    fn test_ai_estimates() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "id,AI_post,AI_sd").unwrap();
        writeln!(f, "100:A:G,0.2,0.05").unwrap();
        writeln!(f, "bad,0.1,0.1").unwrap();
        let est = load_ai_estimates(f.path()).unwrap();
        assert_eq!(est.len(), 1);
        assert_eq!(est[&SnpId::new(100, "A", "G")], AiEstimate { mean: 0.2, sd: 0.05 });
    }

    #[test]
    fn test_panel_samples_population_columns() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "ID POP GROUP SEX").unwrap();
        writeln!(f, "HG1 GBR EUR 1").unwrap();
        writeln!(f, "HG2 YRI AFR 2").unwrap();
        writeln!(f, "HG3 TSI EUR 2").unwrap();
        let samples = load_panel_samples(f.path()).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(population_haplotypes(&samples, "EUR"), vec![0, 1, 4, 5]);
        assert_eq!(population_haplotypes(&samples, "YRI"), vec![2, 3]);
    }
}
