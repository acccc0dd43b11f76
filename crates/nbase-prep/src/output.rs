//! Per-gene diagnostic tables and the optional input snapshot.

use anyhow::Context;
use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::ase::AseCounts;
use crate::config::{PrepConfig, PreparedModel};
use crate::error::Result;
use crate::fisher::FisherResult;
use crate::ledger::ExclusionLedger;
use crate::outcome::Outcome;
use crate::pipeline::PreparedGene;
use crate::stan_input::StanInput;
use crate::tagging::TagTable;

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::with_capacity(64 * 1024, file))
}

/// `<gene>.excluded.tsv`; nothing is written for an empty ledger.
pub fn write_exclusions(dir: &Path, ledger: &ExclusionLedger) -> Result<Option<PathBuf>> {
    if ledger.is_empty() {
        return Ok(None);
    }
    let path = dir.join(format!("{}.excluded.tsv", ledger.gene_id()));
    let mut w = create(&path)?;
    writeln!(w, "Gene_id\tid\treason")?;
    for e in ledger.entries() {
        writeln!(w, "{}\t{}\t{}", ledger.gene_id(), e.id, e.reason)?;
    }
    w.flush()?;
    Ok(Some(path))
}

/// `<gene>.tags.tsv`: one row per (tag, member).
pub fn write_tags(dir: &Path, gene_id: &str, tags: &TagTable) -> Result<PathBuf> {
    let path = dir.join(format!("{}.tags.tsv", gene_id));
    let mut w = create(&path)?;
    writeln!(w, "Gene_id\ttag\tSNP")?;
    for group in &tags.groups {
        for member in &group.members {
            writeln!(w, "{}\t{}\t{}", gene_id, group.tag, member)?;
        }
    }
    w.flush()?;
    Ok(path)
}

/// `<gene>.ase_counts.tsv`: per sample, total and alt reads of every fSNP.
pub fn write_ase_counts(dir: &Path, gene_id: &str, ase: &AseCounts) -> Result<PathBuf> {
    let path = dir.join(format!("{}.ase_counts.tsv", gene_id));
    let mut w = create(&path)?;
    write!(w, "sample")?;
    for id in &ase.fsnps {
        write!(w, "\t{}.m\t{}.n", id, id)?;
    }
    writeln!(w)?;
    for (i, sample) in ase.sample_ids.iter().enumerate() {
        write!(w, "{}", sample)?;
        for j in 0..ase.fsnps.len() {
            write!(w, "\t{}\t{}", ase.m[i][j], ase.n[i][j])?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(path)
}

/// `<gene>.fisher.tsv`: heterozygosity test of every fSNP that reached it.
pub fn write_fisher(dir: &Path, gene_id: &str, results: &[FisherResult]) -> Result<PathBuf> {
    let path = dir.join(format!("{}.fisher.tsv", gene_id));
    let mut w = create(&path)?;
    writeln!(w, "Gene_id\tid\todds_ratio\tp_value")?;
    for r in results {
        writeln!(w, "{}\t{}\t{}\t{}", gene_id, r.id, r.odds_ratio, r.p_value)?;
    }
    w.flush()?;
    Ok(path)
}

#[derive(Serialize)]
struct Snapshot<'a> {
    gene_id: &'a str,
    model: Option<PreparedModel>,
    quantiles: &'a [f64],
    #[serde(skip_serializing_if = "Option::is_none")]
    ai_extreme: Option<f64>,
    result: &'a Outcome<Vec<StanInput>>,
}

/// `<gene>.stan_input.json`: every prepared input with the reporting
/// quantiles.
pub fn write_stan_inputs(dir: &Path, prepared: &PreparedGene) -> Result<PathBuf> {
    let path = dir.join(format!("{}.stan_input.json", prepared.gene.id));
    let snapshot = Snapshot {
        gene_id: &prepared.gene.id,
        model: prepared.model(),
        quantiles: &prepared.quantiles,
        ai_extreme: prepared.ai_extreme(),
        result: &prepared.result,
    };
    let mut w = create(&path)?;
    serde_json::to_writer_pretty(&mut w, &snapshot)
        .with_context(|| format!("writing {}", path.display()))?;
    w.flush()?;
    Ok(path)
}

/// `<gene>.status.tsv`: model used, number of inputs and any degraded
/// reason.
pub fn write_status(dir: &Path, prepared: &PreparedGene) -> Result<PathBuf> {
    let path = dir.join(format!("{}.status.tsv", prepared.gene.id));
    let mut w = create(&path)?;
    writeln!(w, "Gene_id\tmodel\tn_inputs\tstatus")?;
    let model = prepared
        .model()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "NA".to_string());
    let status = match (&prepared.result, &prepared.ase_fallback) {
        (Outcome::Degraded(reason), _) => reason.clone(),
        (Outcome::Success(_), Some(fallback)) => format!("count-only: {}", fallback),
        (Outcome::Success(_), None) => "ok".to_string(),
    };
    writeln!(
        w,
        "{}\t{}\t{}\t{}",
        prepared.gene.id,
        model,
        prepared.n_inputs(),
        status
    )?;
    w.flush()?;
    Ok(path)
}

/// Write every artifact of a prepared gene into `config.out_dir`.
pub fn write_outputs(config: &PrepConfig, prepared: &PreparedGene) -> Result<Vec<PathBuf>> {
    let dir = config.out_dir.as_path();
    let mut written = Vec::new();
    written.extend(write_exclusions(dir, &prepared.ledger)?);
    if config.tag_threshold.is_enabled() && prepared.tags.n_tags() > 0 {
        written.push(write_tags(dir, &prepared.gene.id, &prepared.tags)?);
    }
    if !prepared.fisher.is_empty() {
        written.push(write_fisher(dir, &prepared.gene.id, &prepared.fisher)?);
    }
    if config.save_input {
        written.push(write_stan_inputs(dir, prepared)?);
        if let Some(ase) = &prepared.ase {
            written.push(write_ase_counts(dir, &prepared.gene.id, ase)?);
        }
    }
    written.push(write_status(dir, prepared)?);
    for path in &written {
        info!("Wrote {}", path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ExclusionReason;
    use crate::tagging::TagGroup;
    use nbase_io::SnpId;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_exclusions_written_only_when_present() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ExclusionLedger::new("G1");
        assert!(write_exclusions(dir.path(), &ledger).unwrap().is_none());

        ledger.record(&SnpId::new(100, "A", "G"), ExclusionReason::Homozygous);
        ledger.record_raw("rs9", ExclusionReason::NotInPanel);
        let path = write_exclusions(dir.path(), &ledger).unwrap().unwrap();
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Gene_id\tid\treason");
        assert_eq!(lines[1], "G1\t100:A:G\thomozygous in all samples");
        assert_eq!(lines[2], "G1\trs9\tnot in reference panel");
    }

    #[test]
    fn test_tag_table_rows() {
        let dir = TempDir::new().unwrap();
        let a = SnpId::new(100, "A", "G");
        let b = SnpId::new(200, "C", "T");
        let tags = TagTable {
            groups: vec![TagGroup {
                tag: a.clone(),
                members: vec![a, b],
            }],
        };
        let text = fs::read_to_string(write_tags(dir.path(), "G1", &tags).unwrap()).unwrap();
        assert_eq!(text, "Gene_id\ttag\tSNP\nG1\t100:A:G\t100:A:G\nG1\t100:A:G\t200:C:T\n");
    }

    #[test]
    fn test_fisher_table_rows() {
        let dir = TempDir::new().unwrap();
        let results = vec![
            FisherResult {
                id: SnpId::new(100, "A", "G"),
                odds_ratio: 2.5,
                p_value: 0.5,
            },
            FisherResult {
                id: SnpId::new(300, "G", "A"),
                odds_ratio: f64::INFINITY,
                p_value: 0.004,
            },
        ];
        let text = fs::read_to_string(write_fisher(dir.path(), "G1", &results).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Gene_id\tid\todds_ratio\tp_value");
        assert_eq!(lines[1], "G1\t100:A:G\t2.5\t0.5");
        assert_eq!(lines[2], "G1\t300:G:A\tinf\t0.004");
    }

    #[test]
    fn test_ase_counts_layout() {
        let dir = TempDir::new().unwrap();
        let ase = AseCounts {
            sample_ids: vec!["S1".into(), "S2".into()],
            fsnps: vec![SnpId::new(100, "A", "G")],
            usable: vec![true],
            m: vec![vec![7], vec![0]],
            n: vec![vec![3], vec![0]],
            informative: vec![true, false],
            ai: vec![None],
            ai_extreme: None,
        };
        let text = fs::read_to_string(write_ase_counts(dir.path(), "G1", &ase).unwrap()).unwrap();
        assert_eq!(text, "sample\t100:A:G.m\t100:A:G.n\nS1\t7\t3\nS2\t0\t0\n");
    }
}
