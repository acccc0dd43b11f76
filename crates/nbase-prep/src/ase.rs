//! Allele-specific read aggregation over the usable fSNPs of a gene.
//!
//! Excluded fSNPs and uninformative individuals keep their columns and rows
//! with zeroed cells, so the fSNP layout used for phasing is unchanged.

use log::{debug, info};
use nbase_io::{load_ai_estimates, load_unique_fsnps, AiEstimate, SnpId};
use ndarray::Array2;
use serde::Serialize;

use crate::config::PrepConfig;
use crate::error::Result;
use crate::fsnp::FsnpGenotypes;
use crate::outcome::Outcome;

pub const NO_UNIQUE_FSNPS: &str = "no unique fSNPs for gene";
pub const NO_FSNPS_FOR_ASE: &str = "no fSNPs usable for ASE";

/// ASE reads per sample and fSNP after filtering.
#[derive(Clone, Debug, Serialize)]
pub struct AseCounts {
    pub sample_ids: Vec<String>,
    /// Same columns, same order as the phasing fSNPs.
    pub fsnps: Vec<SnpId>,
    pub usable: Vec<bool>,
    /// Total reads, shape (n_samples, n_fsnps); non-zero only at usable
    /// heterozygous fSNPs of informative individuals.
    pub m: Vec<Vec<u32>>,
    /// Alt-allele reads, same shape as `m`.
    pub n: Vec<Vec<u32>>,
    pub informative: Vec<bool>,
    /// Reference-bias estimate per fSNP when an AI table was supplied.
    pub ai: Vec<Option<AiEstimate>>,
    /// Most extreme bias mean among fSNPs with reads.
    pub ai_extreme: Option<f64>,
}

impl AseCounts {
    pub fn n_informative(&self) -> usize {
        self.informative.iter().filter(|&&x| x).count()
    }

    pub fn usable_ids(&self) -> Vec<SnpId> {
        self.fsnps
            .iter()
            .zip(&self.usable)
            .filter(|&(_, &u)| u)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn total(&self, sample: usize) -> u32 {
        saturating_sum(self.m[sample].iter().copied())
    }

    pub fn has_ai(&self) -> bool {
        self.ai.iter().any(Option::is_some)
    }
}

/// Read totals clamp at `u32::MAX`.
pub(crate) fn saturating_sum<I: IntoIterator<Item = u32>>(reads: I) -> u32 {
    reads.into_iter().fold(0, u32::saturating_add)
}

/// Restrict fSNPs to those usable for ASE and keep the informative
/// individuals.
pub fn aggregate_ase(config: &PrepConfig, fsnps: &FsnpGenotypes) -> Result<Outcome<AseCounts>> {
    let n_fsnps = fsnps.n_fsnps();
    let mut usable = vec![true; n_fsnps];
    let mut ai: Vec<Option<AiEstimate>> = vec![None; n_fsnps];

    if let Some(path) = &config.inputs.ai_estimates {
        let table = load_ai_estimates(path)?;
        for (j, id) in fsnps.fsnps.iter().enumerate() {
            ai[j] = table.get(id).cloned();
            usable[j] = ai[j].is_some();
        }
    }
    if let Some(path) = &config.inputs.unique_fsnps {
        match load_unique_fsnps(path, &config.gene_id)? {
            Some(unique) => {
                for (j, id) in fsnps.fsnps.iter().enumerate() {
                    usable[j] &= unique.contains(id);
                }
            }
            None => return Ok(Outcome::degraded(NO_UNIQUE_FSNPS)),
        }
    }
    if !usable.iter().any(|&u| u) {
        return Ok(Outcome::degraded(NO_FSNPS_FOR_ASE));
    }

    let n_samples = fsnps.n_samples();
    let mut m = Array2::<u32>::zeros((n_samples, n_fsnps));
    let mut n = Array2::<u32>::zeros((n_samples, n_fsnps));
    for i in 0..n_samples {
        for j in (0..n_fsnps).filter(|&j| usable[j]) {
            if fsnps.genotypes[(i, j)] == 1 {
                m[(i, j)] = fsnps.ref_counts[(i, j)].saturating_add(fsnps.alt_counts[(i, j)]);
                n[(i, j)] = fsnps.alt_counts[(i, j)];
            }
        }
    }

    let min_ase = config.ase.min_ase;
    let mut informative = vec![false; n_samples];
    for i in 0..n_samples {
        let total = saturating_sum(m.row(i).iter().copied());
        if total > 0 && total >= min_ase {
            informative[i] = true;
        } else {
            m.row_mut(i).fill(0);
            n.row_mut(i).fill(0);
        }
    }
    let n_informative = informative.iter().filter(|&&x| x).count();
    debug!(
        "{} of {} samples have at least {} ASE reads",
        n_informative, n_samples, min_ase
    );
    if n_informative == 0 || n_informative < config.ase.min_ase_n {
        return Ok(Outcome::degraded(NO_FSNPS_FOR_ASE));
    }

    let ai_extreme = (0..n_fsnps)
        .filter(|&j| m.column(j).iter().any(|&x| x > 0))
        .filter_map(|j| ai[j].as_ref().map(|e| e.mean))
        .fold(None, |acc: Option<f64>, v| match acc {
            Some(best) if best.abs() >= v.abs() => Some(best),
            _ => Some(v),
        });

    info!(
        "{} usable ASE fSNPs, {} informative individuals",
        usable.iter().filter(|&&u| u).count(),
        n_informative
    );
    Ok(Outcome::Success(AseCounts {
        sample_ids: fsnps.sample_ids.clone(),
        fsnps: fsnps.fsnps.clone(),
        usable,
        m: m.outer_iter().map(|r| r.to_vec()).collect(),
        n: n.outer_iter().map(|r| r.to_vec()).collect(),
        informative,
        ai,
        ai_extreme,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AseThresholds, CisWindow, FsnpExclusion, InputPaths, ModelChoice, TagThreshold,
    };
    use ndarray::array;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn config(dir: &Path, min_ase_n: usize) -> PrepConfig {
        let p = |name: &str| -> PathBuf { dir.join(name) };
        PrepConfig {
            gene_id: "G1".into(),
            chrom: "22".into(),
            model: ModelChoice::Both,
            out_dir: dir.to_path_buf(),
            inputs: InputPaths {
                counts: p("counts.tsv"),
                exonic_snps: p("fsnps.tsv"),
                gene_coords: p("coords.tsv"),
                gene_coords_aux: None,
                variants: p("calls.vcf"),
                panel_legend: p("panel.legend"),
                panel_haplotypes: p("panel.hap"),
                panel_samples: None,
                unique_fsnps: None,
                covariates: None,
                extra_covariates: None,
                ai_estimates: None,
            },
            population: "EUR".into(),
            cis_window: CisWindow::Flank(1000),
            fsnp_exclusion: FsnpExclusion::None,
            tag_threshold: TagThreshold::Disabled,
            ase: AseThresholds {
                min_ase: 5,
                min_ase_n,
                min_ase_het: 1,
            },
            maf: 0.0,
            info: 0.0,
            prob: Vec::new(),
            threads: 1,
            save_input: false,
        }
    }

    fn fsnps() -> FsnpGenotypes {
        FsnpGenotypes {
            sample_ids: vec!["S1".into(), "S2".into(), "S3".into()],
            fsnps: vec![SnpId::new(100, "A", "G"), SnpId::new(200, "C", "T")],
            genotypes: array![[1, 1], [1, 0], [0, 1]],
            hap1: Array2::from_elem((3, 2), nbase_io::MISSING_GT),
            ref_counts: array![[3, 2], [10, 7], [9, 1]],
            alt_counts: array![[4, 2], [0, 0], [0, 1]],
            fisher: Vec::new(),
        }
    }

    #[test]
    fn test_reads_only_at_heterozygous_fsnps() {
        let dir = TempDir::new().unwrap();
        let ase = aggregate_ase(&config(dir.path(), 2), &fsnps())
            .unwrap()
            .success()
            .unwrap();
        assert_eq!(ase.m[0], vec![7, 4]);
        assert_eq!(ase.n[0], vec![4, 2]);
        assert_eq!(ase.m[1], vec![10, 0]);
        // S3 has 2 reads at its only het fSNP and is zeroed
        assert_eq!(ase.m[2], vec![0, 0]);
        assert_eq!(ase.informative, vec![true, true, false]);
        assert_eq!(ase.n_informative(), 2);
        assert!(ase.ai_extreme.is_none());
    }

    #[test]
    fn test_deep_counts_saturate() {
        let dir = TempDir::new().unwrap();
        let mut f = fsnps();
        f.ref_counts[(0, 0)] = u32::MAX - 1;
        f.alt_counts[(0, 0)] = 5;
        f.ref_counts[(0, 1)] = 10;
        let ase = aggregate_ase(&config(dir.path(), 2), &f)
            .unwrap()
            .success()
            .unwrap();
        assert_eq!(ase.m[0], vec![u32::MAX, 12]);
        assert_eq!(ase.total(0), u32::MAX);
        assert!(ase.informative[0]);
    }

    #[test]
    fn test_min_ase_n_unmet_degrades() {
        let dir = TempDir::new().unwrap();
        let out = aggregate_ase(&config(dir.path(), 3), &fsnps()).unwrap();
        assert_eq!(out.reason(), Some(NO_FSNPS_FOR_ASE));
    }

    #[test]
    fn test_unique_list_without_gene_degrades() {
        let dir = TempDir::new().unwrap();
        let unique = dir.path().join("unique.tsv");
        fs::write(&unique, "gene_id\tid\nG2\t100:A:G\n").unwrap();
        let mut cfg = config(dir.path(), 1);
        cfg.inputs.unique_fsnps = Some(unique);
        let out = aggregate_ase(&cfg, &fsnps()).unwrap();
        assert_eq!(out.reason(), Some(NO_UNIQUE_FSNPS));
    }

    #[test]
    fn test_unique_list_zeroes_other_columns() {
        let dir = TempDir::new().unwrap();
        let unique = dir.path().join("unique.tsv");
        fs::write(&unique, "gene_id\tid\nG1\t100:A:G\n").unwrap();
        let mut cfg = config(dir.path(), 1);
        cfg.inputs.unique_fsnps = Some(unique);
        let ase = aggregate_ase(&cfg, &fsnps()).unwrap().success().unwrap();
        assert_eq!(ase.usable, vec![true, false]);
        assert_eq!(ase.fsnps.len(), 2);
        assert_eq!(ase.m[0], vec![7, 0]);
        assert_eq!(ase.usable_ids(), vec![SnpId::new(100, "A", "G")]);
    }

    #[test]
    fn test_ai_table_restricts_and_reports_extreme() {
        let dir = TempDir::new().unwrap();
        let ai = dir.path().join("ai.tsv");
        fs::write(&ai, "id\tai_mean\tai_sd\n100:A:G\t-0.4\t0.1\n").unwrap();
        let mut cfg = config(dir.path(), 1);
        cfg.inputs.ai_estimates = Some(ai);
        let ase = aggregate_ase(&cfg, &fsnps()).unwrap().success().unwrap();
        assert_eq!(ase.usable, vec![true, false]);
        assert!(ase.has_ai());
        assert_eq!(ase.ai_extreme, Some(-0.4));
    }
}
