//! fSNP resolution: the exonic SNPs of a gene whose genotypes and allele
//! specific counts can be used to phase the study samples against the panel.

use anyhow::anyhow;
use log::{info, warn};
use nbase_io::{
    load_exonic_snps, load_panel_samples, population_haplotypes, resolve_variants,
    GenotypeAseTable, HaplotypeMatrix, SnpId, VariantIssue, MISSING_GT,
};
use ndarray::{Array2, Axis};
use std::collections::HashSet;

use crate::ase::{aggregate_ase, AseCounts};
use crate::config::{FsnpExclusion, PrepConfig};
use crate::error::{PrepError, Result};
use crate::fisher::{fisher_heterozygosity_test, FisherResult};
use crate::ledger::{ExclusionLedger, ExclusionReason};
use crate::outcome::Outcome;

pub const NO_FSNPS_IN_VARIANTS: &str = "no fSNPs with genotypes in variant file";
pub const NO_FSNPS_IN_PANEL: &str = "no fSNPs in reference panel";
pub const NO_FSNPS_PASSED_FISHER: &str = "no fSNPs passed heterozygosity test";

/// Usable fSNPs with genotypes and ASE counts aligned to the counts samples.
#[derive(Clone, Debug)]
pub struct FsnpGenotypes {
    pub sample_ids: Vec<String>,
    pub fsnps: Vec<SnpId>,
    /// shape: (n_samples, n_fsnps); alt allele count or `MISSING_GT`
    pub genotypes: Array2<i8>,
    /// shape: (n_samples, n_fsnps); allele on haplotype 1 of a phased call or
    /// `MISSING_GT`
    pub hap1: Array2<i8>,
    /// shape: (n_samples, n_fsnps)
    pub ref_counts: Array2<u32>,
    /// shape: (n_samples, n_fsnps)
    pub alt_counts: Array2<u32>,
    /// Heterozygosity tests, empty unless a p-value cutoff was requested.
    pub fisher: Vec<FisherResult>,
}

impl FsnpGenotypes {
    /// Re-key a variant table (SNPs as rows) to `samples` (as rows). Samples
    /// absent from the variant file get missing genotypes and no reads.
    fn aligned(table: &GenotypeAseTable, samples: &[String]) -> Self {
        let n = samples.len();
        let m = table.snps.len();
        let mut genotypes = Array2::from_elem((n, m), MISSING_GT);
        let mut hap1 = Array2::from_elem((n, m), MISSING_GT);
        let mut ref_counts = Array2::zeros((n, m));
        let mut alt_counts = Array2::zeros((n, m));
        let mut absent = 0usize;
        for (i, sample) in samples.iter().enumerate() {
            let Some(col) = table.sample_index(sample) else {
                absent += 1;
                continue;
            };
            genotypes.row_mut(i).assign(&table.genotypes.column(col));
            hap1.row_mut(i).assign(&table.hap1.column(col));
            ref_counts.row_mut(i).assign(&table.ref_counts.column(col));
            alt_counts.row_mut(i).assign(&table.alt_counts.column(col));
        }
        if absent > 0 {
            warn!(
                "{} of {} samples have no genotypes in the variant file",
                absent, n
            );
        }
        Self {
            sample_ids: samples.to_vec(),
            fsnps: table.snps.clone(),
            genotypes,
            hap1,
            ref_counts,
            alt_counts,
            fisher: Vec::new(),
        }
    }

    pub fn n_fsnps(&self) -> usize {
        self.fsnps.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Keep the fSNP columns flagged in `keep`.
    fn retain(&mut self, keep: &[bool]) {
        let cols: Vec<usize> = (0..self.fsnps.len()).filter(|&j| keep[j]).collect();
        self.fsnps = cols.iter().map(|&j| self.fsnps[j].clone()).collect();
        self.genotypes = self.genotypes.select(Axis(1), &cols);
        self.hap1 = self.hap1.select(Axis(1), &cols);
        self.ref_counts = self.ref_counts.select(Axis(1), &cols);
        self.alt_counts = self.alt_counts.select(Axis(1), &cols);
    }
}

/// fSNP stage result: the genotype side drives phasing, the ASE side is only
/// present when enough reads survive.
#[derive(Clone, Debug)]
pub struct FsnpResolution {
    pub genotypes: Outcome<FsnpGenotypes>,
    pub ase: Outcome<AseCounts>,
}

/// Exonic SNP selection and quality cascade.
///
/// The panel passed in is already restricted to the cis window and MAF
/// filtered. Fails only when the gene has no exonic SNPs at all.
pub fn select_fsnps(
    config: &PrepConfig,
    samples: &[String],
    panel: &HaplotypeMatrix,
    ledger: &mut ExclusionLedger,
) -> Result<Outcome<FsnpGenotypes>> {
    let exonic = load_exonic_snps(&config.inputs.exonic_snps, &config.chrom, &config.gene_id)?;
    if exonic.is_empty() {
        return Err(PrepError::NoFsnps(config.gene_id.clone()));
    }
    let mut candidates: Vec<SnpId> = exonic.into_iter().map(|e| e.id).collect();
    info!("{} exonic SNPs listed for {}", candidates.len(), config.gene_id);

    let user_excluded: HashSet<SnpId> = match &config.fsnp_exclusion {
        FsnpExclusion::Ids(ids) => ids.iter().cloned().collect(),
        _ => HashSet::new(),
    };
    candidates.retain(|id| {
        if user_excluded.contains(id) {
            ledger.record(id, ExclusionReason::ExcludedByUser);
            false
        } else {
            true
        }
    });
    if candidates.is_empty() {
        return Ok(Outcome::degraded(NO_FSNPS_IN_VARIANTS));
    }

    let start = candidates.iter().map(SnpId::position).min().unwrap_or(0);
    let end = candidates.iter().map(SnpId::position).max().unwrap_or(0);
    let split = resolve_variants(
        &config.inputs.variants,
        &config.chrom,
        start,
        end,
        Some(&user_excluded),
    )?;

    let wanted: HashSet<&SnpId> = candidates.iter().collect();
    let mut seen: HashSet<&SnpId> = HashSet::new();
    for (id, issue) in &split.excluded {
        if let Some(&key) = wanted.get(id) {
            seen.insert(key);
            let reason = match issue {
                VariantIssue::MissingGenotype => ExclusionReason::MissingGenotype,
                VariantIssue::Homozygous => ExclusionReason::Homozygous,
            };
            ledger.record(id, reason);
        }
    }
    let rows: Vec<usize> = split
        .keep
        .snps
        .iter()
        .enumerate()
        .filter(|(_, id)| wanted.contains(id))
        .map(|(i, _)| i)
        .collect();
    for &i in &rows {
        if let Some(&key) = wanted.get(&split.keep.snps[i]) {
            seen.insert(key);
        }
    }
    for id in &candidates {
        if !seen.contains(id) {
            ledger.record(id, ExclusionReason::NotInVariantFile);
        }
    }
    if rows.is_empty() {
        return Ok(Outcome::degraded(NO_FSNPS_IN_VARIANTS));
    }
    let table = GenotypeAseTable {
        sample_ids: split.keep.sample_ids.clone(),
        snps: rows.iter().map(|&i| split.keep.snps[i].clone()).collect(),
        genotypes: split.keep.genotypes.select(Axis(0), &rows),
        hap1: split.keep.hap1.select(Axis(0), &rows),
        ref_counts: split.keep.ref_counts.select(Axis(0), &rows),
        alt_counts: split.keep.alt_counts.select(Axis(0), &rows),
    };
    let mut fsnps = FsnpGenotypes::aligned(&table, samples);

    let in_panel: Vec<bool> = fsnps.fsnps.iter().map(|id| panel.contains(id)).collect();
    for (id, _) in fsnps.fsnps.iter().zip(&in_panel).filter(|&(_, &ok)| !ok) {
        ledger.record(id, ExclusionReason::NotInPanelAfterMaf);
    }
    fsnps.retain(&in_panel);
    if fsnps.n_fsnps() == 0 {
        return Ok(Outcome::degraded(NO_FSNPS_IN_PANEL));
    }

    if let FsnpExclusion::PValue(cutoff) = config.fsnp_exclusion {
        let individuals = panel_individuals(config, panel)?;
        let results = fisher_heterozygosity_test(
            fsnps
                .fsnps
                .iter()
                .enumerate()
                .map(|(j, id)| (id, fsnps.genotypes.column(j).to_vec())),
            panel,
            &individuals,
        );
        let pass: Vec<bool> = results.iter().map(|r| r.p_value > cutoff).collect();
        for r in results.iter().filter(|r| r.p_value <= cutoff) {
            ledger.record(&r.id, ExclusionReason::HeterozygosityMismatch);
        }
        fsnps.retain(&pass);
        fsnps.fisher = results;
        if fsnps.n_fsnps() == 0 {
            return Ok(Outcome::degraded(NO_FSNPS_PASSED_FISHER));
        }
    }

    info!(
        "{} fSNPs usable for phasing {}",
        fsnps.n_fsnps(),
        config.gene_id
    );
    Ok(Outcome::Success(fsnps))
}

/// Panel individuals for the heterozygosity test; every individual unless a
/// sample-description file narrows it to the configured population.
///
/// The sample file must describe exactly the individuals of the haplotype
/// file.
fn panel_individuals(config: &PrepConfig, panel: &HaplotypeMatrix) -> Result<Vec<usize>> {
    let Some(path) = &config.inputs.panel_samples else {
        return Ok(Vec::new());
    };
    let samples = load_panel_samples(path)?;
    if 2 * samples.len() != panel.n_haplotypes() {
        return Err(PrepError::Input(anyhow!(
            "{} lists {} individuals but the panel has {} haplotypes",
            path.display(),
            samples.len(),
            panel.n_haplotypes()
        )));
    }
    let individuals: Vec<usize> = population_haplotypes(&samples, &config.population)
        .into_iter()
        .filter(|h| h % 2 == 0)
        .map(|h| h / 2)
        .collect();
    if individuals.is_empty() {
        warn!(
            "No panel individuals of population {}; testing against the whole panel",
            config.population
        );
    }
    Ok(individuals)
}

/// Full fSNP cascade: selection followed by ASE aggregation.
pub fn resolve_fsnps(
    config: &PrepConfig,
    samples: &[String],
    panel: &HaplotypeMatrix,
    ledger: &mut ExclusionLedger,
) -> Result<FsnpResolution> {
    let genotypes = select_fsnps(config, samples, panel, ledger)?;
    let ase = match &genotypes {
        Outcome::Success(fsnps) => aggregate_ase(config, fsnps)?,
        Outcome::Degraded(reason) => Outcome::Degraded(reason.clone()),
    };
    Ok(FsnpResolution { genotypes, ase })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AseThresholds, CisWindow, InputPaths, ModelChoice, TagThreshold};
    use nbase_io::PanelSnp;
    use ndarray::array;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const VCF_HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\tS3\n";

    fn config(dir: &Path, exclusion: FsnpExclusion) -> PrepConfig {
        fs::write(
            dir.join("fsnps.tsv"),
            "gene_id\tchrom\tpos\tref\talt\n\
             G1\t22\t100\tA\tG\n\
             G1\t22\t200\tC\tT\n\
             G1\t22\t300\tG\tA\n\
             G1\t22\t400\tT\tC\n\
             G1\t22\t500\tA\tC\n",
        )
        .unwrap();
        fs::write(
            dir.join("calls.vcf"),
            format!(
                "{}\
                 22\t100\t.\tA\tG\t.\tPASS\t.\tGT:AS\t0|1:5,6\t0|1:3,4\t0|0:9,0\n\
                 22\t200\t.\tC\tT\t.\tPASS\t.\tGT:AS\t0|0:5,0\t1|1:0,4\t0|0:9,0\n\
                 22\t300\t.\tG\tA\t.\tPASS\t.\tGT:AS\t1|0:4,4\t0|1:2,2\t0|1:5,5\n\
                 22\t400\t.\tT\tC\t.\tPASS\t.\tGT:AS\t./.:0,0\t./.:0,0\t./.:0,0\n",
                VCF_HEADER
            ),
        )
        .unwrap();
        PrepConfig {
            gene_id: "G1".into(),
            chrom: "22".into(),
            model: ModelChoice::Both,
            out_dir: dir.to_path_buf(),
            inputs: InputPaths {
                counts: dir.join("counts.tsv"),
                exonic_snps: dir.join("fsnps.tsv"),
                gene_coords: dir.join("coords.tsv"),
                gene_coords_aux: None,
                variants: dir.join("calls.vcf"),
                panel_legend: dir.join("panel.legend"),
                panel_haplotypes: dir.join("panel.hap"),
                panel_samples: None,
                unique_fsnps: None,
                covariates: None,
                extra_covariates: None,
                ai_estimates: None,
            },
            population: "EUR".into(),
            cis_window: CisWindow::Flank(1000),
            fsnp_exclusion: exclusion,
            tag_threshold: TagThreshold::Disabled,
            ase: AseThresholds {
                min_ase: 5,
                min_ase_n: 2,
                min_ase_het: 1,
            },
            maf: 0.0,
            info: 0.0,
            prob: Vec::new(),
            threads: 1,
            save_input: false,
        }
    }

    fn panel(ids: &[SnpId]) -> HaplotypeMatrix {
        let snps = ids
            .iter()
            .map(|id| PanelSnp {
                id: id.clone(),
                name: id.to_string(),
                maf: 0.5,
            })
            .collect::<Vec<_>>();
        let mut haps = Array2::zeros((snps.len(), 8));
        for (i, mut row) in haps.axis_iter_mut(Axis(0)).enumerate() {
            row.assign(&array![0u8, 1, 1, 0, 0, 1, (i % 2) as u8, 0]);
        }
        HaplotypeMatrix::new(snps, haps).unwrap()
    }

    fn samples() -> Vec<String> {
        vec!["S1".into(), "S2".into(), "S3".into()]
    }

    #[test]
    fn test_cascade_routes_each_exclusion() {
        let dir = TempDir::new().unwrap();
        let excluded = SnpId::new(500, "A", "C");
        let cfg = config(dir.path(), FsnpExclusion::Ids(vec![excluded]));
        // 300:G:A is missing from the panel
        let panel = panel(&[SnpId::new(100, "A", "G"), SnpId::new(400, "T", "C")]);
        let mut ledger = ExclusionLedger::new("G1");

        let out = select_fsnps(&cfg, &samples(), &panel, &mut ledger).unwrap();
        let fsnps = out.success().unwrap();
        assert_eq!(fsnps.fsnps, vec![SnpId::new(100, "A", "G")]);
        assert_eq!(fsnps.genotypes.column(0).to_vec(), vec![1, 1, 0]);
        assert_eq!(fsnps.alt_counts[(1, 0)], 4);

        assert_eq!(ledger.reasons_for("500:A:C"), vec![&ExclusionReason::ExcludedByUser]);
        assert_eq!(ledger.reasons_for("200:C:T"), vec![&ExclusionReason::Homozygous]);
        assert_eq!(ledger.reasons_for("400:T:C"), vec![&ExclusionReason::MissingGenotype]);
        assert_eq!(ledger.reasons_for("300:G:A"), vec![&ExclusionReason::NotInPanelAfterMaf]);
    }

    #[test]
    fn test_no_exonic_snps_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path(), FsnpExclusion::None);
        cfg.gene_id = "G9".into();
        let mut ledger = ExclusionLedger::new("G9");
        let panel = panel(&[SnpId::new(100, "A", "G")]);
        assert!(matches!(
            select_fsnps(&cfg, &samples(), &panel, &mut ledger),
            Err(PrepError::NoFsnps(_))
        ));
    }

    #[test]
    fn test_no_fsnp_in_panel_degrades() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), FsnpExclusion::None);
        let panel = panel(&[SnpId::new(100, "A", "C")]);
        let mut ledger = ExclusionLedger::new("G1");
        let out = select_fsnps(&cfg, &samples(), &panel, &mut ledger).unwrap();
        assert_eq!(out.reason(), Some(NO_FSNPS_IN_PANEL));
    }

    #[test]
    fn test_fisher_cutoff_keeps_consistent_fsnps() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), FsnpExclusion::PValue(0.01));
        let panel = panel(&[SnpId::new(100, "A", "G"), SnpId::new(300, "G", "A")]);
        let mut ledger = ExclusionLedger::new("G1");
        let fsnps = select_fsnps(&cfg, &samples(), &panel, &mut ledger)
            .unwrap()
            .success()
            .unwrap();
        assert_eq!(fsnps.n_fsnps(), 2);
        assert_eq!(fsnps.fisher.len(), 2);
        assert!(fsnps.fisher.iter().all(|r| r.p_value > 0.01));
    }

    #[test]
    fn test_sample_file_larger_than_panel_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path(), FsnpExclusion::PValue(0.01));
        let sample_file = dir.path().join("panel.samples");
        let mut body = String::from("ID POP GROUP\n");
        for k in 0..6 {
            body.push_str(&format!("NA{} GBR EUR\n", k));
        }
        fs::write(&sample_file, body).unwrap();
        cfg.inputs.panel_samples = Some(sample_file);
        // four individuals in the haplotype file
        let panel = panel(&[SnpId::new(100, "A", "G"), SnpId::new(300, "G", "A")]);
        let mut ledger = ExclusionLedger::new("G1");
        assert!(matches!(
            select_fsnps(&cfg, &samples(), &panel, &mut ledger),
            Err(PrepError::Input(_))
        ));
    }

    #[test]
    fn test_phase_follows_selected_fsnps() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), FsnpExclusion::None);
        let panel = panel(&[SnpId::new(100, "A", "G"), SnpId::new(300, "G", "A")]);
        let mut ledger = ExclusionLedger::new("G1");
        let fsnps = select_fsnps(&cfg, &samples(), &panel, &mut ledger)
            .unwrap()
            .success()
            .unwrap();
        assert_eq!(fsnps.fsnps, vec![SnpId::new(100, "A", "G"), SnpId::new(300, "G", "A")]);
        assert_eq!(fsnps.hap1.row(0).to_vec(), vec![0, 1]);
        assert_eq!(fsnps.hap1.row(1).to_vec(), vec![0, 0]);
        assert_eq!(fsnps.hap1.row(2).to_vec(), vec![0, 0]);
    }

    #[test]
    fn test_cascade_is_idempotent_on_unique_list() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path(), FsnpExclusion::None);
        let panel = panel(&[SnpId::new(100, "A", "G"), SnpId::new(300, "G", "A")]);

        let mut ledger = ExclusionLedger::new("G1");
        let first = resolve_fsnps(&cfg, &samples(), &panel, &mut ledger).unwrap();
        let first_ids = first.ase.success().unwrap().usable_ids();
        assert!(!first_ids.is_empty());

        let unique = dir.path().join("unique.tsv");
        let mut body = String::from("gene_id\tid\n");
        for id in &first_ids {
            body.push_str(&format!("G1\t{}\n", id));
        }
        fs::write(&unique, body).unwrap();
        cfg.inputs.unique_fsnps = Some(unique);

        let mut ledger = ExclusionLedger::new("G1");
        let second = resolve_fsnps(&cfg, &samples(), &panel, &mut ledger).unwrap();
        assert_eq!(second.ase.success().unwrap().usable_ids(), first_ids);
    }
}
