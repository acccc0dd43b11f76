//! Argument and file validation, run before any input is read.

use log::warn;
use nbase_io::{leading_position, SnpId};
use std::path::{Path, PathBuf};

use crate::config::{
    AseThresholds, CisWindow, FsnpExclusion, InputPaths, ModelChoice, PrepConfig, RawOptions,
    TagThreshold,
};
use crate::error::{PrepError, Result};

const DEFAULT_POPULATION: &str = "EUR";

/// Check the option set and produce a typed configuration.
///
/// Pure: only file existence is queried, nothing is opened. Every missing path
/// is reported in a single `PrepError::MissingFiles`.
pub fn validate(raw: &RawOptions) -> Result<PrepConfig> {
    let model = match raw.model.as_deref() {
        Some(m) => m.parse::<ModelChoice>()?,
        None => ModelChoice::default(),
    };

    if !raw.out_dir.is_dir() {
        return Err(PrepError::MissingOutputDir(raw.out_dir.clone()));
    }

    check_files(raw)?;

    let tag_threshold = raw.tag_threshold.parse::<TagThreshold>()?;

    let ase = AseThresholds {
        min_ase: parse_count("min_ase", &raw.min_ase)? as u32,
        min_ase_n: parse_count("min_ase_n", &raw.min_ase_n)? as usize,
        min_ase_het: parse_count("min_ase_het", &raw.min_ase_het)? as usize,
    };
    let maf = parse_unit("maf", &raw.maf)?;
    let info = parse_unit("info", &raw.info)?;
    let threads = parse_count("threads", &raw.threads)? as usize;
    if threads == 0 {
        return Err(PrepError::OutOfRange {
            name: "threads",
            value: 0.0,
            expected: ">= 1",
        });
    }
    let prob = match raw.prob.as_deref() {
        Some(list) => parse_prob(list)?,
        None => Vec::new(),
    };
    let fsnp_exclusion = match raw.ex_fsnp.as_deref() {
        Some(ex) => parse_exclusion(ex)?,
        None => FsnpExclusion::None,
    };
    let cis_window = parse_cis_window(&raw.cis_window)?;

    if raw.gene_id.trim().is_empty() {
        return Err(PrepError::InvalidOption("gene id is empty".to_string()));
    }
    if raw.chrom.trim().is_empty() {
        return Err(PrepError::InvalidOption("chromosome is empty".to_string()));
    }
    let population = raw
        .population
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_POPULATION.to_string());

    Ok(PrepConfig {
        gene_id: raw.gene_id.trim().to_string(),
        chrom: raw.chrom.trim().to_string(),
        model,
        out_dir: raw.out_dir.clone(),
        inputs: InputPaths {
            counts: raw.counts.clone(),
            exonic_snps: raw.exonic_snps.clone(),
            gene_coords: raw.gene_coords.clone(),
            gene_coords_aux: raw.gene_coords_aux.clone(),
            variants: raw.variants.clone(),
            panel_legend: raw.panel_legend.clone(),
            panel_haplotypes: raw.panel_haplotypes.clone(),
            panel_samples: raw.panel_samples.clone(),
            unique_fsnps: raw.unique_fsnps.clone(),
            covariates: raw.covariates.clone(),
            extra_covariates: raw.extra_covariates.clone(),
            ai_estimates: raw.ai_estimates.clone(),
        },
        population,
        cis_window,
        fsnp_exclusion,
        tag_threshold,
        ase,
        maf,
        info,
        prob,
        threads,
        save_input: raw.save_input,
    })
}

fn check_files(raw: &RawOptions) -> Result<()> {
    let required: [&Path; 6] = [
        &raw.counts,
        &raw.exonic_snps,
        &raw.gene_coords,
        &raw.variants,
        &raw.panel_legend,
        &raw.panel_haplotypes,
    ];
    let optional = [
        &raw.gene_coords_aux,
        &raw.unique_fsnps,
        &raw.panel_samples,
        &raw.extra_covariates,
        &raw.covariates,
        &raw.ai_estimates,
    ];

    let missing: Vec<PathBuf> = required
        .into_iter()
        .chain(optional.into_iter().flatten().map(PathBuf::as_path))
        .filter(|p| !p.exists())
        .map(Path::to_path_buf)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PrepError::MissingFiles(missing))
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(PrepError::NotNumeric {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_count(name: &'static str, value: &str) -> Result<u64> {
    let v = parse_number(name, value)?;
    if v < 0.0 || v.fract() != 0.0 {
        return Err(PrepError::OutOfRange {
            name,
            value: v,
            expected: "a non-negative integer",
        });
    }
    Ok(v as u64)
}

fn parse_unit(name: &'static str, value: &str) -> Result<f64> {
    let v = parse_number(name, value)?;
    if !(0.0..=1.0).contains(&v) {
        return Err(PrepError::OutOfRange {
            name,
            value: v,
            expected: "[0, 1]",
        });
    }
    Ok(v)
}

fn parse_prob(list: &str) -> Result<Vec<f64>> {
    split_list(list)
        .map(|p| {
            let v = parse_number("prob", p)?;
            if v <= 0.0 || v >= 1.0 {
                return Err(PrepError::OutOfRange {
                    name: "prob",
                    value: v,
                    expected: "(0, 1)",
                });
            }
            Ok(v)
        })
        .collect()
}

fn parse_exclusion(value: &str) -> Result<FsnpExclusion> {
    if let Ok(p) = value.trim().parse::<f64>() {
        if !(0.0..=1.0).contains(&p) {
            return Err(PrepError::OutOfRange {
                name: "ex_fsnp",
                value: p,
                expected: "[0, 1]",
            });
        }
        return Ok(FsnpExclusion::PValue(p));
    }
    let mut ids = Vec::new();
    for raw in split_list(value) {
        match SnpId::parse(raw) {
            Some(id) => ids.push(id),
            None => warn!("Ignoring fSNP exclusion '{}': expected pos:ref:alt", raw),
        }
    }
    Ok(FsnpExclusion::Ids(ids))
}

fn parse_cis_window(value: &str) -> Result<CisWindow> {
    let trimmed = value.trim();
    if let Ok(flank) = trimmed.parse::<f64>() {
        if !flank.is_finite() || flank < 0.0 || flank.fract() != 0.0 {
            return Err(PrepError::OutOfRange {
                name: "cis_window",
                value: flank,
                expected: "a non-negative number of base pairs",
            });
        }
        return Ok(CisWindow::Flank(flank as u64));
    }

    let requested: Vec<String> = split_list(trimmed).map(str::to_string).collect();
    let mut positions = Vec::new();
    for id in &requested {
        match leading_position(id) {
            Some(pos) => positions.push(pos),
            None => warn!("SNP '{}' has no numeric position and is ignored", id),
        }
    }
    if positions.is_empty() {
        return Err(PrepError::NoParsableSnps);
    }
    Ok(CisWindow::Snps {
        requested,
        positions,
    })
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> RawOptions {
        let touch = |name: &str| {
            let p = dir.path().join(name);
            fs::write(&p, "x\n").unwrap();
            p
        };
        RawOptions {
            gene_id: "G1".into(),
            chrom: "22".into(),
            out_dir: dir.path().to_path_buf(),
            counts: touch("counts.tsv"),
            exonic_snps: touch("fsnps.tsv"),
            gene_coords: touch("coords.tsv"),
            variants: touch("calls.vcf"),
            panel_legend: touch("panel.legend"),
            panel_haplotypes: touch("panel.hap"),
            ..RawOptions::default()
        }
    }

    #[test]
    fn test_validate_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = validate(&options(&dir)).unwrap();
        assert_eq!(cfg.model, ModelChoice::Both);
        assert_eq!(cfg.cis_window, CisWindow::Flank(100_000));
        assert_eq!(cfg.tag_threshold, TagThreshold::R2(0.9));
        assert_eq!(cfg.population, "EUR");
        assert_eq!(cfg.ase, AseThresholds::default());
        assert_eq!(cfg.threads, 1);
    }

    #[test]
    fn test_validate_reports_all_missing_files() {
        let dir = TempDir::new().unwrap();
        let mut raw = options(&dir);
        raw.counts = dir.path().join("nope.tsv");
        raw.ai_estimates = Some(dir.path().join("ai.tsv"));
        raw.unique_fsnps = Some(dir.path().join("unique.tsv"));
        match validate(&raw) {
            Err(PrepError::MissingFiles(paths)) => assert_eq!(paths.len(), 3),
            other => panic!("expected MissingFiles, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_bad_model_first() {
        let dir = TempDir::new().unwrap();
        let mut raw = options(&dir);
        raw.model = Some("trec".into());
        raw.counts = dir.path().join("nope.tsv");
        assert!(matches!(validate(&raw), Err(PrepError::InvalidModel(_))));
    }

    #[test]
    fn test_validate_missing_out_dir() {
        let dir = TempDir::new().unwrap();
        let mut raw = options(&dir);
        raw.out_dir = dir.path().join("missing");
        assert!(matches!(validate(&raw), Err(PrepError::MissingOutputDir(_))));
    }

    #[test]
    fn test_validate_numeric_checks() {
        let dir = TempDir::new().unwrap();
        let mut raw = options(&dir);
        raw.min_ase = "five".into();
        assert!(matches!(
            validate(&raw),
            Err(PrepError::NotNumeric { name: "min_ase", .. })
        ));

        let mut raw = options(&dir);
        raw.tag_threshold = "1.2".into();
        assert!(matches!(validate(&raw), Err(PrepError::InvalidTagThreshold(_))));

        let mut raw = options(&dir);
        raw.tag_threshold = "no".into();
        raw.info = "0".into();
        let cfg = validate(&raw).unwrap();
        assert_eq!(cfg.tag_threshold, TagThreshold::Disabled);
        assert_eq!(cfg.info, 0.0);

        let mut raw = options(&dir);
        raw.maf = "2".into();
        assert!(matches!(validate(&raw), Err(PrepError::OutOfRange { name: "maf", .. })));
    }

    #[test]
    fn test_validate_snp_list() {
        let dir = TempDir::new().unwrap();
        let mut raw = options(&dir);
        raw.cis_window = "100:A:G, rs7:C:T,300:G:A".into();
        let cfg = validate(&raw).unwrap();
        match cfg.cis_window {
            CisWindow::Snps {
                requested,
                positions,
            } => {
                assert_eq!(requested.len(), 3);
                assert_eq!(positions, vec![100, 300]);
            }
            other => panic!("unexpected window {:?}", other),
        }

        let mut raw = options(&dir);
        raw.cis_window = "rs1,rs2".into();
        assert!(matches!(validate(&raw), Err(PrepError::NoParsableSnps)));
    }

    #[test]
    fn test_validate_exclusion_forms() {
        let dir = TempDir::new().unwrap();
        let mut raw = options(&dir);
        raw.ex_fsnp = Some("0.01".into());
        assert_eq!(validate(&raw).unwrap().fsnp_exclusion, FsnpExclusion::PValue(0.01));

        raw.ex_fsnp = Some("100:A:G,200:C:T".into());
        match validate(&raw).unwrap().fsnp_exclusion {
            FsnpExclusion::Ids(ids) => assert_eq!(ids.len(), 2),
            other => panic!("unexpected exclusion {:?}", other),
        }
    }
}
