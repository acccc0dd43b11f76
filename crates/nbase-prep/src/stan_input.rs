//! Per-rSNP model input.
//!
//! The total-count side always exists; the ASE side is attached when the gene
//! has informative ASE individuals and enough of them are likely heterozygous
//! at the rSNP.

use log::debug;
use nbase_io::{GeneCounts, HaplotypeMatrix, SnpId};
use serde::Serialize;

use crate::ase::AseCounts;
use crate::config::PreparedModel;
use crate::extract::CovariateMatrix;
use crate::haplotypes::PhasingContext;
use crate::ledger::ExclusionReason;

/// Negative binomial side.
#[derive(Debug, Clone, Serialize)]
pub struct TotalCountData {
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "K")]
    pub k: usize,
    #[serde(rename = "Y")]
    pub y: Vec<u64>,
    /// N x K, centered and scaled
    pub cov: Vec<Vec<f64>>,
    /// P(G = 0, 1, 2) per sample
    pub gprob: Vec<[f64; 3]>,
}

/// Beta-binomial side in long form: individual `a` owns `s[a]` consecutive
/// entries of `g`, `p` and `n`.
#[derive(Debug, Clone, Serialize)]
pub struct AseData {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "L")]
    pub l: usize,
    pub samples: Vec<String>,
    pub m: Vec<u32>,
    pub s: Vec<usize>,
    pub g: Vec<i8>,
    pub p: Vec<f64>,
    pub n: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai0: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdai0: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StanInput {
    pub snp: SnpId,
    pub model: PreparedModel,
    pub total: TotalCountData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ase: Option<AseData>,
    pub info: f64,
    /// ASE individuals whose most probable rSNP genotype is heterozygous.
    pub n_ase_het: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_extreme: Option<f64>,
}

/// What to do with the ASE side of each rSNP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AseMode {
    /// Count-only inputs.
    Off,
    /// The rSNP fails without an ASE side.
    Required,
    /// Fall back to count-only per rSNP.
    Optional,
}

/// Finalised, read-only inputs shared by every rSNP worker.
#[derive(Debug, Clone, Copy)]
pub struct GeneInputs<'a> {
    pub counts: &'a GeneCounts,
    pub covariates: Option<&'a CovariateMatrix>,
    pub panel: &'a HaplotypeMatrix,
    pub phasing: &'a PhasingContext,
    pub ase: Option<&'a AseCounts>,
    pub ase_mode: AseMode,
    pub min_ase_het: usize,
    pub info_cutoff: f64,
}

fn population_variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

/// Variance of the expected dosage over study samples relative to the
/// variance of the true dosage in the panel.
pub fn info_score(gprob: &[[f64; 3]], panel: &HaplotypeMatrix, row: usize) -> f64 {
    let expected = gprob.iter().map(|p| p[1] + 2.0 * p[2]);
    let panel_dosage = (0..panel.n_individuals()).map(|k| panel.dosage(row, k) as f64);
    let panel_var = population_variance(panel_dosage);
    if panel_var <= f64::EPSILON {
        return 0.0;
    }
    population_variance(expected) / panel_var
}

fn total_side(inputs: &GeneInputs, gprob: Vec<[f64; 3]>) -> TotalCountData {
    let n = inputs.counts.n_samples();
    let (k, cov) = match inputs.covariates {
        Some(c) => (
            c.n_covariates(),
            c.values.outer_iter().map(|r| r.to_vec()).collect(),
        ),
        None => (0, vec![Vec::new(); n]),
    };
    TotalCountData {
        n,
        k,
        y: inputs.counts.counts.clone(),
        cov,
        gprob,
    }
}

/// Long-form ASE side; returns the data and how many individuals are most
/// likely heterozygous.
fn ase_side(
    inputs: &GeneInputs,
    ase: &AseCounts,
    alt: &[f64],
    gprob: &[[f64; 3]],
) -> (AseData, usize) {
    let with_ai = ase.has_ai();
    let mut data = AseData {
        a: 0,
        l: 0,
        samples: Vec::new(),
        m: Vec::new(),
        s: Vec::new(),
        g: Vec::new(),
        p: Vec::new(),
        n: Vec::new(),
        ai0: with_ai.then(Vec::new),
        sdai0: with_ai.then(Vec::new),
    };
    let mut n_het = 0;

    for i in (0..ase.sample_ids.len()).filter(|&i| ase.informative[i]) {
        let configs = inputs.phasing.ase_configs(i, alt);
        if configs.is_empty() {
            continue;
        }
        let probs = gprob[i];
        if probs[1] > probs[0] && probs[1] > probs[2] {
            n_het += 1;
        }
        data.samples.push(ase.sample_ids[i].clone());
        data.m.push(ase.total(i));
        data.s.push(configs.len());
        for c in configs {
            data.g.push(c.g);
            data.p.push(c.p);
            data.n.push(c.n);
        }
        if let (Some(ai0), Some(sdai0)) = (data.ai0.as_mut(), data.sdai0.as_mut()) {
            let (mean, sd) = fold_ai(ase, i);
            ai0.push(mean);
            sdai0.push(sd);
        }
    }
    data.a = data.samples.len();
    data.l = data.g.len();
    (data, n_het)
}

/// Read-weighted reference-bias prior of one individual.
pub fn fold_ai(ase: &AseCounts, sample: usize) -> (f64, f64) {
    let mut weight = 0.0;
    let mut mean = 0.0;
    let mut var = 0.0;
    for (j, est) in ase.ai.iter().enumerate() {
        let Some(est) = est else {
            continue;
        };
        let w = ase.m[sample][j] as f64;
        weight += w;
        mean += w * est.mean;
        var += w * est.sd * est.sd;
    }
    if weight == 0.0 {
        return (0.0, 0.0);
    }
    (mean / weight, (var / weight).sqrt())
}

/// Build the model input of one rSNP, or the reason it cannot be tested.
pub fn build_snp_input(inputs: &GeneInputs, snp: &SnpId) -> Result<StanInput, ExclusionReason> {
    let row = inputs.panel.row(snp).ok_or(ExclusionReason::NotInPanel)?;
    let alt = inputs.phasing.alt_given_pattern(inputs.panel, row);

    let gprob = (0..inputs.counts.n_samples())
        .map(|i| inputs.phasing.genotype_probs(i, &alt))
        .collect::<Option<Vec<[f64; 3]>>>()
        .ok_or(ExclusionReason::IncompatibleWithPanel)?;

    let info = info_score(&gprob, inputs.panel, row);
    if info < inputs.info_cutoff {
        debug!("{}: info {:.3} below {}", snp, info, inputs.info_cutoff);
        return Err(ExclusionReason::LowInfo);
    }

    let ase = match (inputs.ase_mode, inputs.ase) {
        (AseMode::Off, _) | (_, None) => None,
        (mode, Some(counts)) => {
            let (data, n_het) = ase_side(inputs, counts, &alt, &gprob);
            if n_het >= inputs.min_ase_het && data.a > 0 {
                Some((data, n_het, counts.ai_extreme))
            } else if mode == AseMode::Required {
                debug!("{}: {} likely heterozygous ASE individuals", snp, n_het);
                return Err(ExclusionReason::TooFewAseHets);
            } else {
                None
            }
        }
    };

    let total = total_side(inputs, gprob);
    Ok(match ase {
        Some((data, n_het, ai_extreme)) => StanInput {
            snp: snp.clone(),
            model: PreparedModel::NbAse,
            total,
            ase: Some(data),
            info,
            n_ase_het: n_het,
            ai_extreme,
        },
        None => StanInput {
            snp: snp.clone(),
            model: PreparedModel::Nb,
            total,
            ase: None,
            info,
            n_ase_het: 0,
            ai_extreme: None,
        },
    })
}
