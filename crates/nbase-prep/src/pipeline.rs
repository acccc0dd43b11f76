//! One gene, end to end.
//!
//! Stages run in order on a single thread up to tagging; the per-rSNP inputs
//! are then built in parallel on a dedicated pool and merged back in
//! candidate order.

use anyhow::anyhow;
use log::{debug, info, warn};
use nbase_io::{GeneRecord, SnpId};
use rayon::prelude::*;

use crate::ase::AseCounts;
use crate::config::{ModelChoice, PrepConfig, PreparedModel};
use crate::error::Result;
use crate::extract::{extract_counts, extract_covariates, report_quantiles};
use crate::fisher::FisherResult;
use crate::fsnp::{resolve_fsnps, select_fsnps, FsnpResolution};
use crate::haplotypes::PhasingContext;
use crate::ledger::{ExclusionLedger, ExclusionReason};
use crate::outcome::Outcome;
use crate::stan_input::{build_snp_input, AseMode, GeneInputs, StanInput};
use crate::tagging::{drop_zero_variance, panel_dosages, tag_snps, TagTable};
use crate::window::{extract_panel, load_gene_record};

/// Everything produced for one gene.
#[derive(Debug, Clone)]
pub struct PreparedGene {
    pub gene: GeneRecord,
    pub result: Outcome<Vec<StanInput>>,
    pub tags: TagTable,
    pub ledger: ExclusionLedger,
    pub quantiles: Vec<f64>,
    /// Filtered ASE table when the ASE side was built.
    pub ase: Option<AseCounts>,
    pub fisher: Vec<FisherResult>,
    /// Degraded ASE reason when the gene fell back to the count-only model.
    pub ase_fallback: Option<String>,
}

impl PreparedGene {
    /// Gene-level model: NB-ASE when any rSNP carries an ASE side.
    pub fn model(&self) -> Option<PreparedModel> {
        match &self.result {
            Outcome::Success(inputs) if inputs.iter().any(|s| s.ase.is_some()) => {
                Some(PreparedModel::NbAse)
            }
            Outcome::Success(_) => Some(PreparedModel::Nb),
            Outcome::Degraded(_) => None,
        }
    }

    pub fn n_inputs(&self) -> usize {
        match &self.result {
            Outcome::Success(inputs) => inputs.len(),
            Outcome::Degraded(_) => 0,
        }
    }

    pub fn ai_extreme(&self) -> Option<f64> {
        self.ase.as_ref().and_then(|a| a.ai_extreme)
    }
}

/// Prepare the model inputs of `config.gene_id`.
///
/// Returns `Err` for gene-aborting failures only; insufficient data surfaces
/// as a degraded result together with the ledger.
pub fn prepare_gene(config: &PrepConfig) -> Result<PreparedGene> {
    info!(
        "Preparing {} on chromosome {} (model {})",
        config.gene_id, config.chrom, config.model
    );
    let mut ledger = ExclusionLedger::new(&config.gene_id);

    let counts = extract_counts(&config.inputs.counts, &config.gene_id)?;
    let covariates = extract_covariates(
        config.inputs.covariates.as_deref(),
        config.inputs.extra_covariates.as_deref(),
        &config.gene_id,
        &counts.sample_ids,
    )?;
    if let Some(c) = &covariates {
        info!("Using {} covariates: {}", c.n_covariates(), c.names.join(", "));
    }
    let quantiles = report_quantiles(&config.prob);

    let gene = load_gene_record(config)?;
    let window = extract_panel(config, gene, &mut ledger)?;

    let resolution = match config.model {
        ModelChoice::Nb => FsnpResolution {
            genotypes: select_fsnps(config, &counts.sample_ids, &window.panel, &mut ledger)?,
            ase: Outcome::degraded("ASE not requested"),
        },
        ModelChoice::NbAse | ModelChoice::Both => {
            resolve_fsnps(config, &counts.sample_ids, &window.panel, &mut ledger)?
        }
    };
    let FsnpResolution { genotypes, ase } = resolution;

    let fsnps = match genotypes {
        Outcome::Success(f) => Some(f),
        Outcome::Degraded(reason) => {
            warn!("{}: {}; rSNP genotypes follow the panel prior", config.gene_id, reason);
            None
        }
    };
    let fisher = fsnps.as_ref().map(|f| f.fisher.clone()).unwrap_or_default();

    let (ase, ase_mode, ase_fallback) = match (config.model, ase) {
        (ModelChoice::Nb, _) => (None, AseMode::Off, None),
        (ModelChoice::NbAse, Outcome::Success(a)) => (Some(a), AseMode::Required, None),
        (ModelChoice::Both, Outcome::Success(a)) => (Some(a), AseMode::Optional, None),
        (ModelChoice::NbAse, Outcome::Degraded(reason)) => {
            warn!("{}: {}", config.gene_id, reason);
            return Ok(PreparedGene {
                gene: window.gene,
                result: Outcome::Degraded(reason),
                tags: TagTable::default(),
                ledger,
                quantiles,
                ase: None,
                fisher,
                ase_fallback: None,
            });
        }
        (ModelChoice::Both, Outcome::Degraded(reason)) => {
            warn!("{}: {}; preparing the count-only model", config.gene_id, reason);
            (None, AseMode::Off, Some(reason))
        }
    };

    let rows: Vec<usize> = window
        .candidates
        .iter()
        .filter_map(|id| window.panel.row(id))
        .collect();
    let dosages = panel_dosages(&window.panel, &rows);
    let (dosages, ids) = drop_zero_variance(&dosages, &window.candidates, &mut ledger)?;
    let tags = tag_snps(&dosages, &ids, config.tag_threshold)?;

    let phasing = PhasingContext::new(
        &window.panel,
        fsnps.as_ref(),
        ase.as_ref(),
        counts.n_samples(),
    );
    debug!(
        "{}: {} panel patterns over {} fSNPs",
        config.gene_id,
        phasing.n_patterns(),
        phasing.n_fsnps()
    );
    let incompatible = phasing.incompatible_samples();
    if !incompatible.is_empty() {
        let names: Vec<&str> = incompatible
            .iter()
            .map(|&i| counts.sample_ids[i].as_str())
            .collect();
        warn!(
            "{}: fSNP calls of {} match no pair of panel haplotypes",
            config.gene_id,
            names.join(", ")
        );
    }
    let inputs = GeneInputs {
        counts: &counts,
        covariates: covariates.as_ref(),
        panel: &window.panel,
        phasing: &phasing,
        ase: ase.as_ref(),
        ase_mode,
        min_ase_het: config.ase.min_ase_het,
        info_cutoff: config.info,
    };

    let tag_ids = tags.tags();
    let built = build_inputs_parallel(&inputs, &tag_ids, config.threads)?;

    let mut successes = Vec::with_capacity(built.len());
    let mut failures: Vec<(&SnpId, ExclusionReason)> = Vec::new();
    for (snp, outcome) in tag_ids.iter().zip(built) {
        match outcome {
            Ok(input) => successes.push(input),
            Err(reason) => failures.push((snp, reason)),
        }
    }
    ledger.merge_failures(failures.iter().map(|(snp, reason)| (*snp, reason)));

    let result = if successes.is_empty() {
        let reason = failures
            .last()
            .map(|(_, r)| r.to_string())
            .unwrap_or_else(|| "no rSNPs to test".to_string());
        warn!("{}: every rSNP failed ({})", config.gene_id, reason);
        Outcome::Degraded(reason)
    } else {
        info!(
            "{}: {} of {} tagged rSNPs prepared, {} exclusions",
            config.gene_id,
            successes.len(),
            tag_ids.len(),
            ledger.len()
        );
        Outcome::Success(successes)
    };

    Ok(PreparedGene {
        gene: window.gene,
        result,
        tags,
        ledger,
        quantiles,
        ase,
        fisher,
        ase_fallback,
    })
}

/// Build every rSNP input on a pool of `threads` workers; results keep the
/// order of `snps`.
pub fn build_inputs_parallel(
    inputs: &GeneInputs,
    snps: &[SnpId],
    threads: usize,
) -> Result<Vec<std::result::Result<StanInput, ExclusionReason>>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| anyhow!("Failed to start worker pool: {}", e))?;
    Ok(pool.install(|| {
        snps.par_iter()
            .map(|snp| build_snp_input(inputs, snp))
            .collect()
    }))
}
