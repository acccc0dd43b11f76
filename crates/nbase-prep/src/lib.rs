//! Per-gene input preparation for a negative binomial + allele-specific
//! expression eQTL model whose rSNP genotypes come from a haplotype
//! reference panel.

pub mod ase;
pub mod config;
pub mod error;
pub mod extract;
pub mod fisher;
pub mod fsnp;
pub mod haplotypes;
pub mod ledger;
pub mod outcome;
pub mod output;
pub mod pipeline;
pub mod stan_input;
pub mod tagging;
pub mod validate;
pub mod window;

pub use ase::{aggregate_ase, AseCounts};
pub use config::{
    AseThresholds, CisWindow, FsnpExclusion, InputPaths, ModelChoice, PrepConfig, PreparedModel,
    RawOptions, TagThreshold,
};
pub use error::{PrepError, Result};
pub use extract::{extract_counts, extract_covariates, report_quantiles, CovariateMatrix};
pub use fisher::{fisher_exact_two_sided, fisher_heterozygosity_test, FisherResult};
pub use fsnp::{resolve_fsnps, select_fsnps, FsnpGenotypes, FsnpResolution};
pub use haplotypes::PhasingContext;
pub use ledger::{Exclusion, ExclusionLedger, ExclusionReason};
pub use outcome::Outcome;
pub use output::write_outputs;
pub use pipeline::{prepare_gene, PreparedGene};
pub use stan_input::{build_snp_input, AseData, StanInput, TotalCountData};
pub use tagging::{drop_zero_variance, panel_dosages, tag_snps, TagGroup, TagTable};
pub use validate::validate;
pub use window::{extract_panel, resolve_window, PanelWindow};
