//! Fatal, gene-aborting errors.
//!
//! Recoverable "fall back to the count-only model" conditions are not errors;
//! they travel as [`crate::Outcome::Degraded`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("unknown model '{0}': use NB-ASE, NB or both")]
    InvalidModel(String),

    #[error("output directory does not exist: {}", .0.display())]
    MissingOutputDir(PathBuf),

    #[error("missing input files: {}", format_paths(.0))]
    MissingFiles(Vec<PathBuf>),

    #[error("tag threshold must be 'no' or a number in [0, 1], got '{0}'")]
    InvalidTagThreshold(String),

    #[error("{name} must be numeric, got '{value}'")]
    NotNumeric { name: &'static str, value: String },

    #[error("{name} = {value} is out of range ({expected})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("none of the requested SNPs has a numeric position")]
    NoParsableSnps,

    #[error("gene not found: {0}")]
    GeneNotFound(String),

    #[error("covariates have {rows} rows but counts have {samples} samples")]
    CovariateMismatch { rows: usize, samples: usize },

    #[error("no fSNPs for gene {0}")]
    NoFsnps(String),

    #[error("no snps extracted from reference panel")]
    NoPanelSnps,

    #[error("none of the requested SNPs is in the reference panel")]
    RequestedSnpsNotInPanel,

    #[error("all candidate SNPs have zero standard deviation in the reference panel")]
    AllZeroVariance,

    #[error("tagging needs at least 2 SNPs; disable tagging to test a single SNP")]
    SingleSnpTagging,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Input(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PrepError>;

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_lists_every_path() {
        let err = PrepError::MissingFiles(vec![PathBuf::from("a.tsv"), PathBuf::from("b.vcf")]);
        assert_eq!(err.to_string(), "missing input files: a.tsv, b.vcf");
    }

    #[test]
    fn test_panel_message() {
        assert_eq!(
            PrepError::NoPanelSnps.to_string(),
            "no snps extracted from reference panel"
        );
    }
}
