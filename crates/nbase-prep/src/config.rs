//! Option set of one gene's preparation.
//!
//! `RawOptions` holds what the user typed (numbers as text); the validator turns
//! it into a typed `PrepConfig`, so every numeric check lives in one place.

use nbase_io::SnpId;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::PrepError;

/// Which model family the inputs are prepared for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ModelChoice {
    /// Combined count + ASE model; an ASE failure is the gene's result.
    NbAse,
    /// Count-only model; the ASE side is never built.
    Nb,
    /// Combined model, falling back to count-only when ASE is unavailable.
    #[default]
    Both,
}

impl FromStr for ModelChoice {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nb-ase" | "nbase" | "nb_ase" => Ok(ModelChoice::NbAse),
            "nb" => Ok(ModelChoice::Nb),
            "both" => Ok(ModelChoice::Both),
            _ => Err(PrepError::InvalidModel(s.to_string())),
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelChoice::NbAse => write!(f, "NB-ASE"),
            ModelChoice::Nb => write!(f, "NB"),
            ModelChoice::Both => write!(f, "both"),
        }
    }
}

/// Model actually prepared for a gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreparedModel {
    #[serde(rename = "NB-ASE")]
    NbAse,
    #[serde(rename = "NB")]
    Nb,
}

impl fmt::Display for PreparedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreparedModel::NbAse => write!(f, "NB-ASE"),
            PreparedModel::Nb => write!(f, "NB"),
        }
    }
}

/// LD tagging switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagThreshold {
    Disabled,
    R2(f64),
}

impl TagThreshold {
    pub const DISABLE_SENTINEL: &'static str = "no";

    pub fn is_enabled(&self) -> bool {
        matches!(self, TagThreshold::R2(_))
    }
}

impl FromStr for TagThreshold {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(Self::DISABLE_SENTINEL) {
            return Ok(TagThreshold::Disabled);
        }
        match s.parse::<f64>() {
            Ok(v) if (0.0..=1.0).contains(&v) => Ok(TagThreshold::R2(v)),
            _ => Err(PrepError::InvalidTagThreshold(s.to_string())),
        }
    }
}

/// User-requested fSNP exclusion.
#[derive(Debug, Clone, PartialEq)]
pub enum FsnpExclusion {
    None,
    Ids(Vec<SnpId>),
    /// Keep fSNPs whose heterozygosity Fisher test p-value is above the cutoff.
    PValue(f64),
}

/// How the cis window is defined.
#[derive(Debug, Clone, PartialEq)]
pub enum CisWindow {
    /// Base pairs added on both sides of the gene body.
    Flank(u64),
    /// Explicit rSNPs: the raw text of every requested id and the positions
    /// that parsed.
    Snps {
        requested: Vec<String>,
        positions: Vec<u64>,
    },
}

/// Options exactly as supplied by the caller.
#[derive(Debug, Clone)]
pub struct RawOptions {
    pub gene_id: String,
    pub chrom: String,
    pub model: Option<String>,
    pub out_dir: PathBuf,
    pub counts: PathBuf,
    pub exonic_snps: PathBuf,
    pub gene_coords: PathBuf,
    pub gene_coords_aux: Option<PathBuf>,
    pub variants: PathBuf,
    pub panel_legend: PathBuf,
    pub panel_haplotypes: PathBuf,
    pub panel_samples: Option<PathBuf>,
    pub population: Option<String>,
    pub unique_fsnps: Option<PathBuf>,
    pub covariates: Option<PathBuf>,
    pub extra_covariates: Option<PathBuf>,
    pub ai_estimates: Option<PathBuf>,
    /// Numeric flank size or a comma-separated list of SNP ids.
    pub cis_window: String,
    /// Numeric p-value cutoff or a comma-separated list of fSNP ids.
    pub ex_fsnp: Option<String>,
    pub tag_threshold: String,
    pub min_ase: String,
    pub min_ase_n: String,
    pub min_ase_het: String,
    pub maf: String,
    pub info: String,
    pub prob: Option<String>,
    pub threads: String,
    pub save_input: bool,
}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            gene_id: String::new(),
            chrom: String::new(),
            model: None,
            out_dir: PathBuf::from("."),
            counts: PathBuf::new(),
            exonic_snps: PathBuf::new(),
            gene_coords: PathBuf::new(),
            gene_coords_aux: None,
            variants: PathBuf::new(),
            panel_legend: PathBuf::new(),
            panel_haplotypes: PathBuf::new(),
            panel_samples: None,
            population: None,
            unique_fsnps: None,
            covariates: None,
            extra_covariates: None,
            ai_estimates: None,
            cis_window: "100000".to_string(),
            ex_fsnp: None,
            tag_threshold: "0.9".to_string(),
            min_ase: "5".to_string(),
            min_ase_n: "5".to_string(),
            min_ase_het: "5".to_string(),
            maf: "0.05".to_string(),
            info: "0.3".to_string(),
            prob: None,
            threads: "1".to_string(),
            save_input: false,
        }
    }
}

/// Input files of a run.
#[derive(Debug, Clone)]
pub struct InputPaths {
    pub counts: PathBuf,
    pub exonic_snps: PathBuf,
    pub gene_coords: PathBuf,
    pub gene_coords_aux: Option<PathBuf>,
    pub variants: PathBuf,
    pub panel_legend: PathBuf,
    pub panel_haplotypes: PathBuf,
    pub panel_samples: Option<PathBuf>,
    pub unique_fsnps: Option<PathBuf>,
    pub covariates: Option<PathBuf>,
    pub extra_covariates: Option<PathBuf>,
    pub ai_estimates: Option<PathBuf>,
}

/// ASE depth thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AseThresholds {
    /// Minimum total ASE reads for an individual to be informative.
    pub min_ase: u32,
    /// Minimum number of informative individuals.
    pub min_ase_n: usize,
    /// Minimum number of informative individuals heterozygous at the rSNP.
    pub min_ase_het: usize,
}

impl Default for AseThresholds {
    fn default() -> Self {
        Self {
            min_ase: 5,
            min_ase_n: 5,
            min_ase_het: 5,
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct PrepConfig {
    pub gene_id: String,
    pub chrom: String,
    pub model: ModelChoice,
    pub out_dir: PathBuf,
    pub inputs: InputPaths,
    pub population: String,
    pub cis_window: CisWindow,
    pub fsnp_exclusion: FsnpExclusion,
    pub tag_threshold: TagThreshold,
    pub ase: AseThresholds,
    pub maf: f64,
    pub info: f64,
    /// Credible masses for reported posterior quantiles; empty = defaults.
    pub prob: Vec<f64>,
    pub threads: usize,
    pub save_input: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_choice_parsing() {
        assert_eq!("NB-ASE".parse::<ModelChoice>().unwrap(), ModelChoice::NbAse);
        assert_eq!("nb".parse::<ModelChoice>().unwrap(), ModelChoice::Nb);
        assert_eq!("Both".parse::<ModelChoice>().unwrap(), ModelChoice::Both);
        assert!(matches!(
            "trecase".parse::<ModelChoice>(),
            Err(PrepError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_tag_threshold_parsing() {
        assert_eq!("no".parse::<TagThreshold>().unwrap(), TagThreshold::Disabled);
        assert_eq!("0.8".parse::<TagThreshold>().unwrap(), TagThreshold::R2(0.8));
        assert_eq!("1".parse::<TagThreshold>().unwrap(), TagThreshold::R2(1.0));
        assert!("1.5".parse::<TagThreshold>().is_err());
        assert!("yes".parse::<TagThreshold>().is_err());
    }
}
