//! nbase-io: readers for the inputs of the nbase preparation pipeline.
//!
//! This crate provides the file-facing collaborators of the pipeline:
//! - Gene-level total read counts and covariate tables
//! - Gene coordinates (current and legacy schema)
//! - Exonic SNP lists, unique-fSNP lists and allelic-imbalance estimates
//! - VCF genotype + allele-specific count records
//! - Haplotype reference panels (legend + haplotype matrix + sample description)
//!
//! Every reader returns `anyhow::Result`; classification of failures into
//! pipeline errors happens in `nbase-prep`.

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use flate2::read::MultiGzDecoder;
use serde::{Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub mod coords;
pub mod counts;
pub mod covariates;
pub mod exonic;
pub mod panel;
pub mod tables;
pub mod variants;

pub use coords::{gene_coordinates, detect_schema, GeneCoordinateSchema, GeneRecord};
pub use counts::{load_gene_counts, GeneCounts};
pub use covariates::{load_labeled_matrix, LabeledMatrix};
pub use exonic::{load_exonic_snps, ExonicSnp};
pub use panel::{load_panel_window, GenomicWindow, HaplotypeMatrix, PanelSnp};
pub use tables::{
    load_ai_estimates, load_panel_samples, load_unique_fsnps, population_haplotypes,
    AiEstimate, PanelSample,
};
pub use variants::{resolve_variants, GenotypeAseTable, VariantIssue, VariantSplit, MISSING_GT};

pub type SampleId = String;

/// Canonical SNP key `position:ref:alt`.
///
/// Two SNPs are the same entity iff all three parts are equal; there is no
/// position-only or allele-flip matching anywhere in the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnpId {
    pos: u64,
    ref_allele: String,
    alt_allele: String,
}

impl SnpId {
    pub fn new(pos: u64, ref_allele: &str, alt_allele: &str) -> Self {
        Self {
            pos,
            ref_allele: ref_allele.to_string(),
            alt_allele: alt_allele.to_string(),
        }
    }

    /// Parse a `pos:ref:alt` key. Returns `None` for anything else.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.trim().split(':');
        let pos = parts.next()?.parse::<u64>().ok()?;
        let ref_allele = parts.next()?;
        let alt_allele = parts.next()?;
        if parts.next().is_some() || ref_allele.is_empty() || alt_allele.is_empty() {
            return None;
        }
        Some(Self::new(pos, ref_allele, alt_allele))
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }
}

impl fmt::Display for SnpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.pos, self.ref_allele, self.alt_allele)
    }
}

impl Serialize for SnpId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Position of the leading numeric field of a user supplied SNP identifier.
pub fn leading_position(id: &str) -> Option<u64> {
    id.trim().split(':').next()?.parse::<u64>().ok()
}

/// Chromosome names compare equal with or without a `chr` prefix.
pub fn same_chrom(a: &str, b: &str) -> bool {
    a.trim_start_matches("chr") == b.trim_start_matches("chr")
}

/// Open a plain or gzip-compressed text file.
pub fn open_text<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let lower = path.to_string_lossy().to_ascii_lowercase();
    if lower.ends_with(".gz") || lower.ends_with(".bgz") {
        Ok(Box::new(BufReader::with_capacity(64 * 1024, MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::with_capacity(64 * 1024, file)))
    }
}

/// Detect delimiter (tab, comma, space) from the first line of a file.
pub fn detect_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let mut rdr = open_text(path)?;
    let mut first_line = String::new();
    rdr.read_line(&mut first_line)?;
    if first_line.contains('\t') {
        Ok(b'\t')
    } else if first_line.contains(',') {
        Ok(b',')
    } else {
        Ok(b' ')
    }
}

/// Build a csv reader with a detected delimiter over a plain or gzipped file.
pub fn table_reader<P: AsRef<Path>>(path: P) -> Result<csv::Reader<Box<dyn BufRead>>> {
    let delim = detect_delimiter(&path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delim)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(open_text(&path)?))
}

/// Index of the first header matching any of `names`, case-insensitively.
pub fn find_col(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

pub(crate) fn require_col(headers: &StringRecord, names: &[&str], path: &Path) -> Result<usize> {
    find_col(headers, names).ok_or_else(|| {
        anyhow!(
            "{} column missing in {} (accepted names: {})",
            names[0],
            path.display(),
            names.join(", ")
        )
    })
}
