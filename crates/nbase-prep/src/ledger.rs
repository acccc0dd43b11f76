//! Exclusion ledger: every SNP dropped during a gene's preparation and why.

use nbase_io::SnpId;
use serde::Serialize;
use std::fmt;

/// Categorical reason a SNP left the active set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ExclusionReason {
    ExcludedByUser,
    NotInVariantFile,
    MissingGenotype,
    Homozygous,
    NotInPanelAfterMaf,
    HeterozygosityMismatch,
    NotInPanel,
    ZeroVariance,
    IncompatibleWithPanel,
    TooFewAseHets,
    LowInfo,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::ExcludedByUser => "excluded by user",
            ExclusionReason::NotInVariantFile => "not in variant file",
            ExclusionReason::MissingGenotype => "missing genotype in all samples",
            ExclusionReason::Homozygous => "homozygous in all samples",
            ExclusionReason::NotInPanelAfterMaf => "not in reference panel with maf filtering",
            ExclusionReason::HeterozygosityMismatch => "heterozygosity differs from reference panel",
            ExclusionReason::NotInPanel => "not in reference panel",
            ExclusionReason::ZeroVariance => "zero standard deviation",
            ExclusionReason::IncompatibleWithPanel => {
                "genotypes of fSNPs not compatible with reference panel"
            }
            ExclusionReason::TooFewAseHets => "not enough heterozygous individuals with ASE",
            ExclusionReason::LowInfo => "info score below cutoff",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    /// Raw identifier: canonical key for panel/VCF SNPs, the user's text for
    /// requested ids that never parsed.
    pub id: String,
    pub reason: ExclusionReason,
}

/// Append-only list owned by one gene's preparation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExclusionLedger {
    gene_id: String,
    entries: Vec<Exclusion>,
}

impl ExclusionLedger {
    pub fn new(gene_id: &str) -> Self {
        Self {
            gene_id: gene_id.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn gene_id(&self) -> &str {
        &self.gene_id
    }

    pub fn record(&mut self, snp: &SnpId, reason: ExclusionReason) {
        self.record_raw(snp.to_string(), reason);
    }

    pub fn record_raw(&mut self, id: impl Into<String>, reason: ExclusionReason) {
        self.entries.push(Exclusion {
            id: id.into(),
            reason,
        });
    }

    /// Post fan-out reduction: fold per-SNP failures in candidate order.
    pub fn merge_failures<'a, I>(&mut self, failures: I)
    where
        I: IntoIterator<Item = (&'a SnpId, &'a ExclusionReason)>,
    {
        for (snp, reason) in failures {
            self.record(snp, reason.clone());
        }
    }

    pub fn entries(&self) -> &[Exclusion] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reasons_for(&self, id: &str) -> Vec<&ExclusionReason> {
        self.entries
            .iter()
            .filter(|e| e.id == id)
            .map(|e| &e.reason)
            .collect()
    }
}
