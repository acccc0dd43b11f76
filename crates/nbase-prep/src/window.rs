//! Cis window resolution and reference-panel extraction.

use log::{info, warn};
use nbase_io::{gene_coordinates, load_panel_window, GeneRecord, GenomicWindow, HaplotypeMatrix, SnpId};

use crate::config::{CisWindow, PrepConfig};
use crate::error::{PrepError, Result};
use crate::ledger::{ExclusionLedger, ExclusionReason};

/// Panel rows of a gene's window plus the candidate rSNPs drawn from them.
#[derive(Clone, Debug)]
pub struct PanelWindow {
    pub gene: GeneRecord,
    pub window: GenomicWindow,
    pub panel: HaplotypeMatrix,
    /// Candidate rSNPs in panel order.
    pub candidates: Vec<SnpId>,
}

/// Look up the gene body in the coordinate file (either schema).
pub fn load_gene_record(config: &PrepConfig) -> Result<GeneRecord> {
    let inputs = &config.inputs;
    gene_coordinates(
        &inputs.gene_coords,
        inputs.gene_coords_aux.as_deref(),
        &config.chrom,
        &config.gene_id,
    )?
    .ok_or_else(|| PrepError::GeneNotFound(config.gene_id.clone()))
}

/// Genomic interval to extract for `gene`.
///
/// A flank is added on both sides of the gene body (clamped at 1); an explicit
/// SNP list spans its positions united with the gene body.
pub fn resolve_window(gene: &GeneRecord, cis: &CisWindow) -> GenomicWindow {
    match cis {
        CisWindow::Flank(flank) => GenomicWindow {
            start: gene.start.saturating_sub(*flank).max(1),
            end: gene.end.saturating_add(*flank),
        },
        CisWindow::Snps { positions, .. } => {
            let lo = positions.iter().copied().min().unwrap_or(gene.start);
            let hi = positions.iter().copied().max().unwrap_or(gene.end);
            GenomicWindow {
                start: lo.min(gene.start),
                end: hi.max(gene.end),
            }
        }
    }
}

/// Load the MAF-filtered panel window and pick the candidate rSNPs.
///
/// Explicitly requested ids missing from the window are recorded as
/// "not in reference panel".
pub fn extract_panel(
    config: &PrepConfig,
    gene: GeneRecord,
    ledger: &mut ExclusionLedger,
) -> Result<PanelWindow> {
    let window = resolve_window(&gene, &config.cis_window);
    let panel = load_panel_window(
        &config.inputs.panel_legend,
        &config.inputs.panel_haplotypes,
        window,
        Some(config.population.as_str()),
        config.maf,
    )?;
    if panel.is_empty() {
        return Err(PrepError::NoPanelSnps);
    }
    info!(
        "Panel window {}:{}-{} has {} SNPs (maf >= {}) across {} individuals",
        gene.chrom,
        window.start,
        window.end,
        panel.n_snps(),
        config.maf,
        panel.n_individuals()
    );

    let candidates = match &config.cis_window {
        CisWindow::Flank(_) => panel.snps.iter().map(|s| s.id.clone()).collect(),
        CisWindow::Snps { requested, .. } => {
            let mut found: Vec<SnpId> = Vec::new();
            for raw in requested {
                match SnpId::parse(raw).filter(|id| panel.contains(id)) {
                    Some(id) if !found.contains(&id) => found.push(id),
                    Some(_) => {}
                    None => {
                        warn!("Requested SNP {} is not in the reference panel", raw);
                        ledger.record_raw(raw.as_str(), ExclusionReason::NotInPanel);
                    }
                }
            }
            if found.is_empty() {
                return Err(PrepError::RequestedSnpsNotInPanel);
            }
            found.sort_by_key(|id| panel.row(id));
            found
        }
    };

    Ok(PanelWindow {
        gene,
        window,
        panel,
        candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene(start: u64, end: u64) -> GeneRecord {
        GeneRecord {
            id: "G1".into(),
            chrom: "22".into(),
            start,
            end,
            gc: None,
            length: None,
        }
    }

    #[test]
    fn test_flank_window_is_clamped() {
        let w = resolve_window(&gene(500, 900), &CisWindow::Flank(1000));
        assert_eq!(w, GenomicWindow { start: 1, end: 1900 });
        let w = resolve_window(&gene(5000, 9000), &CisWindow::Flank(1000));
        assert_eq!(w, GenomicWindow { start: 4000, end: 10000 });
    }

    #[test]
    fn test_snp_window_unites_gene_body() {
        let cis = CisWindow::Snps {
            requested: vec!["100:A:G".into(), "20000:C:T".into()],
            positions: vec![100, 20000],
        };
        let w = resolve_window(&gene(5000, 9000), &cis);
        assert_eq!(w, GenomicWindow { start: 100, end: 20000 });

        let cis = CisWindow::Snps {
            requested: vec!["6000:A:G".into()],
            positions: vec![6000],
        };
        let w = resolve_window(&gene(5000, 9000), &cis);
        assert_eq!(w, GenomicWindow { start: 5000, end: 9000 });
    }
}
