//! Haplotype reference panel (IMPUTE-style legend + haplotype files).
//!
//! The legend has a header `id position a0 a1 ...` optionally followed by
//! per-population allele-frequency columns (`AFR`, `EUR`, ...). The haplotype
//! file has one whitespace-separated 0/1 row per legend row; columns `2k` and
//! `2k+1` are the two haplotypes of panel individual `k`.

use anyhow::{anyhow, bail, Result};
use ndarray::Array2;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::{open_text, SnpId};

/// Closed genomic interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenomicWindow {
    pub start: u64,
    pub end: u64,
}

impl GenomicWindow {
    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.start && pos <= self.end
    }
}

#[derive(Clone, Debug)]
pub struct PanelSnp {
    pub id: SnpId,
    /// Name as given in the legend (often an rs id).
    pub name: String,
    pub maf: f64,
}

/// Panel rows of one window.
#[derive(Clone, Debug)]
pub struct HaplotypeMatrix {
    pub snps: Vec<PanelSnp>,
    /// Shape: (n_snps, n_haplotypes)
    pub haplotypes: Array2<u8>,
    index: HashMap<SnpId, usize>,
}

impl HaplotypeMatrix {
    pub fn new(snps: Vec<PanelSnp>, haplotypes: Array2<u8>) -> Result<Self> {
        if snps.len() != haplotypes.nrows() {
            bail!(
                "Panel has {} SNPs but {} haplotype rows",
                snps.len(),
                haplotypes.nrows()
            );
        }
        let index = snps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Ok(Self {
            snps,
            haplotypes,
            index,
        })
    }

    pub fn row(&self, id: &SnpId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &SnpId) -> bool {
        self.index.contains_key(id)
    }

    pub fn n_snps(&self) -> usize {
        self.snps.len()
    }

    pub fn n_haplotypes(&self) -> usize {
        self.haplotypes.ncols()
    }

    pub fn n_individuals(&self) -> usize {
        self.haplotypes.ncols() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.snps.is_empty()
    }

    /// Alt allele count of panel individual `k` at `row`.
    pub fn dosage(&self, row: usize, individual: usize) -> u8 {
        self.haplotypes[(row, 2 * individual)] + self.haplotypes[(row, 2 * individual + 1)]
    }
}

/// Load the panel rows inside `window` whose minor allele frequency is at
/// least `maf`.
///
/// The frequency is read from the legend column named `population` when it
/// exists, otherwise it is computed from the haplotypes.
pub fn load_panel_window<P: AsRef<Path>, Q: AsRef<Path>>(
    legend_path: P,
    haplotype_path: Q,
    window: GenomicWindow,
    population: Option<&str>,
    maf: f64,
) -> Result<HaplotypeMatrix> {
    let legend_path = legend_path.as_ref();
    let haplotype_path = haplotype_path.as_ref();
    let mut legend = open_text(legend_path)?.lines();
    let haps = open_text(haplotype_path)?.lines();

    let header = legend
        .next()
        .ok_or_else(|| anyhow!("Legend {} is empty", legend_path.display()))??;
    let columns: Vec<&str> = header.split_whitespace().collect();
    let col = |names: &[&str]| {
        columns
            .iter()
            .position(|c| names.iter().any(|n| c.eq_ignore_ascii_case(n)))
    };
    let id_idx = col(&["id"]).ok_or_else(|| anyhow!("Legend has no 'id' column"))?;
    let pos_idx = col(&["position", "pos"]).ok_or_else(|| anyhow!("Legend has no 'position' column"))?;
    let a0_idx = col(&["a0", "ref"]).ok_or_else(|| anyhow!("Legend has no 'a0' column"))?;
    let a1_idx = col(&["a1", "alt"]).ok_or_else(|| anyhow!("Legend has no 'a1' column"))?;
    let af_idx = population.and_then(|p| col(&[p]));

    let mut snps = Vec::new();
    let mut flat: Vec<u8> = Vec::new();
    let mut n_haps: Option<usize> = None;

    for (line_no, (leg_line, hap_line)) in legend.zip(haps).enumerate() {
        let leg_line = leg_line?;
        let hap_line = hap_line?;
        let fields: Vec<&str> = leg_line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let pos: u64 = fields
            .get(pos_idx)
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| anyhow!("Invalid position on legend line {}", line_no + 2))?;
        if !window.contains(pos) {
            continue;
        }

        let alleles = hap_line
            .split_whitespace()
            .map(|a| match a {
                "0" => Ok(0u8),
                "1" => Ok(1u8),
                other => Err(anyhow!(
                    "Invalid haplotype allele '{}' on line {} of {}",
                    other,
                    line_no + 1,
                    haplotype_path.display()
                )),
            })
            .collect::<Result<Vec<u8>>>()?;
        match n_haps {
            None => n_haps = Some(alleles.len()),
            Some(n) if n != alleles.len() => bail!(
                "Haplotype line {} has {} alleles, expected {}",
                line_no + 1,
                alleles.len(),
                n
            ),
            _ => {}
        }

        let alt_freq = match af_idx.and_then(|i| fields.get(i)).and_then(|v| v.parse::<f64>().ok()) {
            Some(af) => af,
            None if alleles.is_empty() => 0.0,
            None => alleles.iter().map(|&a| a as f64).sum::<f64>() / alleles.len() as f64,
        };
        let snp_maf = alt_freq.min(1.0 - alt_freq);
        if snp_maf < maf {
            continue;
        }

        let id = SnpId::new(
            pos,
            fields.get(a0_idx).copied().unwrap_or(""),
            fields.get(a1_idx).copied().unwrap_or(""),
        );
        snps.push(PanelSnp {
            id,
            name: fields.get(id_idx).copied().unwrap_or("").to_string(),
            maf: snp_maf,
        });
        flat.extend(alleles);
    }

    let n_haps = n_haps.unwrap_or(0);
    let haplotypes = Array2::from_shape_vec((snps.len(), n_haps), flat)?;
    HaplotypeMatrix::new(snps, haplotypes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn panel_files() -> (NamedTempFile, NamedTempFile) {
        let mut legend = NamedTempFile::new().unwrap();
        writeln!(legend, "id position a0 a1 TYPE EUR").unwrap();
        writeln!(legend, "rs1 100 A G Biallelic_SNP 0.25").unwrap();
        writeln!(legend, "rs2 200 C T Biallelic_SNP 0.01").unwrap();
        writeln!(legend, "rs3 300 G A Biallelic_SNP 0.5").unwrap();
        writeln!(legend, "rs4 900 T C Biallelic_SNP 0.5").unwrap();
        let mut haps = NamedTempFile::new().unwrap();
        writeln!(haps, "0 1 0 0").unwrap();
        writeln!(haps, "0 0 0 0").unwrap();
        writeln!(haps, "1 1 0 0").unwrap();
        writeln!(haps, "1 0 1 0").unwrap();
        (legend, haps)
    }

    #[test]
    fn test_load_panel_window_filters() {
        let (legend, haps) = panel_files();
        let window = GenomicWindow { start: 50, end: 500 };
        let panel = load_panel_window(legend.path(), haps.path(), window, Some("EUR"), 0.05).unwrap();
        let ids: Vec<String> = panel.snps.iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["100:A:G", "300:G:A"]);
        assert_eq!(panel.n_haplotypes(), 4);
        assert_eq!(panel.n_individuals(), 2);
        assert_eq!(panel.dosage(1, 0), 2);
        assert_abs_diff_eq!(panel.snps[0].maf, 0.25);
        assert!(panel.row(&SnpId::new(100, "A", "C")).is_none());
    }

    #[test]
    fn test_load_panel_window_maf_one_is_empty() {
        let (legend, haps) = panel_files();
        let window = GenomicWindow { start: 1, end: 1000 };
        let panel = load_panel_window(legend.path(), haps.path(), window, Some("EUR"), 1.0).unwrap();
        assert!(panel.is_empty());
    }

    #[test]
    fn test_load_panel_window_frequency_from_haplotypes() {
        let (legend, haps) = panel_files();
        let window = GenomicWindow { start: 1, end: 1000 };
        // no AFR column: rs2 is monomorphic in the haplotypes
        let panel = load_panel_window(legend.path(), haps.path(), window, Some("AFR"), 0.1).unwrap();
        assert_eq!(panel.n_snps(), 3);
        assert!(panel.snps.iter().all(|s| s.name != "rs2"));
    }
}
