//! Exonic SNPs per gene.
//!
//! Expected columns: `gene_id, chrom, pos, ref, alt` (extra columns ignored).

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::{require_col, same_chrom, table_reader, SnpId};

#[derive(Clone, Debug, PartialEq)]
pub struct ExonicSnp {
    pub gene_id: String,
    pub chrom: String,
    pub id: SnpId,
}

/// Load the exonic SNPs overlapping `gene_id` on `chrom`, ordered by position.
pub fn load_exonic_snps<P: AsRef<Path>>(path: P, chrom: &str, gene_id: &str) -> Result<Vec<ExonicSnp>> {
    let path = path.as_ref();
    let mut rdr = table_reader(path)?;
    let headers = rdr.headers()?.clone();
    let gene_idx = require_col(&headers, &["gene_id", "gene"], path)?;
    let chrom_idx = require_col(&headers, &["chrom", "chr", "chromosome"], path)?;
    let pos_idx = require_col(&headers, &["pos", "position"], path)?;
    let ref_idx = require_col(&headers, &["ref", "ref_allele", "a0"], path)?;
    let alt_idx = require_col(&headers, &["alt", "alt_allele", "a1"], path)?;

    let mut snps = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.get(gene_idx) != Some(gene_id) {
            continue;
        }
        let row_chrom = record.get(chrom_idx).unwrap_or("");
        if !same_chrom(row_chrom, chrom) {
            continue;
        }
        let raw_pos = record.get(pos_idx).unwrap_or("");
        let pos = raw_pos
            .parse::<u64>()
            .map_err(|_| anyhow!("Invalid position '{}' for exonic SNP of {}", raw_pos, gene_id))?;
        let id = SnpId::new(
            pos,
            record.get(ref_idx).unwrap_or(""),
            record.get(alt_idx).unwrap_or(""),
        );
        snps.push(ExonicSnp {
            gene_id: gene_id.to_string(),
            chrom: row_chrom.to_string(),
            id,
        });
    }

    snps.sort_by(|a, b| a.id.cmp(&b.id));
    snps.dedup_by(|a, b| a.id == b.id);
    Ok(snps)
}
