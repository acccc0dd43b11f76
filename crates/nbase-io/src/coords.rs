//! Gene coordinates in two schema versions.
//!
//! - Current: one row per gene with `gene_id, chrom, start, end` and optional
//!   `gc` / `length` columns.
//! - Legacy: a gene table without coordinates (`gene_id, chrom`, optional
//!   `gc` / `length`) plus an auxiliary exon table (`gene_id, start, end`, one
//!   row per exon). The gene spans its outermost exons.
//!
//! Both resolve to the same [`GeneRecord`].

use anyhow::{anyhow, bail, Result};
use csv::StringRecord;
use std::path::Path;

use crate::{find_col, require_col, same_chrom, table_reader};

const GENE_COLS: &[&str] = &["gene_id", "gene", "id"];
const CHROM_COLS: &[&str] = &["chrom", "chr", "chromosome"];
const START_COLS: &[&str] = &["start"];
const END_COLS: &[&str] = &["end"];
const GC_COLS: &[&str] = &["gc", "gc_content", "GC"];
const LENGTH_COLS: &[&str] = &["length", "longest_transcript_length", "len"];

#[derive(Clone, Debug, PartialEq)]
pub struct GeneRecord {
    pub id: String,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub gc: Option<f64>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneCoordinateSchema {
    Current,
    Legacy,
}

/// A coordinate source able to resolve one gene.
trait CoordinateSource {
    fn lookup(&self, chrom: &str, gene_id: &str) -> Result<Option<GeneRecord>>;
}

struct CurrentTable<'a> {
    path: &'a Path,
}

struct LegacyTable<'a> {
    genes: &'a Path,
    exons: &'a Path,
}

/// Decide the schema from the header of the gene table.
pub fn detect_schema<P: AsRef<Path>>(path: P) -> Result<GeneCoordinateSchema> {
    let mut rdr = table_reader(path.as_ref())?;
    let headers = rdr.headers()?.clone();
    if find_col(&headers, START_COLS).is_some() && find_col(&headers, END_COLS).is_some() {
        Ok(GeneCoordinateSchema::Current)
    } else {
        Ok(GeneCoordinateSchema::Legacy)
    }
}

/// Resolve the coordinates of `gene_id` on `chrom`.
///
/// `aux` is the exon coordinate table, required only for the legacy schema.
/// Returns `Ok(None)` when the gene is not present.
pub fn gene_coordinates<P: AsRef<Path>>(
    path: P,
    aux: Option<&Path>,
    chrom: &str,
    gene_id: &str,
) -> Result<Option<GeneRecord>> {
    let path = path.as_ref();
    match detect_schema(path)? {
        GeneCoordinateSchema::Current => CurrentTable { path }.lookup(chrom, gene_id),
        GeneCoordinateSchema::Legacy => {
            let exons = aux.ok_or_else(|| {
                anyhow!(
                    "{} uses the legacy gene schema (no start/end); an exon coordinate file is required",
                    path.display()
                )
            })?;
            LegacyTable { genes: path, exons }.lookup(chrom, gene_id)
        }
    }
}

fn optional_f64(record: &StringRecord, idx: Option<usize>) -> Option<f64> {
    idx.and_then(|i| record.get(i)).and_then(|v| v.parse::<f64>().ok())
}

fn optional_u64(record: &StringRecord, idx: Option<usize>) -> Option<u64> {
    optional_f64(record, idx).filter(|v| *v >= 0.0).map(|v| v.round() as u64)
}

fn parse_coord(raw: Option<&str>, what: &str, gene_id: &str) -> Result<u64> {
    let raw = raw.unwrap_or("");
    raw.parse::<u64>()
        .map_err(|_| anyhow!("Invalid {} coordinate '{}' for {}", what, raw, gene_id))
}

impl CoordinateSource for CurrentTable<'_> {
    fn lookup(&self, chrom: &str, gene_id: &str) -> Result<Option<GeneRecord>> {
        let mut rdr = table_reader(self.path)?;
        let headers = rdr.headers()?.clone();
        let gene_idx = require_col(&headers, GENE_COLS, self.path)?;
        let chrom_idx = find_col(&headers, CHROM_COLS);
        let start_idx = require_col(&headers, START_COLS, self.path)?;
        let end_idx = require_col(&headers, END_COLS, self.path)?;
        let gc_idx = find_col(&headers, GC_COLS);
        let len_idx = find_col(&headers, LENGTH_COLS);

        for result in rdr.records() {
            let record = result?;
            if record.get(gene_idx) != Some(gene_id) {
                continue;
            }
            let row_chrom = chrom_idx.and_then(|i| record.get(i)).unwrap_or(chrom);
            if !same_chrom(row_chrom, chrom) {
                continue;
            }
            let start = parse_coord(record.get(start_idx), "start", gene_id)?;
            let end = parse_coord(record.get(end_idx), "end", gene_id)?;
            if end < start {
                bail!("Gene {} has end {} before start {}", gene_id, end, start);
            }
            return Ok(Some(GeneRecord {
                id: gene_id.to_string(),
                chrom: chrom.to_string(),
                start,
                end,
                gc: optional_f64(&record, gc_idx),
                length: optional_u64(&record, len_idx),
            }));
        }
        Ok(None)
    }
}

impl CoordinateSource for LegacyTable<'_> {
    fn lookup(&self, chrom: &str, gene_id: &str) -> Result<Option<GeneRecord>> {
        let mut rdr = table_reader(self.genes)?;
        let headers = rdr.headers()?.clone();
        let gene_idx = require_col(&headers, GENE_COLS, self.genes)?;
        let chrom_idx = find_col(&headers, CHROM_COLS);
        let gc_idx = find_col(&headers, GC_COLS);
        let len_idx = find_col(&headers, LENGTH_COLS);

        let mut info = None;
        for result in rdr.records() {
            let record = result?;
            if record.get(gene_idx) != Some(gene_id) {
                continue;
            }
            let row_chrom = chrom_idx.and_then(|i| record.get(i)).unwrap_or(chrom);
            if same_chrom(row_chrom, chrom) {
                info = Some((optional_f64(&record, gc_idx), optional_u64(&record, len_idx)));
                break;
            }
        }
        let Some((gc, length)) = info else {
            return Ok(None);
        };

        let mut rdr = table_reader(self.exons)?;
        let headers = rdr.headers()?.clone();
        let gene_idx = require_col(&headers, GENE_COLS, self.exons)?;
        let start_idx = require_col(&headers, START_COLS, self.exons)?;
        let end_idx = require_col(&headers, END_COLS, self.exons)?;

        let mut span: Option<(u64, u64)> = None;
        for result in rdr.records() {
            let record = result?;
            if record.get(gene_idx) != Some(gene_id) {
                continue;
            }
            let start = parse_coord(record.get(start_idx), "start", gene_id)?;
            let end = parse_coord(record.get(end_idx), "end", gene_id)?;
            span = Some(match span {
                Some((s, e)) => (s.min(start), e.max(end)),
                None => (start, end),
            });
        }
        let (start, end) = span.ok_or_else(|| {
            anyhow!("Gene {} has no exon coordinates in {}", gene_id, self.exons.display())
        })?;

        Ok(Some(GeneRecord {
            id: gene_id.to_string(),
            chrom: chrom.to_string(),
            start,
            end,
            gc,
            length,
        }))
    }
}
