//! VCF decoding into genotype + allele-specific count tables.
//!
//! Reads plain or gzip-compressed VCF. Per sample the `GT` field gives the
//! alt-allele count (0, 1, 2; missing = -1) and, for `|` calls, the allele on
//! the first haplotype. The `AS` field gives allele-specific read counts
//! `ref,alt` (`AD` is used when `AS` is absent).
//! Only biallelic records inside `[start, end]` on the requested chromosome are
//! kept.

use anyhow::{anyhow, Result};
use log::warn;
use ndarray::Array2;
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;

use crate::{open_text, same_chrom, SampleId, SnpId};

pub const MISSING_GT: i8 = -1;

/// Genotype and ASE counts for a set of SNPs.
#[derive(Clone, Debug)]
pub struct GenotypeAseTable {
    pub sample_ids: Vec<SampleId>,
    pub snps: Vec<SnpId>,
    /// Shape: (n_snps, n_samples); alt-allele count or `MISSING_GT`.
    pub genotypes: Array2<i8>,
    /// Shape: (n_snps, n_samples); allele on haplotype 1 of a phased call,
    /// `MISSING_GT` when unphased or missing.
    pub hap1: Array2<i8>,
    /// Shape: (n_snps, n_samples)
    pub ref_counts: Array2<u32>,
    /// Shape: (n_snps, n_samples)
    pub alt_counts: Array2<u32>,
}

impl GenotypeAseTable {
    pub fn row(&self, id: &SnpId) -> Option<usize> {
        self.snps.iter().position(|s| s == id)
    }

    pub fn sample_index(&self, sample: &str) -> Option<usize> {
        self.sample_ids.iter().position(|s| s == sample)
    }
}

/// Why a record was routed out of the usable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantIssue {
    MissingGenotype,
    Homozygous,
}

/// Records split into usable (`keep`) and unusable (`excluded`) sets.
#[derive(Clone, Debug)]
pub struct VariantSplit {
    pub keep: GenotypeAseTable,
    pub excluded: Vec<(SnpId, VariantIssue)>,
}

struct ParsedRecord {
    id: SnpId,
    genotypes: Vec<i8>,
    hap1: Vec<i8>,
    ref_counts: Vec<u32>,
    alt_counts: Vec<u32>,
}

/// Decode the window `[start, end]` of `chrom` from a VCF.
///
/// SNPs listed in `exclude` are skipped entirely. Records with a missing
/// genotype in every sample, or homozygous in every called sample, are
/// returned in `excluded`.
pub fn resolve_variants<P: AsRef<Path>>(
    path: P,
    chrom: &str,
    start: u64,
    end: u64,
    exclude: Option<&HashSet<SnpId>>,
) -> Result<VariantSplit> {
    let path = path.as_ref();
    let reader = open_text(path)?;

    let mut sample_ids: Option<Vec<SampleId>> = None;
    let mut kept: Vec<ParsedRecord> = Vec::new();
    let mut excluded = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with("##") || line.trim().is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('#') {
            let fields: Vec<&str> = header.split('\t').collect();
            if fields.len() < 10 {
                return Err(anyhow!("VCF {} has no sample columns", path.display()));
            }
            sample_ids = Some(fields[9..].iter().map(|s| s.to_string()).collect());
            continue;
        }
        let samples = sample_ids
            .as_ref()
            .ok_or_else(|| anyhow!("VCF {} is missing the #CHROM header line", path.display()))?;

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 + samples.len() {
            warn!("Skipping truncated VCF line {} in {}", line_no + 1, path.display());
            continue;
        }
        if !same_chrom(fields[0], chrom) {
            continue;
        }
        let pos: u64 = match fields[1].parse() {
            Ok(p) => p,
            Err(_) => {
                warn!("Skipping VCF line {} with invalid POS '{}'", line_no + 1, fields[1]);
                continue;
            }
        };
        if pos < start || pos > end {
            continue;
        }
        let (ref_allele, alt_allele) = (fields[3], fields[4]);
        if alt_allele.contains(',') || alt_allele == "." {
            continue;
        }
        let id = SnpId::new(pos, ref_allele, alt_allele);
        if exclude.map_or(false, |ex| ex.contains(&id)) {
            continue;
        }

        let record = parse_record(id, fields[8], &fields[9..9 + samples.len()])?;
        match classify(&record.genotypes) {
            Some(issue) => excluded.push((record.id, issue)),
            None => kept.push(record),
        }
    }

    let sample_ids = sample_ids.unwrap_or_default();
    let n_samples = sample_ids.len();
    let n_snps = kept.len();
    let mut genotypes = Array2::<i8>::from_elem((n_snps, n_samples), MISSING_GT);
    let mut hap1 = Array2::<i8>::from_elem((n_snps, n_samples), MISSING_GT);
    let mut ref_counts = Array2::<u32>::zeros((n_snps, n_samples));
    let mut alt_counts = Array2::<u32>::zeros((n_snps, n_samples));
    let mut snps = Vec::with_capacity(n_snps);
    for (i, rec) in kept.into_iter().enumerate() {
        for j in 0..n_samples {
            genotypes[(i, j)] = rec.genotypes[j];
            hap1[(i, j)] = rec.hap1[j];
            ref_counts[(i, j)] = rec.ref_counts[j];
            alt_counts[(i, j)] = rec.alt_counts[j];
        }
        snps.push(rec.id);
    }

    Ok(VariantSplit {
        keep: GenotypeAseTable {
            sample_ids,
            snps,
            genotypes,
            hap1,
            ref_counts,
            alt_counts,
        },
        excluded,
    })
}

fn classify(genotypes: &[i8]) -> Option<VariantIssue> {
    let called: Vec<i8> = genotypes.iter().copied().filter(|g| *g != MISSING_GT).collect();
    if called.is_empty() {
        Some(VariantIssue::MissingGenotype)
    } else if called.iter().all(|g| *g != 1) {
        Some(VariantIssue::Homozygous)
    } else {
        None
    }
}

fn format_indices(format_str: &str) -> (Option<usize>, Option<usize>, Option<usize>) {
    let mut gt_idx = None;
    let mut as_idx = None;
    let mut ad_idx = None;
    for (i, key) in format_str.split(':').enumerate() {
        match key {
            "GT" => gt_idx = Some(i),
            "AS" => as_idx = Some(i),
            "AD" => ad_idx = Some(i),
            _ => {}
        }
    }
    (gt_idx, as_idx, ad_idx)
}

fn parse_record(id: SnpId, format: &str, samples: &[&str]) -> Result<ParsedRecord> {
    let (gt_idx, as_idx, ad_idx) = format_indices(format);
    let count_idx = as_idx.or(ad_idx);
    let gt_idx = gt_idx.ok_or_else(|| anyhow!("VCF record {} has no GT field", id))?;

    let mut genotypes = Vec::with_capacity(samples.len());
    let mut hap1 = Vec::with_capacity(samples.len());
    let mut ref_counts = Vec::with_capacity(samples.len());
    let mut alt_counts = Vec::with_capacity(samples.len());
    for sample_str in samples {
        let tokens: Vec<&str> = sample_str.split(':').collect();
        let (dosage, first) = parse_gt(tokens.get(gt_idx).copied());
        genotypes.push(dosage);
        hap1.push(first);
        let (r, a) = count_idx
            .and_then(|idx| parse_allele_counts(tokens.get(idx).copied()))
            .unwrap_or((0, 0));
        ref_counts.push(r);
        alt_counts.push(a);
    }
    Ok(ParsedRecord {
        id,
        genotypes,
        hap1,
        ref_counts,
        alt_counts,
    })
}

/// Alt-allele count and haplotype-1 allele from a diploid `GT` (`0/1`,
/// `1|0`, `./.`). The second value is `MISSING_GT` unless the call is phased.
fn parse_gt(field: Option<&str>) -> (i8, i8) {
    const MISSING: (i8, i8) = (MISSING_GT, MISSING_GT);
    let Some(gt) = field else { return MISSING };
    let phased = gt.contains('|');
    let mut alleles = gt.split(|c| c == '/' || c == '|');
    let (Some(a), Some(b), None) = (alleles.next(), alleles.next(), alleles.next()) else {
        return MISSING;
    };
    match (a.parse::<u8>(), b.parse::<u8>()) {
        (Ok(a @ 0..=1), Ok(b @ 0..=1)) => {
            let first = if phased { a as i8 } else { MISSING_GT };
            ((a + b) as i8, first)
        }
        _ => MISSING,
    }
}

fn parse_allele_counts(field: Option<&str>) -> Option<(u32, u32)> {
    let field = field?;
    if field.is_empty() || field == "." {
        return None;
    }
    let mut parts = field.split(',');
    let r = parts.next()?.parse::<u32>().ok()?;
    let a = parts.next()?.parse::<u32>().ok()?;
    Some((r, a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vcf() -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "##fileformat=VCFv4.2").unwrap();
        writeln!(f, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\tS3").unwrap();
        writeln!(f, "22\t100\t.\tA\tG\t.\tPASS\t.\tGT:AS\t0/1:5,7\t0|0:3,0\t1/1:0,4").unwrap();
        writeln!(f, "22\t200\t.\tC\tT\t.\tPASS\t.\tGT:AS\t./.:0,0\t./.:.\t.:.").unwrap();
        writeln!(f, "22\t300\t.\tG\tA\t.\tPASS\t.\tGT:AD\t0/0:9,0\t1/1:0,8\t0/0:4,0").unwrap();
        writeln!(f, "22\t400\t.\tG\tA,C\t.\tPASS\t.\tGT\t0/1\t0/1\t0/1").unwrap();
        writeln!(f, "22\t900\t.\tT\tC\t.\tPASS\t.\tGT:AS\t0/1:1,1\t0/1:1,1\t0/1:1,1").unwrap();
        writeln!(f, "21\t100\t.\tA\tG\t.\tPASS\t.\tGT:AS\t0/1:5,7\t0/1:1,1\t0/1:1,1").unwrap();
        f
    }

    #[test]
    fn test_resolve_variants_split() {
        let f = vcf();
        let split = resolve_variants(f.path(), "chr22", 1, 500, None).unwrap();
        assert_eq!(split.keep.sample_ids, vec!["S1", "S2", "S3"]);
        assert_eq!(split.keep.snps, vec![SnpId::new(100, "A", "G")]);
        assert_eq!(split.keep.genotypes.row(0).to_vec(), vec![1, 0, 2]);
        assert_eq!(split.keep.hap1.row(0).to_vec(), vec![MISSING_GT, 0, MISSING_GT]);
        assert_eq!(split.keep.alt_counts.row(0).to_vec(), vec![7, 0, 4]);
        assert_eq!(split.keep.ref_counts.row(0).to_vec(), vec![5, 3, 0]);
        assert_eq!(
            split.excluded,
            vec![
                (SnpId::new(200, "C", "T"), VariantIssue::MissingGenotype),
                (SnpId::new(300, "G", "A"), VariantIssue::Homozygous),
            ]
        );
    }

    #[test]
    fn test_resolve_variants_exclude_list() {
        let f = vcf();
        let exclude: HashSet<SnpId> = [SnpId::new(100, "A", "G")].into_iter().collect();
        let split = resolve_variants(f.path(), "22", 1, 1000, Some(&exclude)).unwrap();
        assert_eq!(split.keep.snps, vec![SnpId::new(900, "T", "C")]);
    }

    #[test]
    fn test_parse_gt() {
        assert_eq!(parse_gt(Some("0|1")), (1, 0));
        assert_eq!(parse_gt(Some("1|0")), (1, 1));
        assert_eq!(parse_gt(Some("0/1")), (1, MISSING_GT));
        assert_eq!(parse_gt(Some("1/1")), (2, MISSING_GT));
        assert_eq!(parse_gt(Some("1|1")), (2, 1));
        assert_eq!(parse_gt(Some(".|.")), (MISSING_GT, MISSING_GT));
        assert_eq!(parse_gt(Some("0")), (MISSING_GT, MISSING_GT));
        assert_eq!(parse_gt(None), (MISSING_GT, MISSING_GT));
    }
}
