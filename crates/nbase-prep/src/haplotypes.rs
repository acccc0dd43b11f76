//! Phasing of study samples against the panel's fSNP haplotypes.
//!
//! Panel haplotypes are collapsed to their distinct fSNP patterns. A sample is
//! explained by ordered pattern pairs `(hap1, hap2)` that agree with its fSNP
//! calls: a phased call fixes the allele of each haplotype, an unphased call
//! only their sum. Each pair is weighted by the product of the pattern
//! frequencies. The rSNP genotype then follows from how each pattern splits
//! by the rSNP allele in the panel.
//!
//! Patterns that agree at every called fSNP of a sample cannot be told apart,
//! so for samples with missing calls they are merged into groups and the pairs
//! are formed between groups.

use log::warn;
use nbase_io::HaplotypeMatrix;
use std::collections::HashMap;

use crate::ase::{saturating_sum, AseCounts};
use crate::fsnp::FsnpGenotypes;

/// One compatible haplotype pair of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternPair {
    /// Pattern index, or pattern group index for samples with missing calls.
    pub hap1: usize,
    pub hap2: usize,
    pub weight: f64,
    /// Reads carried by hap2 over the sample's usable fSNPs; only for
    /// informative ASE individuals.
    pub hap2_reads: Option<u32>,
}

/// One phased ASE configuration of an individual for a given rSNP.
#[derive(Debug, Clone, PartialEq)]
pub struct AseConfig {
    /// 0 hom ref, 2 hom alt, 1 alt on hap2, -1 alt on hap1.
    pub g: i8,
    pub n: u32,
    pub p: f64,
}

/// A sample's call at one fSNP.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Call {
    Missing,
    Unphased(u8),
    /// Alleles on hap1 and hap2.
    Phased(u8, u8),
}

impl Call {
    fn new(genotype: i8, hap1: i8) -> Self {
        match (genotype, hap1) {
            (0..=2, 0..=1) if (0..=1).contains(&(genotype - hap1)) => {
                Call::Phased(hap1 as u8, (genotype - hap1) as u8)
            }
            (0..=2, _) => Call::Unphased(genotype as u8),
            _ => Call::Missing,
        }
    }

    fn is_called(self) -> bool {
        self != Call::Missing
    }

    fn is_phased_het(self) -> bool {
        matches!(self, Call::Phased(a, b) if a != b)
    }

    /// Allele hap2 must carry when hap1 carries `x`.
    fn partner(self, x: u8) -> Option<u8> {
        match self {
            Call::Missing => None,
            Call::Unphased(g) => g.checked_sub(x).filter(|&y| y <= 1),
            Call::Phased(a, b) => (a == x).then_some(b),
        }
    }
}

#[derive(Debug, Clone)]
struct SamplePhase {
    /// Pattern groups indistinguishable at the called fSNPs; `None` when every
    /// fSNP is called and pairs index patterns directly.
    groups: Option<Vec<Vec<usize>>>,
    pairs: Vec<PatternPair>,
}

impl SamplePhase {
    /// A pattern standing for `hap`; only its alleles at called fSNPs are
    /// meaningful.
    fn representative(&self, hap: usize) -> usize {
        match &self.groups {
            Some(groups) => groups[hap][0],
            None => hap,
        }
    }
}

/// Read-only phasing state shared by every rSNP of a gene.
#[derive(Debug, Clone)]
pub struct PhasingContext {
    fsnp_rows: Vec<usize>,
    pattern_of_hap: Vec<usize>,
    patterns: Vec<Vec<u8>>,
    counts: Vec<usize>,
    samples: Vec<SamplePhase>,
}

impl PhasingContext {
    /// Build the context for `n_samples` study samples.
    ///
    /// Without fSNPs there is a single empty pattern and every sample gets the
    /// panel prior.
    pub fn new(
        panel: &HaplotypeMatrix,
        fsnps: Option<&FsnpGenotypes>,
        ase: Option<&AseCounts>,
        n_samples: usize,
    ) -> Self {
        let fsnps = fsnps.filter(|f| {
            let in_panel = f.fsnps.iter().all(|id| panel.contains(id));
            if !in_panel {
                warn!("fSNPs missing from the panel window; phasing with the panel prior");
            }
            in_panel
        });
        let fsnp_rows: Vec<usize> = fsnps
            .map(|f| f.fsnps.iter().filter_map(|id| panel.row(id)).collect())
            .unwrap_or_default();

        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut patterns: Vec<Vec<u8>> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let mut pattern_of_hap = Vec::with_capacity(panel.n_haplotypes());
        for h in 0..panel.n_haplotypes() {
            let pattern: Vec<u8> = fsnp_rows.iter().map(|&r| panel.haplotypes[(r, h)]).collect();
            let p = *index.entry(pattern.clone()).or_insert_with(|| {
                patterns.push(pattern);
                counts.push(0);
                patterns.len() - 1
            });
            counts[p] += 1;
            pattern_of_hap.push(p);
        }

        let n_haps = panel.n_haplotypes().max(1) as f64;
        let freqs: Vec<f64> = counts.iter().map(|&c| c as f64 / n_haps).collect();

        let samples = (0..n_samples)
            .map(|i| {
                let calls: Vec<Call> = match fsnps {
                    Some(f) => f
                        .genotypes
                        .row(i)
                        .iter()
                        .zip(f.hap1.row(i))
                        .map(|(&g, &h)| Call::new(g, h))
                        .collect(),
                    None => Vec::new(),
                };
                let mut phase = sample_phase(&calls, &patterns, &freqs, &index);
                if let Some(ase) = ase.filter(|a| a.informative.get(i).copied().unwrap_or(false)) {
                    orient_pairs(&mut phase, &patterns, &calls, ase, i);
                }
                phase
            })
            .collect::<Vec<_>>();

        Self {
            fsnp_rows,
            pattern_of_hap,
            patterns,
            counts,
            samples,
        }
    }

    pub fn n_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn n_fsnps(&self) -> usize {
        self.fsnp_rows.len()
    }

    /// Samples with no compatible haplotype pair.
    pub fn incompatible_samples(&self) -> Vec<usize> {
        (0..self.samples.len())
            .filter(|&i| self.samples[i].pairs.is_empty())
            .collect()
    }

    /// `P(rSNP allele = 1 | pattern)` for every pattern.
    pub fn alt_given_pattern(&self, panel: &HaplotypeMatrix, rsnp_row: usize) -> Vec<f64> {
        let mut alt = vec![0usize; self.patterns.len()];
        for (h, &p) in self.pattern_of_hap.iter().enumerate() {
            alt[p] += panel.haplotypes[(rsnp_row, h)] as usize;
        }
        alt.iter()
            .zip(&self.counts)
            .map(|(&a, &c)| if c == 0 { 0.0 } else { a as f64 / c as f64 })
            .collect()
    }

    /// `P(rSNP allele = 1)` for one haplotype of a sample's pair.
    fn hap_alt(&self, sample: usize, hap: usize, alt: &[f64]) -> f64 {
        let Some(groups) = &self.samples[sample].groups else {
            return alt[hap];
        };
        let (weighted, total) = groups[hap].iter().fold((0.0, 0usize), |(w, t), &p| {
            (w + alt[p] * self.counts[p] as f64, t + self.counts[p])
        });
        if total == 0 {
            0.0
        } else {
            weighted / total as f64
        }
    }

    /// Posterior rSNP genotype probabilities of `sample`; `None` when the
    /// sample has no compatible pair.
    pub fn genotype_probs(&self, sample: usize, alt: &[f64]) -> Option<[f64; 3]> {
        let pairs = &self.samples[sample].pairs;
        if pairs.is_empty() {
            return None;
        }
        let mut probs = [0.0; 3];
        let mut total = 0.0;
        for pair in pairs {
            let a = self.hap_alt(sample, pair.hap1, alt);
            let b = self.hap_alt(sample, pair.hap2, alt);
            probs[0] += pair.weight * (1.0 - a) * (1.0 - b);
            probs[1] += pair.weight * (a * (1.0 - b) + (1.0 - a) * b);
            probs[2] += pair.weight * a * b;
            total += pair.weight;
        }
        if total <= 0.0 {
            return None;
        }
        Some(probs.map(|p| p / total))
    }

    /// Phased ASE configurations of an informative `sample`, merged on equal
    /// `(g, n)` and normalised.
    pub fn ase_configs(&self, sample: usize, alt: &[f64]) -> Vec<AseConfig> {
        let mut merged: Vec<AseConfig> = Vec::new();
        let mut total = 0.0;
        for pair in &self.samples[sample].pairs {
            let Some(n) = pair.hap2_reads else {
                continue;
            };
            let a1 = self.hap_alt(sample, pair.hap1, alt);
            let a2 = self.hap_alt(sample, pair.hap2, alt);
            let split = [
                (0i8, (1.0 - a1) * (1.0 - a2)),
                (2, a1 * a2),
                (1, (1.0 - a1) * a2),
                (-1, a1 * (1.0 - a2)),
            ];
            for (g, p) in split {
                let w = pair.weight * p;
                if w <= 0.0 {
                    continue;
                }
                total += w;
                match merged.iter_mut().find(|c| c.g == g && c.n == n) {
                    Some(c) => c.p += w,
                    None => merged.push(AseConfig { g, n, p: w }),
                }
            }
        }
        if total > 0.0 {
            for c in &mut merged {
                c.p /= total;
            }
        }
        merged
    }
}

/// Ordered pairs agreeing with `calls`. Hap1 may be any pattern (group); the
/// calls then fix hap2 at every called fSNP, so it is looked up rather than
/// searched.
fn sample_phase(
    calls: &[Call],
    patterns: &[Vec<u8>],
    freqs: &[f64],
    index: &HashMap<Vec<u8>, usize>,
) -> SamplePhase {
    let pair = |a: usize, b: usize, weight: f64| PatternPair {
        hap1: a,
        hap2: b,
        weight,
        hap2_reads: None,
    };
    let called: Vec<usize> = (0..calls.len()).filter(|&j| calls[j].is_called()).collect();

    if called.len() == calls.len() {
        let pairs = patterns
            .iter()
            .enumerate()
            .filter_map(|(a, pattern)| {
                let partner: Option<Vec<u8>> =
                    calls.iter().zip(pattern).map(|(c, &x)| c.partner(x)).collect();
                let b = *index.get(&partner?)?;
                Some(pair(a, b, freqs[a] * freqs[b]))
            })
            .collect();
        return SamplePhase { groups: None, pairs };
    }

    let mut lookup: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut keys: Vec<Vec<u8>> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut weights: Vec<f64> = Vec::new();
    for (p, pattern) in patterns.iter().enumerate() {
        let key: Vec<u8> = called.iter().map(|&j| pattern[j]).collect();
        let g = *lookup.entry(key.clone()).or_insert_with(|| {
            keys.push(key);
            groups.push(Vec::new());
            weights.push(0.0);
            keys.len() - 1
        });
        groups[g].push(p);
        weights[g] += freqs[p];
    }
    let pairs = keys
        .iter()
        .enumerate()
        .filter_map(|(a, key)| {
            let partner: Option<Vec<u8>> = called
                .iter()
                .zip(key)
                .map(|(&j, &x)| calls[j].partner(x))
                .collect();
            let b = *lookup.get(&partner?)?;
            Some(pair(a, b, weights[a] * weights[b]))
        })
        .collect();
    SamplePhase {
        groups: Some(groups),
        pairs,
    }
}

/// Count the reads hap2 carries. Pairs of a sample with a phased
/// heterozygous call keep the VCF orientation; otherwise the alt allele of
/// the first usable heterozygous fSNP is put on hap2.
fn orient_pairs(
    phase: &mut SamplePhase,
    patterns: &[Vec<u8>],
    calls: &[Call],
    ase: &AseCounts,
    sample: usize,
) {
    let (m, n) = (&ase.m[sample], &ase.n[sample]);
    let anchor = if calls.iter().any(|c| c.is_phased_het()) {
        None
    } else {
        (0..calls.len()).find(|&j| ase.usable[j] && calls[j] == Call::Unphased(1))
    };
    let view: &SamplePhase = phase;
    let allele = |hap: usize, j: usize| patterns[view.representative(hap)][j];

    let oriented: Vec<PatternPair> = view
        .pairs
        .iter()
        .map(|pair| {
            let mut pair = pair.clone();
            if let Some(anchor) = anchor {
                if allele(pair.hap2, anchor) == 0 {
                    std::mem::swap(&mut pair.hap1, &mut pair.hap2);
                }
            }
            // reads sit only at called heterozygous fSNPs
            let reads = saturating_sum((0..m.len()).filter(|&j| m[j] > 0).map(|j| {
                if allele(pair.hap2, j) == 1 {
                    n[j]
                } else {
                    m[j] - n[j]
                }
            }));
            pair.hap2_reads = Some(reads);
            pair
        })
        .collect();
    phase.pairs = oriented;
}
