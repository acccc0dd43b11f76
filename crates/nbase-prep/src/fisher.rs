//! Fisher exact test comparing fSNP heterozygosity between study samples and
//! the reference panel.

use log::debug;
use nbase_io::{HaplotypeMatrix, SnpId};
use serde::Serialize;
use statrs::function::factorial::ln_binomial;

/// Relative tolerance when collecting tables as or more extreme than the
/// observed one.
const REL_TOL: f64 = 1e-7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FisherResult {
    pub id: SnpId,
    pub odds_ratio: f64,
    pub p_value: f64,
}

/// Two-sided Fisher exact test on the 2x2 table `[[a, b], [c, d]]`.
///
/// Sums the hypergeometric probabilities of every table with the observed
/// margins that is no more likely than the observed table.
pub fn fisher_exact_two_sided(a: u64, b: u64, c: u64, d: u64) -> f64 {
    let row1 = a + b;
    let row2 = c + d;
    let col1 = a + c;
    let n = row1 + row2;
    if n == 0 || row1 == 0 || row2 == 0 || col1 == 0 || col1 == n {
        return 1.0;
    }

    let ln_total = ln_binomial(n, col1);
    let ln_prob = |x: u64| ln_binomial(row1, x) + ln_binomial(row2, col1 - x) - ln_total;

    let lo = col1.saturating_sub(row2);
    let hi = row1.min(col1);
    let observed = ln_prob(a);
    let cutoff = observed + REL_TOL.ln_1p();

    let p: f64 = (lo..=hi)
        .map(ln_prob)
        .filter(|&lp| lp <= cutoff)
        .map(f64::exp)
        .sum();
    p.min(1.0)
}

/// Sample odds ratio of `[[a, b], [c, d]]`; infinite when `b * c == 0` and
/// NaN when the table is degenerate.
pub fn odds_ratio(a: u64, b: u64, c: u64, d: u64) -> f64 {
    let num = (a * d) as f64;
    let den = (b * c) as f64;
    if den == 0.0 {
        if num == 0.0 {
            f64::NAN
        } else {
            f64::INFINITY
        }
    } else {
        num / den
    }
}

/// Heterozygous and homozygous counts among called genotypes.
fn het_hom<I: IntoIterator<Item = i8>>(genotypes: I) -> (u64, u64) {
    genotypes
        .into_iter()
        .filter(|&g| g >= 0)
        .fold((0, 0), |(het, hom), g| {
            if g == 1 {
                (het + 1, hom)
            } else {
                (het, hom + 1)
            }
        })
}

/// Test every fSNP for a heterozygosity difference between the study samples
/// and the panel.
///
/// `sample_genotypes` yields, per fSNP, its id and the study genotypes
/// (missing < 0). `individuals` restricts the panel side; empty means every
/// panel individual. fSNPs absent from the panel are skipped.
pub fn fisher_heterozygosity_test<'a, I, G>(
    sample_genotypes: I,
    panel: &HaplotypeMatrix,
    individuals: &[usize],
) -> Vec<FisherResult>
where
    I: IntoIterator<Item = (&'a SnpId, G)>,
    G: IntoIterator<Item = i8>,
{
    let all: Vec<usize>;
    let individuals = if individuals.is_empty() {
        all = (0..panel.n_individuals()).collect();
        &all[..]
    } else {
        individuals
    };

    let mut results = Vec::new();
    for (id, genotypes) in sample_genotypes {
        let Some(row) = panel.row(id) else {
            continue;
        };
        let (s_het, s_hom) = het_hom(genotypes);
        let (p_het, p_hom) = het_hom(individuals.iter().map(|&k| panel.dosage(row, k) as i8));
        let p_value = fisher_exact_two_sided(s_het, s_hom, p_het, p_hom);
        let odds = odds_ratio(s_het, s_hom, p_het, p_hom);
        debug!(
            "Fisher {}: samples {}/{} het, panel {}/{} het, OR = {:.3}, p = {:.3e}",
            id,
            s_het,
            s_het + s_hom,
            p_het,
            p_het + p_hom,
            odds,
            p_value
        );
        results.push(FisherResult {
            id: id.clone(),
            odds_ratio: odds,
            p_value,
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nbase_io::PanelSnp;
    use ndarray::array;

    #[test]
    fn test_fisher_exact_known_values() {
        // tea tasting: [[3, 1], [1, 3]] two-sided p = 0.4857
        assert_relative_eq!(fisher_exact_two_sided(3, 1, 1, 3), 0.485_714_285_7, epsilon = 1e-8);
        // [[10, 0], [0, 10]] two-sided p = 2 / C(20, 10)
        assert_relative_eq!(
            fisher_exact_two_sided(10, 0, 0, 10),
            2.0 / 184_756.0,
            max_relative = 1e-9
        );
        assert_relative_eq!(fisher_exact_two_sided(5, 5, 5, 5), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fisher_degenerate_margins() {
        assert_eq!(fisher_exact_two_sided(0, 0, 3, 4), 1.0);
        assert_eq!(fisher_exact_two_sided(4, 0, 3, 0), 1.0);
    }

    #[test]
    fn test_odds_ratio() {
        assert_relative_eq!(odds_ratio(3, 1, 1, 3), 9.0);
        assert!(odds_ratio(3, 0, 1, 3).is_infinite());
        assert!(odds_ratio(0, 0, 1, 3).is_nan());
    }

    #[test]
    fn test_heterozygosity_test_against_panel() {
        let id = SnpId::new(100, "A", "G");
        let panel = HaplotypeMatrix::new(
            vec![PanelSnp {
                id: id.clone(),
                name: "rs1".into(),
                maf: 0.5,
            }],
            // four individuals, all heterozygous
            array![[0u8, 1, 1, 0, 0, 1, 1, 0]],
        )
        .unwrap();

        let all_het = vec![1i8, 1, 1, 1];
        let res = fisher_heterozygosity_test(vec![(&id, all_het)], &panel, &[]);
        assert_eq!(res.len(), 1);
        assert_relative_eq!(res[0].p_value, 1.0, epsilon = 1e-12);

        let all_hom = vec![0i8, 2, 0, 0, 2, 0, -1];
        let res = fisher_heterozygosity_test(vec![(&id, all_hom)], &panel, &[0, 1]);
        // [[0, 6], [2, 0]]: only the observed table is as extreme
        assert!(res[0].p_value < 0.05);
        assert_eq!(res[0].odds_ratio, 0.0);
    }
}
