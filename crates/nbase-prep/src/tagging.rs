//! LD tagging of candidate rSNPs.
//!
//! Candidates are clustered by complete linkage on `1 - r²` and the tree is
//! cut at `1 - threshold`, so every pair inside a group has r² at least the
//! threshold. One tag per group is tested downstream.

use log::{debug, info, warn};
use nbase_io::{HaplotypeMatrix, SnpId};
use ndarray::{Array2, Axis};
use serde::Serialize;

use crate::config::TagThreshold;
use crate::error::{PrepError, Result};
use crate::ledger::{ExclusionLedger, ExclusionReason};

const SD_EPS: f64 = 1e-10;

/// One LD group: its tag and every member (the tag included).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagGroup {
    pub tag: SnpId,
    pub members: Vec<SnpId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TagTable {
    pub groups: Vec<TagGroup>,
}

impl TagTable {
    /// Every candidate tags itself.
    pub fn identity(ids: &[SnpId]) -> Self {
        Self {
            groups: ids
                .iter()
                .map(|id| TagGroup {
                    tag: id.clone(),
                    members: vec![id.clone()],
                })
                .collect(),
        }
    }

    pub fn tags(&self) -> Vec<SnpId> {
        self.groups.iter().map(|g| g.tag.clone()).collect()
    }

    pub fn n_tags(&self) -> usize {
        self.groups.len()
    }
}

/// Panel dosages of the requested rows, shape (n_individuals, rows.len()).
pub fn panel_dosages(panel: &HaplotypeMatrix, rows: &[usize]) -> Array2<f64> {
    let n_ind = panel.n_individuals();
    let mut dosages = Array2::<f64>::zeros((n_ind, rows.len()));
    for (j, &row) in rows.iter().enumerate() {
        for k in 0..n_ind {
            dosages[(k, j)] = panel.dosage(row, k) as f64;
        }
    }
    dosages
}

fn column_sd(col: ndarray::ArrayView1<f64>) -> f64 {
    let n = col.len();
    if n < 2 {
        return 0.0;
    }
    let mean = col.sum() / n as f64;
    (col.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
}

/// Remove candidates that do not vary in the panel.
///
/// Each dropped SNP is recorded as "zero standard deviation". Fails when
/// nothing is left.
pub fn drop_zero_variance(
    dosages: &Array2<f64>,
    ids: &[SnpId],
    ledger: &mut ExclusionLedger,
) -> Result<(Array2<f64>, Vec<SnpId>)> {
    let mut keep = Vec::with_capacity(ids.len());
    for (j, col) in dosages.axis_iter(Axis(1)).enumerate() {
        if column_sd(col) < SD_EPS {
            ledger.record(&ids[j], ExclusionReason::ZeroVariance);
        } else {
            keep.push(j);
        }
    }
    if keep.is_empty() {
        return Err(PrepError::AllZeroVariance);
    }
    if keep.len() < ids.len() {
        warn!(
            "{} candidate SNPs have zero standard deviation in the panel",
            ids.len() - keep.len()
        );
    }
    Ok((
        dosages.select(Axis(1), &keep),
        keep.iter().map(|&j| ids[j].clone()).collect(),
    ))
}

/// Squared Pearson correlation between every pair of columns.
fn r2_matrix(dosages: &Array2<f64>) -> Array2<f64> {
    let (n, m) = dosages.dim();
    let mut standardized = dosages.clone();
    for mut col in standardized.axis_iter_mut(Axis(1)) {
        let mean = col.sum() / n as f64;
        let sd = column_sd(col.view()).max(SD_EPS);
        col.mapv_inplace(|x| (x - mean) / sd);
    }

    let mut r2 = Array2::<f64>::zeros((m, m));
    for i in 0..m {
        for j in i..m {
            let r = standardized.column(i).dot(&standardized.column(j)) / (n - 1) as f64;
            let v = (r * r).min(1.0);
            r2[(i, j)] = v;
            r2[(j, i)] = v;
        }
    }
    r2
}

/// Complete-linkage merges `(a, b, height)` via the nearest-neighbour chain.
///
/// Cluster slots are indexed by one of their original members.
fn complete_linkage(dist: &Array2<f64>) -> Vec<(usize, usize, f64)> {
    let n = dist.nrows();
    let mut d = dist.clone();
    let mut active = vec![true; n];
    let mut remaining = n;
    let mut chain: Vec<usize> = Vec::new();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while remaining > 1 {
        if chain.is_empty() {
            let Some(first) = active.iter().position(|&a| a) else {
                break;
            };
            chain.push(first);
        }
        let Some(&a) = chain.last() else {
            break;
        };
        let prev = chain.len().checked_sub(2).map(|i| chain[i]);
        let mut best = prev;
        let mut best_d = prev.map_or(f64::INFINITY, |p| d[(a, p)]);
        for k in (0..n).filter(|&k| active[k] && k != a) {
            if d[(a, k)] < best_d {
                best = Some(k);
                best_d = d[(a, k)];
            }
        }
        let Some(b) = best else {
            break;
        };
        if Some(b) != prev {
            chain.push(b);
            continue;
        }

        chain.truncate(chain.len() - 2);
        merges.push((a, b, best_d));
        active[a] = false;
        remaining -= 1;
        for k in (0..n).filter(|&k| active[k] && k != b) {
            let merged = d[(a, k)].max(d[(b, k)]);
            d[(b, k)] = merged;
            d[(k, b)] = merged;
        }
    }
    merges
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Group candidates in LD and choose one tag per group.
///
/// `ids` must be in position order. With tagging disabled every candidate is
/// its own tag.
pub fn tag_snps(dosages: &Array2<f64>, ids: &[SnpId], threshold: TagThreshold) -> Result<TagTable> {
    let r2_cut = match threshold {
        TagThreshold::Disabled => return Ok(TagTable::identity(ids)),
        TagThreshold::R2(t) => t,
    };
    if ids.len() == 1 {
        return Err(PrepError::SingleSnpTagging);
    }

    let r2 = r2_matrix(dosages);
    let dist = r2.mapv(|v| 1.0 - v);
    let height = 1.0 - r2_cut;

    let n = ids.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for (a, b, h) in complete_linkage(&dist) {
        if h <= height + 1e-12 {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut root_of: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        let root = find(&mut parent, i);
        match root_of[root] {
            Some(c) => clusters[c].push(i),
            None => {
                root_of[root] = Some(clusters.len());
                clusters.push(vec![i]);
            }
        }
    }

    let mut groups: Vec<TagGroup> = clusters
        .into_iter()
        .map(|members| {
            let tag = pick_tag(&members, &r2, ids);
            TagGroup {
                tag: ids[tag].clone(),
                members: members.iter().map(|&i| ids[i].clone()).collect(),
            }
        })
        .collect();
    groups.sort_by(|a, b| a.tag.cmp(&b.tag));

    info!(
        "Tagging at r2 >= {}: {} candidates in {} groups",
        r2_cut,
        n,
        groups.len()
    );
    for g in groups.iter().filter(|g| g.members.len() > 1) {
        debug!("Tag {} covers {} SNPs", g.tag, g.members.len());
    }
    Ok(TagTable { groups })
}

/// Member with the highest mean r² to the rest of its group; ties go to the
/// lowest position.
fn pick_tag(members: &[usize], r2: &Array2<f64>, ids: &[SnpId]) -> usize {
    if members.len() == 1 {
        return members[0];
    }
    let denom = (members.len() - 1) as f64;
    let mean_r2 = |i: usize| {
        members
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| r2[(i, j)])
            .sum::<f64>()
            / denom
    };
    let mut best = members[0];
    let mut best_score = mean_r2(best);
    for &i in &members[1..] {
        let score = mean_r2(i);
        let better = score > best_score + 1e-12
            || ((score - best_score).abs() <= 1e-12 && ids[i].position() < ids[best].position());
        if better {
            best = i;
            best_score = score;
        }
    }
    best
}
