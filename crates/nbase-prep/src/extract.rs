//! Gene-scoped extraction: the gene's counts row, its covariate matrix and the
//! posterior quantiles to report.

use anyhow::anyhow;
use log::{info, warn};
use nbase_io::{load_gene_counts, load_labeled_matrix, GeneCounts, LabeledMatrix};
use ndarray::{concatenate, Array2, Axis};
use std::path::Path;

use crate::error::{PrepError, Result};

/// Quantiles reported when no credible mass is requested.
pub const DEFAULT_QUANTILES: [f64; 7] = [0.005, 0.025, 0.25, 0.5, 0.75, 0.975, 0.995];

/// Centered and scaled covariates; rows follow the counts sample order.
#[derive(Clone, Debug)]
pub struct CovariateMatrix {
    pub names: Vec<String>,
    /// shape: (n_samples, n_covariates)
    pub values: Array2<f64>,
}

impl CovariateMatrix {
    pub fn n_covariates(&self) -> usize {
        self.values.ncols()
    }
}

/// Exact-match lookup of the gene's counts row.
pub fn extract_counts(path: &Path, gene_id: &str) -> Result<GeneCounts> {
    let counts =
        load_gene_counts(path, gene_id)?.ok_or_else(|| PrepError::GeneNotFound(gene_id.to_string()))?;
    info!(
        "Loaded counts for {} across {} samples",
        gene_id,
        counts.n_samples()
    );
    Ok(counts)
}

/// Build the covariate matrix from an optional gene-specific or sample-generic
/// table plus an optional gene-independent table.
///
/// Returns `Ok(None)` when neither source is supplied or every column was
/// constant.
pub fn extract_covariates(
    covariates: Option<&Path>,
    extra: Option<&Path>,
    gene_id: &str,
    samples: &[String],
) -> Result<Option<CovariateMatrix>> {
    let main = match covariates {
        Some(path) => Some(orient_covariates(&load_labeled_matrix(path)?, gene_id, samples)?),
        None => None,
    };
    let extra = match extra {
        Some(path) => Some(align_by_name(&load_labeled_matrix(path)?, samples)?),
        None => None,
    };

    let combined = match (main, extra) {
        (None, None) => return Ok(None),
        (Some(m), None) => m,
        (None, Some(e)) => e,
        (Some(m), Some(e)) => {
            let mut names = m.names;
            names.extend(e.names);
            let values = concatenate(Axis(1), &[m.values.view(), e.values.view()])
                .map_err(|e| anyhow!("joining covariates: {}", e))?;
            CovariateMatrix { names, values }
        }
    };

    let scaled = scale_columns(combined)?;
    Ok((scaled.n_covariates() > 0).then_some(scaled))
}

/// Gene-specific tables are keyed by gene id; anything else is sample-generic.
fn orient_covariates(
    table: &LabeledMatrix,
    gene_id: &str,
    samples: &[String],
) -> Result<CovariateMatrix> {
    if let Some(row) = table.row_index(gene_id) {
        let name = if table.corner.trim().is_empty() {
            "gene_covariate".to_string()
        } else {
            table.corner.clone()
        };
        let by_sample = LabeledMatrix {
            corner: table.corner.clone(),
            row_ids: table.col_ids.clone(),
            col_ids: vec![name],
            values: table
                .values
                .row(row)
                .to_owned()
                .insert_axis(Axis(1)),
        };
        return align_rows(&by_sample, samples);
    }

    let rows_match = samples.iter().all(|s| table.row_ids.contains(s));
    let cols_match = samples.iter().all(|s| table.col_ids.contains(s));
    if rows_match {
        align_rows(table, samples)
    } else if cols_match {
        align_rows(&table.transposed(), samples)
    } else if table.row_ids.len() == samples.len() {
        warn!("Covariate rows are not labelled by sample; assuming counts sample order");
        align_rows(table, samples)
    } else if table.col_ids.len() == samples.len() {
        warn!("Covariate columns are not labelled by sample; assuming counts sample order");
        align_rows(&table.transposed(), samples)
    } else {
        Err(PrepError::CovariateMismatch {
            rows: table.row_ids.len(),
            samples: samples.len(),
        })
    }
}

fn align_by_name(table: &LabeledMatrix, samples: &[String]) -> Result<CovariateMatrix> {
    if samples.iter().all(|s| table.row_ids.contains(s)) {
        align_rows(table, samples)
    } else if samples.iter().all(|s| table.col_ids.contains(s)) {
        align_rows(&table.transposed(), samples)
    } else {
        Err(PrepError::CovariateMismatch {
            rows: table.row_ids.len(),
            samples: samples.len(),
        })
    }
}

/// Reorder rows to `samples`; falls back to positional order when the row
/// labels are not sample names but the count matches.
fn align_rows(table: &LabeledMatrix, samples: &[String]) -> Result<CovariateMatrix> {
    if table.row_ids.len() != samples.len() {
        return Err(PrepError::CovariateMismatch {
            rows: table.row_ids.len(),
            samples: samples.len(),
        });
    }
    let order: Vec<usize> = match samples
        .iter()
        .map(|s| table.row_index(s))
        .collect::<Option<Vec<usize>>>()
    {
        Some(order) => order,
        None => (0..samples.len()).collect(),
    };
    let values = table.values.select(Axis(0), &order);
    if values.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("covariates contain missing or non-finite values").into());
    }
    Ok(CovariateMatrix {
        names: table.col_ids.clone(),
        values,
    })
}

/// Center each column to mean 0 and scale to unit sample variance.
///
/// Constant columns cannot be scaled and are dropped.
pub fn scale_columns(matrix: CovariateMatrix) -> Result<CovariateMatrix> {
    let n = matrix.values.nrows();
    if n < 2 {
        return Err(anyhow!("need at least 2 samples to scale covariates").into());
    }
    let mut keep = Vec::new();
    let mut scaled = matrix.values.clone();
    for (j, mut col) in scaled.axis_iter_mut(Axis(1)).enumerate() {
        let mean = col.sum() / n as f64;
        let var = col.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        let sd = var.sqrt();
        if sd < 1e-12 {
            warn!("Dropping constant covariate '{}'", matrix.names[j]);
            continue;
        }
        col.mapv_inplace(|x| (x - mean) / sd);
        keep.push(j);
    }
    Ok(CovariateMatrix {
        names: keep.iter().map(|&j| matrix.names[j].clone()).collect(),
        values: scaled.select(Axis(1), &keep),
    })
}

/// Quantiles to report for the requested credible masses.
pub fn report_quantiles(prob: &[f64]) -> Vec<f64> {
    if prob.is_empty() {
        return DEFAULT_QUANTILES.to_vec();
    }
    let mut q: Vec<f64> = prob
        .iter()
        .flat_map(|p| [(1.0 - p) / 2.0, (1.0 + p) / 2.0])
        .chain([0.25, 0.5, 0.75])
        .collect();
    q.sort_by(|a, b| a.total_cmp(b));
    q.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
    q
}
