//! Row- and column-labelled numeric tables (covariate sources).
//!
//! The first column holds row labels, the header holds column labels. Whether
//! rows are genes, samples or covariates is decided by the caller.

use anyhow::{anyhow, Result};
use ndarray::Array2;
use std::path::Path;

use crate::table_reader;

#[derive(Clone, Debug)]
pub struct LabeledMatrix {
    /// Header of the label column.
    pub corner: String,
    pub row_ids: Vec<String>,
    pub col_ids: Vec<String>,
    /// shape: (row_ids.len(), col_ids.len())
    pub values: Array2<f64>,
}

impl LabeledMatrix {
    pub fn row_index(&self, id: &str) -> Option<usize> {
        self.row_ids.iter().position(|r| r == id)
    }

    pub fn transposed(&self) -> LabeledMatrix {
        LabeledMatrix {
            corner: self.corner.clone(),
            row_ids: self.col_ids.clone(),
            col_ids: self.row_ids.clone(),
            values: self.values.t().to_owned(),
        }
    }
}

/// Load a labelled numeric matrix. Empty or `NA` cells become NaN.
pub fn load_labeled_matrix<P: AsRef<Path>>(path: P) -> Result<LabeledMatrix> {
    let path = path.as_ref();
    let mut rdr = table_reader(path)?;
    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err(anyhow!(
            "Table {} needs at least 2 columns: id, <values...>",
            path.display()
        ));
    }
    let corner = headers.get(0).unwrap_or("").to_string();
    let col_ids: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    let n_cols = col_ids.len();

    let mut row_ids = Vec::new();
    let mut flat = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.is_empty() {
            continue;
        }
        row_ids.push(record.get(0).unwrap_or("").to_string());
        for i in 1..=n_cols {
            let raw = record.get(i).unwrap_or("");
            let value = if raw.is_empty() || raw.eq_ignore_ascii_case("na") {
                f64::NAN
            } else {
                raw.parse::<f64>().map_err(|_| {
                    anyhow!("Non-numeric value '{}' in {} (row {})", raw, path.display(), row_ids.len())
                })?
            };
            flat.push(value);
        }
    }

    if row_ids.is_empty() {
        return Err(anyhow!("No rows found in {}", path.display()));
    }

    let values = Array2::from_shape_vec((row_ids.len(), n_cols), flat)?;
    Ok(LabeledMatrix {
        corner,
        row_ids,
        col_ids,
        values,
    })
}
