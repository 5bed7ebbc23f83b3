//! Data bundles: the micro/macro series handed from a model to the measures.
//!
//! Every series is a `DMatrix<f64>` laid out variables × time. A bundle is
//! created fresh by one model call and owned by the sweep iteration that
//! created it.

use std::collections::BTreeMap;
use std::io::{self, Write};

use nalgebra::DMatrix;

use crate::error::SweepError;

pub const MICRO: &str = "micro";
pub const MACRO: &str = "macro";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBundle {
    series: BTreeMap<String, DMatrix<f64>>,
}

impl DataBundle {
    /// Bundle holding only a micro series.
    pub fn new(micro: DMatrix<f64>) -> Self {
        let mut bundle = Self::default();
        bundle.insert(MICRO, micro);
        bundle
    }

    pub fn with_macro(mut self, macro_series: DMatrix<f64>) -> Self {
        self.insert(MACRO, macro_series);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, series: DMatrix<f64>) {
        self.series.insert(key.into(), series);
    }

    pub fn get(&self, key: &str) -> Option<&DMatrix<f64>> {
        self.series.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// A required entry; missing keys are invalid arguments.
    pub fn require(&self, key: &str) -> Result<&DMatrix<f64>, SweepError> {
        self.series
            .get(key)
            .ok_or_else(|| SweepError::invalid("data", format!("data bundle has no '{key}' entry")))
    }

    pub fn micro(&self) -> Result<&DMatrix<f64>, SweepError> {
        self.require(MICRO)
    }

    pub fn macro_series(&self) -> Option<&DMatrix<f64>> {
        self.series.get(MACRO)
    }

    /// Time-major CSV: header `t,<key>_0,<key>_1,...` over every series in
    /// key order, one line per sample. NaN and samples past the end of a
    /// shorter series are empty.
    pub fn write_csv(&self, mut writer: impl Write) -> io::Result<()> {
        let mut header = vec!["t".to_string()];
        for (key, series) in &self.series {
            header.extend((0..series.nrows()).map(|i| format!("{key}_{i}")));
        }
        writeln!(writer, "{}", header.join(","))?;

        let samples = self.series.values().map(DMatrix::ncols).max().unwrap_or(0);
        for t in 0..samples {
            let mut fields = vec![t.to_string()];
            for series in self.series.values() {
                for i in 0..series.nrows() {
                    fields.push(match series.get((i, t)) {
                        Some(v) if !v.is_nan() => v.to_string(),
                        _ => String::new(),
                    });
                }
            }
            writeln!(writer, "{}", fields.join(","))?;
        }
        Ok(())
    }
}

/// True when any element is NaN.
pub fn has_nan(series: &DMatrix<f64>) -> bool {
    series.iter().any(|v| v.is_nan())
}

/// Series must have at least 2 rows or at least 2 columns.
pub fn require_min_size(series: &DMatrix<f64>, name: &str) -> Result<(), SweepError> {
    if series.nrows() < 2 && series.ncols() < 2 {
        return Err(SweepError::invalid(
            name,
            format!(
                "series has less than 2 rows and less than 2 columns ({}x{})",
                series.nrows(),
                series.ncols()
            ),
        ));
    }
    Ok(())
}

/// Rows of a matrix as nested vectors (row-major).
pub fn matrix_rows(series: &DMatrix<f64>) -> Vec<Vec<f64>> {
    series
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micro_is_required() {
        let mut bundle = DataBundle::default();
        assert!(matches!(bundle.micro(), Err(SweepError::InvalidArgument { .. })));
        bundle.insert(MICRO, DMatrix::zeros(2, 10));
        assert!(bundle.micro().is_ok());
        assert!(bundle.macro_series().is_none());
    }

    #[test]
    fn min_size_needs_two_rows_or_two_cols() {
        assert!(require_min_size(&DMatrix::zeros(1, 1), "micro").is_err());
        assert!(require_min_size(&DMatrix::zeros(1, 5), "micro").is_ok());
        assert!(require_min_size(&DMatrix::zeros(5, 1), "micro").is_ok());
    }

    #[test]
    fn csv_is_time_major_with_keyed_columns() {
        let micro = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, f64::NAN, 6.0]);
        let macro_series = DMatrix::from_row_slice(1, 2, &[5.0, 7.0]);
        let bundle = DataBundle::new(micro).with_macro(macro_series);
        let mut out = Vec::new();
        bundle.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["t,macro_0,micro_0,micro_1", "0,5,1,4", "1,7,2,", "2,,3,6"]
        );
    }

    #[test]
    fn matrix_rows_are_row_major() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(matrix_rows(&m), vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }
}
