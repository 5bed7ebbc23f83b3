//! Long-format result tables.
//!
//! One [`ResultRow`] per (metric, parameter combination): a `value`, the metric
//! name under `measure`, and any number of parameter columns. Tables
//! concatenate by row union with column union; a row simply lacks the columns
//! it never received, and those cells read back as empty.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SweepError;
use crate::params::Assignment;

pub const VALUE_COLUMN: &str = "value";
pub const MEASURE_COLUMN: &str = "measure";

/// A parameter cell. Callables never reach a table; they are rendered by name
/// before they get here.
///
/// Serialized untagged, except non-finite floats, which JSON cannot carry:
/// they are written as `{"float": "NaN"}` (or `"inf"`, `"-inf"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "CellRepr", try_from = "CellRepr")]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CellRepr {
    Int(i64),
    Float(f64),
    Text(String),
    NonFinite { float: String },
}

impl From<Cell> for CellRepr {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Int(v) => Self::Int(v),
            Cell::Float(v) if !v.is_finite() => Self::NonFinite {
                float: v.to_string(),
            },
            Cell::Float(v) => Self::Float(v),
            Cell::Text(v) => Self::Text(v),
        }
    }
}

impl TryFrom<CellRepr> for Cell {
    type Error = String;

    fn try_from(repr: CellRepr) -> Result<Self, Self::Error> {
        match repr {
            CellRepr::Int(v) => Ok(Self::Int(v)),
            CellRepr::Float(v) => Ok(Self::Float(v)),
            CellRepr::Text(v) => Ok(Self::Text(v)),
            CellRepr::NonFinite { float } => float
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_finite())
                .map(Self::Float)
                .ok_or_else(|| format!("'{float}' is not a non-finite float")),
        }
    }
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Loose equality used by filters: numbers compare numerically (so a
    /// filter `time_lag=1.0` matches an int cell), text compares exactly.
    pub fn matches(&self, other: &Cell) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => approx_eq(a, b),
            _ => self.as_text().is_some() && self.as_text() == other.as_text(),
        }
    }

    /// Parse a CLI-style literal: int, then float, then text.
    pub fn parse_literal(raw: &str) -> Cell {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<i64>() {
            Cell::Int(v)
        } else if let Ok(v) = raw.parse::<f64>() {
            Cell::Float(v)
        } else {
            Cell::Text(raw.to_string())
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

// ---------------------------------------------------------------------
//  Rows
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub value: f64,
    pub measure: String,
    columns: IndexMap<String, Cell>,
}

impl ResultRow {
    pub fn new(value: f64, measure: impl Into<String>) -> Self {
        Self {
            value,
            measure: measure.into(),
            columns: IndexMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, cell: Cell) -> Self {
        self.set(name, cell);
        self
    }

    /// Set a parameter column, replacing any previous value in place.
    pub fn set(&mut self, name: impl Into<String>, cell: Cell) {
        self.columns.insert(name.into(), cell);
    }

    pub fn column(&self, name: &str) -> Option<&Cell> {
        self.columns.get(name)
    }

    /// Any column, including `value` and `measure`.
    pub fn get(&self, name: &str) -> Option<Cell> {
        match name {
            VALUE_COLUMN => Some(Cell::Float(self.value)),
            MEASURE_COLUMN => Some(Cell::Text(self.measure.clone())),
            _ => self.columns.get(name).cloned(),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ---------------------------------------------------------------------
//  Table
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

/// Column-ordered snapshot used for persistence. Missing cells are `null`, and
/// so is a NaN `value` (`null` in the `value` column reads back as NaN).
/// Non-finite parameter cells keep their tagged form and survive the round
/// trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Cell>>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<ResultRow>) -> Self {
        Self { rows }
    }

    /// Row union of `tables` in order. Concatenating nothing is rejected
    /// rather than producing an ill-typed empty table.
    pub fn concat(tables: Vec<ResultTable>) -> Result<Self, SweepError> {
        if tables.is_empty() {
            return Err(SweepError::empty("no tables to concatenate"));
        }
        let rows = tables.into_iter().flat_map(|t| t.rows).collect();
        Ok(Self { rows })
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    pub fn append(&mut self, other: ResultTable) {
        self.rows.extend(other.rows);
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `value`, `measure`, then every parameter column in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut seen: IndexMap<&str, ()> = IndexMap::new();
        for row in &self.rows {
            for name in row.columns.keys() {
                seen.entry(name.as_str()).or_insert(());
            }
        }
        [VALUE_COLUMN, MEASURE_COLUMN]
            .into_iter()
            .chain(seen.into_keys())
            .map(str::to_string)
            .collect()
    }

    /// Set every assignment entry as a constant column on every row.
    pub fn broadcast(&mut self, assignment: &Assignment) {
        let cells = assignment.cells();
        for row in &mut self.rows {
            for (name, cell) in &cells {
                row.set(name.clone(), cell.clone());
            }
        }
    }

    /// Distinct metric names in first-seen order.
    pub fn measures(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for row in &self.rows {
            if !out.contains(&row.measure) {
                out.push(row.measure.clone());
            }
        }
        out
    }

    /// Rows whose `measure` equals `measure` (when given) and whose columns
    /// match every filter. A filter on a column a row lacks excludes the row.
    pub fn filter(&self, measure: Option<&str>, filters: &[(String, Cell)]) -> ResultTable {
        let rows = self
            .rows
            .iter()
            .filter(|row| measure.map_or(true, |m| row.measure == m))
            .filter(|row| {
                filters.iter().all(|(name, wanted)| {
                    row.get(name)
                        .map(|cell| cell.matches(wanted))
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect();
        ResultTable { rows }
    }

    pub fn to_snapshot(&self) -> TableSnapshot {
        let columns = self.columns();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| match c.as_str() {
                        VALUE_COLUMN if row.value.is_nan() => None,
                        _ => row.get(c),
                    })
                    .collect()
            })
            .collect();
        TableSnapshot { columns, rows }
    }

    pub fn from_snapshot(snapshot: TableSnapshot) -> Result<Self, SweepError> {
        let value_idx = column_index(&snapshot.columns, VALUE_COLUMN)?;
        let measure_idx = column_index(&snapshot.columns, MEASURE_COLUMN)?;

        let mut rows = Vec::with_capacity(snapshot.rows.len());
        for (row_idx, cells) in snapshot.rows.into_iter().enumerate() {
            if cells.len() != snapshot.columns.len() {
                return Err(SweepError::invalid(
                    "snapshot",
                    format!(
                        "row {row_idx} has {} cells for {} columns",
                        cells.len(),
                        snapshot.columns.len()
                    ),
                ));
            }
            let value = match &cells[value_idx] {
                None => f64::NAN,
                Some(cell) => cell.as_f64().ok_or_else(|| {
                    SweepError::invalid("snapshot", format!("row {row_idx} has a non-numeric value"))
                })?,
            };
            let measure = cells[measure_idx]
                .as_ref()
                .and_then(Cell::as_text)
                .ok_or_else(|| {
                    SweepError::invalid("snapshot", format!("row {row_idx} has no measure name"))
                })?
                .to_string();

            let mut row = ResultRow::new(value, measure);
            for (idx, cell) in cells.into_iter().enumerate() {
                if idx == value_idx || idx == measure_idx {
                    continue;
                }
                if let Some(cell) = cell {
                    row.set(snapshot.columns[idx].clone(), cell);
                }
            }
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn to_json_string(&self) -> Result<String, SweepError> {
        serde_json::to_string_pretty(&self.to_snapshot())
            .map_err(|e| SweepError::Io(io::Error::other(e)))
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), SweepError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SweepError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: TableSnapshot = serde_json::from_str(&raw)
            .map_err(|e| SweepError::invalid("snapshot", format!("failed to parse table: {e}")))?;
        Self::from_snapshot(snapshot)
    }

    /// CSV with a header row; missing cells and NaN values are empty.
    pub fn write_csv(&self, mut writer: impl Write) -> io::Result<()> {
        let columns = self.columns();
        writeln!(writer, "{}", columns.iter().map(|c| csv_field(c)).collect::<Vec<_>>().join(","))?;
        for row in &self.rows {
            let fields: Vec<String> = columns
                .iter()
                .map(|c| match row.get(c) {
                    Some(Cell::Float(v)) if v.is_nan() => String::new(),
                    Some(cell) => csv_field(&cell.to_string()),
                    None => String::new(),
                })
                .collect();
            writeln!(writer, "{}", fields.join(","))?;
        }
        Ok(())
    }

    /// Pivot `value` for one metric onto a `row_axis` × `col_axis` grid,
    /// averaging duplicate cells and skipping NaN values. Rows are sorted
    /// descending, columns ascending.
    pub fn heatmap(
        &self,
        measure: &str,
        filters: &[(String, Cell)],
        row_axis: &str,
        col_axis: &str,
    ) -> Result<Heatmap, SweepError> {
        let selected = self.filter(Some(measure), filters);
        if selected.is_empty() {
            return Err(SweepError::empty(format!(
                "no rows for measure '{measure}' with the given filters"
            )));
        }

        let mut points = Vec::with_capacity(selected.len());
        for row in selected.rows() {
            let y = axis_value(row, row_axis)?;
            let x = axis_value(row, col_axis)?;
            points.push((y, x, row.value));
        }

        let mut row_values = distinct_sorted(points.iter().map(|p| p.0));
        row_values.reverse();
        let col_values = distinct_sorted(points.iter().map(|p| p.1));

        let mut sums = vec![vec![0.0; col_values.len()]; row_values.len()];
        let mut counts = vec![vec![0usize; col_values.len()]; row_values.len()];
        for (y, x, v) in points {
            if v.is_nan() {
                continue;
            }
            let (Some(i), Some(j)) = (position(&row_values, y), position(&col_values, x)) else {
                continue;
            };
            sums[i][j] += v;
            counts[i][j] += 1;
        }

        let values = sums
            .iter()
            .zip(&counts)
            .map(|(srow, crow)| {
                srow.iter()
                    .zip(crow)
                    .map(|(s, &n)| if n == 0 { f64::NAN } else { s / n as f64 })
                    .collect()
            })
            .collect();

        Ok(Heatmap {
            measure: measure.to_string(),
            row_axis: row_axis.to_string(),
            col_axis: col_axis.to_string(),
            row_values,
            col_values,
            values,
        })
    }
}

fn column_index(columns: &[String], name: &str) -> Result<usize, SweepError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| SweepError::invalid("snapshot", format!("missing '{name}' column")))
}

fn axis_value(row: &ResultRow, axis: &str) -> Result<f64, SweepError> {
    row.get(axis).and_then(|c| c.as_f64()).ok_or_else(|| {
        SweepError::invalid(
            axis,
            format!("row for measure '{}' has no numeric '{axis}' column", row.measure),
        )
    })
}

fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut out: Vec<f64> = values.collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup_by(|a, b| approx_eq(*a, *b));
    out
}

fn position(axis: &[f64], v: f64) -> Option<usize> {
    axis.iter().position(|a| approx_eq(*a, v))
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Metric values on a 2D parameter grid; NaN where no data landed.
#[derive(Debug, Clone, Serialize)]
pub struct Heatmap {
    pub measure: String,
    pub row_axis: String,
    pub col_axis: String,
    pub row_values: Vec<f64>,
    pub col_values: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl Heatmap {
    /// Grid as CSV: header `row_axis\col_axis,<col values...>`, then one line
    /// per row value.
    pub fn write_csv(&self, mut writer: impl Write) -> io::Result<()> {
        let mut header = vec![csv_field(&format!("{}\\{}", self.row_axis, self.col_axis))];
        header.extend(self.col_values.iter().map(|v| v.to_string()));
        writeln!(writer, "{}", header.join(","))?;
        for (y, line) in self.row_values.iter().zip(&self.values) {
            let mut fields = vec![y.to_string()];
            fields.extend(line.iter().map(|v| {
                if v.is_nan() {
                    String::new()
                } else {
                    v.to_string()
                }
            }));
            writeln!(writer, "{}", fields.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: f64, measure: &str, coupling: f64, noise: f64) -> ResultRow {
        ResultRow::new(value, measure)
            .with_column("coupling", Cell::Float(coupling))
            .with_column("noise_corr", Cell::Float(noise))
    }

    #[test]
    fn concat_of_nothing_is_empty_result() {
        let err = ResultTable::concat(Vec::new()).unwrap_err();
        assert!(matches!(err, SweepError::EmptyResult(_)));
    }

    #[test]
    fn columns_are_unioned_in_first_seen_order() {
        let a = ResultTable::from_rows(vec![ResultRow::new(1.0, "m").with_column("x", Cell::Int(1))]);
        let b = ResultTable::from_rows(vec![ResultRow::new(2.0, "m")
            .with_column("y", Cell::Int(2))
            .with_column("x", Cell::Int(3))]);
        let t = ResultTable::concat(vec![a, b]).unwrap();
        assert_eq!(t.columns(), vec!["value", "measure", "x", "y"]);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn snapshot_fills_missing_cells_and_keeps_nan_values() {
        let t = ResultTable::from_rows(vec![
            ResultRow::new(f64::NAN, "a").with_column("x", Cell::Int(1)),
            ResultRow::new(0.5, "b").with_column("error", Cell::Text("boom".to_string())),
        ]);
        let json = t.to_json_string().unwrap();
        let back = ResultTable::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert!(back.rows()[0].value.is_nan());
        assert_eq!(back.rows()[0].column("x"), Some(&Cell::Int(1)));
        assert_eq!(back.rows()[0].column("error"), None);
        assert_eq!(back.rows()[1].value, 0.5);
        assert_eq!(back.to_json_string().unwrap(), json);
    }

    #[test]
    fn nan_parameter_cells_survive_the_snapshot() {
        let t = ResultTable::from_rows(vec![ResultRow::new(0.25, "m")
            .with_column("coupling", Cell::Float(f64::NAN))
            .with_column("noise_corr", Cell::Float(f64::INFINITY))]);
        let json = t.to_json_string().unwrap();
        assert!(json.contains(r#""float": "NaN""#));

        let back = ResultTable::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        let row = &back.rows()[0];
        assert!(matches!(row.column("coupling"), Some(Cell::Float(v)) if v.is_nan()));
        assert_eq!(row.column("noise_corr"), Some(&Cell::Float(f64::INFINITY)));
        assert_eq!(back.to_json_string().unwrap(), json);

        let bad: Result<Cell, _> = serde_json::from_str(r#"{"float": "1.5"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn filter_matches_numbers_loosely() {
        let t = ResultTable::from_rows(vec![
            ResultRow::new(1.0, "m").with_column("time_lag", Cell::Int(1)),
            ResultRow::new(2.0, "m").with_column("time_lag", Cell::Int(3)),
            ResultRow::new(3.0, "other").with_column("time_lag", Cell::Int(1)),
        ]);
        let out = t.filter(Some("m"), &[("time_lag".to_string(), Cell::Float(1.0))]);
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows()[0].value, 1.0);
    }

    #[test]
    fn heatmap_pivots_and_averages() {
        let t = ResultTable::from_rows(vec![
            row(1.0, "m", 0.1, 0.5),
            row(3.0, "m", 0.1, 0.5),
            row(2.0, "m", 0.2, 0.5),
            row(f64::NAN, "m", 0.2, 0.9),
            row(9.0, "other", 0.1, 0.5),
        ]);
        let h = t.heatmap("m", &[], "coupling", "noise_corr").unwrap();
        assert_eq!(h.row_values, vec![0.2, 0.1]);
        assert_eq!(h.col_values, vec![0.5, 0.9]);
        assert_eq!(h.values[0][0], 2.0);
        assert!(h.values[0][1].is_nan());
        assert_eq!(h.values[1][0], 2.0);
        assert!(h.values[1][1].is_nan());

        let mut out = Vec::new();
        h.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().next().unwrap(), "coupling\\noise_corr,0.5,0.9");
        assert_eq!(text.lines().nth(1).unwrap(), "0.2,2,");
    }

    #[test]
    fn heatmap_without_rows_is_empty_result() {
        let t = ResultTable::from_rows(vec![row(1.0, "m", 0.1, 0.5)]);
        assert!(matches!(
            t.heatmap("missing", &[], "coupling", "noise_corr"),
            Err(SweepError::EmptyResult(_))
        ));
    }

    #[test]
    fn csv_quotes_fields_and_blanks_nan() {
        let t = ResultTable::from_rows(vec![
            ResultRow::new(f64::NAN, "a,b").with_column("x", Cell::Int(2)),
            ResultRow::new(1.5, "c"),
        ]);
        let mut out = Vec::new();
        t.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["value,measure,x", ",\"a,b\",2", "1.5,c,"]);
    }

    #[test]
    fn parse_literal_prefers_int_then_float() {
        assert_eq!(Cell::parse_literal("3"), Cell::Int(3));
        assert_eq!(Cell::parse_literal("0.25"), Cell::Float(0.25));
        assert_eq!(Cell::parse_literal("mmi"), Cell::Text("mmi".to_string()));
    }
}
