//! Parameter manifests, single-combination assignments and the Cartesian
//! enumeration that drives every sweep.
//!
//! A [`ParameterManifest`] maps a parameter name to an ordered list of
//! candidate values. [`ParameterManifest::combinations`] walks the Cartesian
//! product of those lists in manifest key order: the first key varies slowest,
//! the last key fastest. Each point of the product is an [`Assignment`]
//! (name → one value), which is what models and measures receive.
//!
//! Parameter values are a tagged variant: plain scalars and labels, or a named
//! [`Generator`] that derives a micro/macro series from raw simulated data.
//! Generators are rendered by name wherever a value must become a table cell.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::SweepError;
use crate::table::Cell;

/// Series transform carried by a [`Generator`].
pub type Transform = dyn Fn(&DMatrix<f64>) -> DMatrix<f64> + Send + Sync;

/// A named series transform used as a parameter value (e.g. "sum the micro
/// variables into one macro variable").
#[derive(Clone)]
pub struct Generator {
    name: String,
    transform: Arc<Transform>,
}

impl Generator {
    pub fn new(
        name: impl Into<String>,
        transform: impl Fn(&DMatrix<f64>) -> DMatrix<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            transform: Arc::new(transform),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, series: &DMatrix<f64>) -> DMatrix<f64> {
        (self.transform)(series)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generator({})", self.name)
    }
}

impl PartialEq for Generator {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// One candidate value in a manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
    Generator(Generator),
}

impl ParamValue {
    /// Render as a table cell. Generators become their name.
    pub fn to_cell(&self) -> Cell {
        match self {
            Self::Int(v) => Cell::Int(*v),
            Self::Float(v) => Cell::Float(*v),
            Self::Text(v) => Cell::Text(v.clone()),
            Self::Generator(g) => Cell::Text(g.name().to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_generator(&self) -> Option<&Generator> {
        match self {
            Self::Generator(g) => Some(g),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "str",
            Self::Generator(_) => "generator",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Generator(g) => write!(f, "{}", g.name()),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Generator> for ParamValue {
    fn from(g: Generator) -> Self {
        Self::Generator(g)
    }
}

// ---------------------------------------------------------------------
//  Assignment
// ---------------------------------------------------------------------

/// One concrete point of a manifest's Cartesian product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    values: IndexMap<String, ParamValue>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Entries of `self` followed by entries of `other` not already present.
    pub fn merged(&self, other: &Assignment) -> Assignment {
        let mut out = self.clone();
        for (name, value) in other.iter() {
            if !out.contains(name) {
                out.insert(name, value.clone());
            }
        }
        out
    }

    /// Values rendered as table cells, in assignment order.
    pub fn cells(&self) -> Vec<(String, Cell)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_cell()))
            .collect()
    }

    /// Stable textual key, e.g. `coupling=0.1,npoints=500`.
    pub fn key(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// First generator-valued entry whose name contains `tag`.
    pub fn generator_containing(&self, tag: &str) -> Option<&Generator> {
        self.values
            .iter()
            .filter(|(k, _)| k.contains(tag))
            .find_map(|(_, v)| v.as_generator())
    }

    /// First entry name containing `tag`.
    pub fn name_containing(&self, tag: &str) -> Option<&str> {
        self.values
            .keys()
            .find(|k| k.contains(tag))
            .map(String::as_str)
    }

    /// Integer parameter that must be >= 1; `default` when absent.
    pub fn positive_int_or(&self, name: &str, default: usize) -> Result<usize, SweepError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => positive_int(name, value),
        }
    }

    /// Integer parameter that must be present and >= 1.
    pub fn positive_int(&self, name: &str) -> Result<usize, SweepError> {
        let value = self
            .get(name)
            .ok_or_else(|| SweepError::invalid(name, "parameter is required"))?;
        positive_int(name, value)
    }

    /// Numeric parameter that must be present.
    pub fn number(&self, name: &str) -> Result<f64, SweepError> {
        let value = self
            .get(name)
            .ok_or_else(|| SweepError::invalid(name, "parameter is required"))?;
        value.as_f64().ok_or_else(|| {
            SweepError::invalid(name, format!("expected a number, got {}", value.kind()))
        })
    }

    /// Numeric parameter; `default` when absent.
    pub fn number_or(&self, name: &str, default: f64) -> Result<f64, SweepError> {
        if self.contains(name) {
            self.number(name)
        } else {
            Ok(default)
        }
    }

    /// Label parameter; `default` when absent.
    pub fn text_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str, SweepError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.as_text().ok_or_else(|| {
                SweepError::invalid(name, format!("expected a str, got {}", value.kind()))
            }),
        }
    }
}

fn positive_int(name: &str, value: &ParamValue) -> Result<usize, SweepError> {
    match value {
        ParamValue::Int(v) if *v >= 1 => Ok(*v as usize),
        ParamValue::Int(v) => Err(SweepError::invalid(name, format!("must be >= 1, got {v}"))),
        other => Err(SweepError::invalid(
            name,
            format!("expected an int, got {}", other.kind()),
        )),
    }
}

// ---------------------------------------------------------------------
//  Manifest
// ---------------------------------------------------------------------

/// Parameter name → ordered candidate values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterManifest {
    entries: IndexMap<String, Vec<ParamValue>>,
}

impl ParameterManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<ParamValue>) {
        self.entries.insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<&[ParamValue]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ParamValue])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sub-manifest holding `names` in the given order. Every name must
    /// resolve; `owner` identifies the declaration in the error.
    pub fn restrict(&self, names: &[String], owner: &str) -> Result<ParameterManifest, SweepError> {
        let mut out = ParameterManifest::new();
        for name in names {
            let values = self.entries.get(name).ok_or_else(|| {
                SweepError::invalid(
                    owner,
                    format!("parameter '{name}' has no entry in the parameter manifest"),
                )
            })?;
            out.insert(name.clone(), values.clone());
        }
        Ok(out)
    }

    /// Number of points in the Cartesian product.
    pub fn combination_count(&self) -> usize {
        self.entries.values().map(Vec::len).product()
    }

    /// Cartesian product in manifest key order (first key varies slowest).
    /// An empty manifest yields a single empty assignment.
    pub fn combinations(&self) -> Combinations<'_> {
        Combinations {
            manifest: self,
            indices: vec![0; self.entries.len()],
            done: self.entries.values().any(Vec::is_empty),
        }
    }
}

/// Iterator over a manifest's Cartesian product.
pub struct Combinations<'a> {
    manifest: &'a ParameterManifest,
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for Combinations<'_> {
    type Item = Assignment;

    fn next(&mut self) -> Option<Assignment> {
        if self.done {
            return None;
        }

        let mut assignment = Assignment::new();
        for ((name, values), &idx) in self.manifest.entries.iter().zip(&self.indices) {
            assignment.insert(name.clone(), values[idx].clone());
        }

        // Odometer step: the last position turns over fastest.
        self.done = true;
        for (pos, values) in self.manifest.entries.values().enumerate().rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < values.len() {
                self.done = false;
                break;
            }
            self.indices[pos] = 0;
        }

        Some(assignment)
    }
}

/// `num` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

// ---------------------------------------------------------------------
//  Variable lists
// ---------------------------------------------------------------------

/// Declaration name → ordered parameter names it consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableLists {
    lists: IndexMap<String, Vec<String>>,
}

impl VariableLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        variables: impl IntoIterator<Item = S>,
    ) -> Self {
        self.insert(name, variables.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, variables: Vec<String>) {
        self.lists.insert(name.into(), variables);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.lists.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.lists.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Every parameter name must be non-empty and listed at most once per
    /// declaration.
    pub fn validate(&self, argument: &str) -> Result<(), SweepError> {
        for (owner, vars) in &self.lists {
            for (idx, var) in vars.iter().enumerate() {
                if var.trim().is_empty() {
                    return Err(SweepError::invalid(
                        argument,
                        format!("'{owner}' lists an empty parameter name"),
                    ));
                }
                if vars[..idx].contains(var) {
                    return Err(SweepError::invalid(
                        argument,
                        format!("'{owner}' lists parameter '{var}' more than once"),
                    ));
                }
            }
        }
        Ok(())
    }
}
