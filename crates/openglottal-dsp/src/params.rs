//! Named parameter map for checkpointing and inspection.
//!
//! Serializes as a flat JSON object, e.g.
//! `{"f0": 130.0, "log_area_ratios": [0.8, -0.5], "log_gain": -0.69, ...}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const F0: &str = "f0";
pub const OFFSET: &str = "offset";
pub const RD_INDEX: &str = "rd_index";
pub const LOG_GAIN: &str = "log_gain";
pub const LOG_AREA_RATIOS: &str = "log_area_ratios";

/// Every name a `SourceFilterModel` reads or writes.
pub const MODEL_PARAMETERS: [&str; 5] = [F0, OFFSET, RD_INDEX, LOG_GAIN, LOG_AREA_RATIOS];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) -> Option<ParamValue> {
        self.values.insert(name.into(), value)
    }

    pub fn insert_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), ParamValue::Scalar(value));
    }

    pub fn insert_vector(&mut self, name: impl Into<String>, value: Vec<f64>) {
        self.values.insert(name.into(), ParamValue::Vector(value));
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

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Required finite scalar.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        match self.values.get(name) {
            Some(ParamValue::Scalar(v)) if v.is_finite() => Ok(*v),
            Some(ParamValue::Scalar(v)) => Err(Error::invalid_parameter(name, format!("{v} is not finite"))),
            Some(ParamValue::Vector(_)) => Err(Error::invalid_parameter(name, "expected a scalar, found a vector")),
            None => Err(Error::invalid_parameter(name, "missing")),
        }
    }

    /// Required vector of finite values. An empty vector is accepted.
    pub fn vector(&self, name: &str) -> Result<&[f64]> {
        match self.values.get(name) {
            Some(ParamValue::Vector(v)) => {
                if let Some(i) = v.iter().position(|x| !x.is_finite()) {
                    return Err(Error::invalid_parameter(name, format!("element {i} is not finite")));
                }
                Ok(v)
            }
            Some(ParamValue::Scalar(_)) => Err(Error::invalid_parameter(name, "expected a vector, found a scalar")),
            None => Err(Error::invalid_parameter(name, "missing")),
        }
    }

    /// Fails on the first name not in `allowed`.
    pub fn ensure_only(&self, allowed: &[&str]) -> Result<()> {
        match self.names().find(|n| !allowed.contains(n)) {
            Some(unknown) => Err(Error::invalid_parameter(unknown, "unknown parameter name")),
            None => Ok(()),
        }
    }
}
