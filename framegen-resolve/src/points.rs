use std::collections::HashMap;

use framegen_catalog::Catalog;
use framegen_rules::RuleEngine;
use framegen_types::{DataPoint, Tool};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ResolveError;

/// Override value as it arrives on the wire; requests mix numbers and numeric strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverrideValue {
    Number(f64),
    Text(String),
    Null,
}

impl OverrideValue {
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            OverrideValue::Number(n) => Some(*n),
            OverrideValue::Text(s) => s.trim().parse().ok(),
            OverrideValue::Null => None,
        }
    }

    fn is_set(&self) -> bool {
        match self {
            OverrideValue::Number(n) => *n != 0.0,
            OverrideValue::Text(s) => !s.is_empty(),
            OverrideValue::Null => false,
        }
    }
}

impl From<f64> for OverrideValue {
    fn from(value: f64) -> Self {
        OverrideValue::Number(value)
    }
}

/// Per-point time and depth update overrides keyed by data-point name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOverrides {
    pub time: HashMap<String, OverrideValue>,
    pub depth: HashMap<String, OverrideValue>,
}

impl UpdateOverrides {
    pub fn is_empty(&self) -> bool {
        self.time.is_empty() && self.depth.is_empty()
    }

    fn apply(&self, point: &mut DataPoint) {
        if let Some(value) = self.time.get(&point.name) {
            match value.to_f64() {
                Some(v) => point.time = Some(v),
                None => info!(point = %point.name, ?value, "time update override is not numeric, skipped"),
            }
        }
        // Depth overrides of zero or blank mean "not requested".
        if let Some(value) = self.depth.get(&point.name).filter(|v| v.is_set()) {
            match value.to_f64() {
                Some(v) => point.depth = Some(v),
                None => info!(point = %point.name, ?value, "depth update override is not numeric, skipped"),
            }
        }
    }
}

/// Resolves token lists to catalog data points for one tool assembly.
pub struct DataPointResolver<'a> {
    catalog: &'a dyn Catalog,
    rules: &'a RuleEngine,
    tools: &'a [Tool],
    ltb_addrs: Vec<i64>,
}

impl<'a> DataPointResolver<'a> {
    pub fn new(catalog: &'a dyn Catalog, rules: &'a RuleEngine, tools: &'a [Tool]) -> Self {
        Self {
            catalog,
            rules,
            tools,
            ltb_addrs: tools.iter().map(|t| t.ltb_addr).collect(),
        }
    }

    /// Rule-corrected lookup. The result follows catalog order and silently omits tokens the
    /// catalog does not carry for these tools.
    pub fn resolve_set(&self, tokens: &[String], overrides: &UpdateOverrides) -> Result<Vec<DataPoint>, ResolveError> {
        let corrected = self.rules.apply(tokens, self.tools);
        let mut points = self.catalog.data_points(&corrected, &self.ltb_addrs)?;
        if points.is_empty() && !corrected.is_empty() {
            debug!(requested = corrected.len(), "no catalog data points matched");
        }
        if !overrides.is_empty() {
            for point in points.iter_mut() {
                overrides.apply(point);
            }
        }
        Ok(points)
    }

    /// Exact lookup in caller order, without rule corrections. Every token must resolve.
    pub fn resolve_ordered(&self, tokens: &[String]) -> Result<Vec<DataPoint>, ResolveError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.catalog.data_points(tokens, &self.ltb_addrs)?;
        tokens
            .iter()
            .map(|token| {
                found
                    .iter()
                    .find(|p| &p.name == token)
                    .cloned()
                    .ok_or_else(|| ResolveError::UnknownDataPoint(token.clone()))
            })
            .collect()
    }
}
