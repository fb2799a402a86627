use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::CatalogError;

/// Static per-(tool id, version) frame tables.
pub trait FrameLibrary: Send + Sync {
    /// Extended (DDS) frame tokens for a primary tool.
    fn extended(&self, tool_id: &str, version: &str) -> Option<&[String]>;

    /// On-demand frame tokens contributed by a tool.
    fn on_demand(&self, tool_id: &str, version: &str) -> Option<&[String]>;

    /// Multi-on-demand frames: one token sequence per frame.
    fn multi_on_demand(&self, tool_id: &str, version: &str) -> Option<&[Vec<String>]>;
}

type Table<T> = HashMap<String, HashMap<String, T>>;

/// Frame tables loaded from YAML. Version keys must be quoted strings.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StaticFrameLibrary {
    #[serde(default)]
    extended: Table<Vec<String>>,
    #[serde(default)]
    on_demand: Table<Vec<String>>,
    #[serde(default)]
    multi_on_demand: Table<Vec<Vec<String>>>,
}

fn lookup<'a, T>(table: &'a Table<T>, tool_id: &str, version: &str) -> Option<&'a T> {
    table.get(tool_id).and_then(|versions| versions.get(version))
}

impl StaticFrameLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        serde_yaml::from_str(yaml).map_err(|e| CatalogError::Config(format!("frame library: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| CatalogError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn with_extended(mut self, tool_id: &str, version: &str, tokens: &[&str]) -> Self {
        self.extended
            .entry(tool_id.into())
            .or_default()
            .insert(version.into(), tokens.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_on_demand(mut self, tool_id: &str, version: &str, tokens: &[&str]) -> Self {
        self.on_demand
            .entry(tool_id.into())
            .or_default()
            .insert(version.into(), tokens.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_multi_on_demand(mut self, tool_id: &str, version: &str, frames: &[&[&str]]) -> Self {
        self.multi_on_demand.entry(tool_id.into()).or_default().insert(
            version.into(),
            frames
                .iter()
                .map(|frame| frame.iter().map(|t| t.to_string()).collect())
                .collect(),
        );
        self
    }
}

impl FrameLibrary for StaticFrameLibrary {
    fn extended(&self, tool_id: &str, version: &str) -> Option<&[String]> {
        lookup(&self.extended, tool_id, version).map(Vec::as_slice)
    }

    fn on_demand(&self, tool_id: &str, version: &str) -> Option<&[String]> {
        lookup(&self.on_demand, tool_id, version).map(Vec::as_slice)
    }

    fn multi_on_demand(&self, tool_id: &str, version: &str) -> Option<&[Vec<String>]> {
        lookup(&self.multi_on_demand, tool_id, version).map(Vec::as_slice)
    }
}
