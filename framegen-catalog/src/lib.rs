use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use framegen_types::DataPoint;
use serde::Deserialize;
use thiserror::Error;

pub mod library;
pub use library::{FrameLibrary, StaticFrameLibrary};

pub mod memory;
pub use memory::{InMemoryCatalog, InMemoryCatalogSource};

pub mod sqlite;
pub use sqlite::{SqliteCatalog, SqliteCatalogSource};

/// Catalog file used when a request names no catalog version.
pub const DEFAULT_CATALOG_FILE: &str = "RTDPointCatalog_2025_0.db";

/// QC reference code written when the selected catalog has none.
pub const FALLBACK_QC_CODE: &str = "TnAShared2023_1_001";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("catalog config error: {0}")]
    Config(String),
    #[error("unknown catalog version: {0}")]
    UnknownVersion(String),
    #[error("malformed catalog row: {0}")]
    Malformed(String),
    #[error("catalog connection lock poisoned")]
    Poisoned,
}

/// Tool row as stored in the catalog, before any per-request resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogTool {
    pub tool_id: String,
    pub display_name: String,
    pub ltb_addr: i64,
    pub is_mwd: bool,
    pub suffix: String,
    /// Highest version recorded for the tool, if any.
    pub latest_version: Option<String>,
}

/// Read path into one catalog version.
pub trait Catalog: Send + Sync {
    /// Every tool whose display name is in `names`, one row per tool id.
    fn tools_by_display_name(&self, names: &[String]) -> Result<Vec<CatalogTool>, CatalogError>;

    /// Latest known version of a tool id.
    fn latest_tool_version(&self, tool_id: &str) -> Result<Option<String>, CatalogError>;

    /// Data points named in `names` that live on one of `ltb_addrs`, ordered by name.
    fn data_points(&self, names: &[String], ltb_addrs: &[i64]) -> Result<Vec<DataPoint>, CatalogError>;
}

/// Opens the catalog a request selected. Called once per request.
pub trait CatalogSource: Send + Sync {
    fn open(&self, selected: &SelectedCatalog) -> Result<Arc<dyn Catalog>, CatalogError>;
}

/// Orders catalog version strings, numerically per dot-separated component when possible.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| {
        v.trim()
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
    };
    match (parse(a), parse(b)) {
        (Ok(mut left), Ok(mut right)) => {
            let len = left.len().max(right.len());
            left.resize(len, 0);
            right.resize(len, 0);
            left.cmp(&right)
        }
        _ => a.cmp(b),
    }
}

/// Picks the highest of a set of versions.
pub fn max_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .max_by(|a, b| compare_versions(a, b))
}

/// One selectable catalog version.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CatalogVersion {
    pub label: String,
    pub file: String,
    #[serde(default)]
    pub qc_code: Option<String>,
}

/// The catalog a request resolves against.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedCatalog {
    pub file: String,
    pub qc_code: Option<String>,
}

impl SelectedCatalog {
    pub fn qc_code_or_fallback(&self) -> &str {
        self.qc_code.as_deref().unwrap_or(FALLBACK_QC_CODE)
    }
}

/// Label → catalog file table.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogVersions {
    #[serde(default = "default_catalog_file")]
    pub default_file: String,
    pub versions: Vec<CatalogVersion>,
}

fn default_catalog_file() -> String {
    DEFAULT_CATALOG_FILE.to_string()
}

impl Default for CatalogVersions {
    fn default() -> Self {
        let entry = |label: &str, file: &str, qc: &str| CatalogVersion {
            label: label.into(),
            file: file.into(),
            qc_code: Some(qc.into()),
        };
        Self {
            default_file: default_catalog_file(),
            versions: vec![
                entry("HSPM 2022.1", "RTDPointCatalog_2022_1.db", "TnAShared2022_1_001"),
                entry("HSPM 2023.0", "RTDPointCatalog_2023_0.db", "TnAShared2023_0_001"),
                entry("HSPM 2023.1", "RTDPointCatalog_2023_1.db", "TnAShared2023_1_001"),
                entry("HSPM 2025.0", "RTDPointCatalog_2025_0.db", "TnAShared2025_1_004"),
                entry("HSPM 2026.0", "RTDPointCatalog_2026_0.db", "TnAShared2026_0_010"),
            ],
        }
    }
}

impl CatalogVersions {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| CatalogError::Config(format!("{}: {e}", path.as_ref().display())))?;
        serde_yaml::from_str(&text).map_err(|e| CatalogError::Config(e.to_string()))
    }

    /// Resolves a request's catalog label. A missing or blank label selects the default file.
    pub fn select(&self, label: Option<&str>) -> Result<SelectedCatalog, CatalogError> {
        let file = match label.map(str::trim).filter(|l| !l.is_empty()) {
            None => self.default_file.clone(),
            Some(label) => self
                .versions
                .iter()
                .find(|v| v.label == label)
                .map(|v| v.file.clone())
                .ok_or_else(|| CatalogError::UnknownVersion(label.to_string()))?,
        };
        let qc_code = self
            .versions
            .iter()
            .find(|v| v.file == file)
            .and_then(|v| v.qc_code.clone());
        Ok(SelectedCatalog { file, qc_code })
    }
}
