//! Catalog resolution of user-declared tools and data-point tokens.

use framegen_catalog::CatalogError;
use thiserror::Error;

pub mod points;
pub use points::{DataPointResolver, OverrideValue, UpdateOverrides};

pub mod tools;
pub use tools::{
    apply_ddr_layout, lwd_version, mwd_version, parse_lwd_version, parse_mwd_version, RequestedDdrSlot, ToolEntry,
    ToolResolver,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("data point {0} is not in the catalog for the selected tools")]
    UnknownDataPoint(String),
}
