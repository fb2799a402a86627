use std::sync::Arc;

use framegen_types::DataPoint;

use crate::{max_version, Catalog, CatalogError, CatalogSource, CatalogTool, SelectedCatalog};

#[derive(Clone, Debug)]
struct ToolRow {
    tool: CatalogTool,
    versions: Vec<String>,
}

#[derive(Clone, Debug)]
struct PointRow {
    name: String,
    catalog_id: i64,
    bit_length: i64,
    ltb_addr: i64,
    description: String,
}

/// In-memory catalog with the same query semantics as the SQLite one.
///
/// Used for fixtures and for embedding small catalogs without a database file.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    tools: Vec<ToolRow>,
    points: Vec<PointRow>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(
        mut self,
        tool_id: &str,
        display_name: &str,
        ltb_addr: i64,
        is_mwd: bool,
        suffix: &str,
        versions: &[&str],
    ) -> Self {
        self.tools.push(ToolRow {
            tool: CatalogTool {
                tool_id: tool_id.into(),
                display_name: display_name.into(),
                ltb_addr,
                is_mwd,
                suffix: suffix.into(),
                latest_version: None,
            },
            versions: versions.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn with_point(mut self, name: &str, catalog_id: i64, bit_length: i64, ltb_addr: i64, description: &str) -> Self {
        self.points.push(PointRow {
            name: name.into(),
            catalog_id,
            bit_length,
            ltb_addr,
            description: description.into(),
        });
        self
    }
}

impl Catalog for InMemoryCatalog {
    fn tools_by_display_name(&self, names: &[String]) -> Result<Vec<CatalogTool>, CatalogError> {
        Ok(self
            .tools
            .iter()
            .filter(|row| names.contains(&row.tool.display_name))
            .map(|row| CatalogTool {
                latest_version: max_version(row.versions.iter().map(String::as_str)).map(str::to_string),
                ..row.tool.clone()
            })
            .collect())
    }

    fn latest_tool_version(&self, tool_id: &str) -> Result<Option<String>, CatalogError> {
        Ok(self
            .tools
            .iter()
            .filter(|row| row.tool.tool_id == tool_id)
            .flat_map(|row| row.versions.iter().map(String::as_str))
            .max_by(|a, b| crate::compare_versions(a, b))
            .map(str::to_string))
    }

    fn data_points(&self, names: &[String], ltb_addrs: &[i64]) -> Result<Vec<DataPoint>, CatalogError> {
        let mut out = Vec::new();
        for point in &self.points {
            if !names.contains(&point.name) || !ltb_addrs.contains(&point.ltb_addr) {
                continue;
            }
            // Inner join on the owning tool, one row per matching tool.
            for row in self.tools.iter().filter(|t| t.tool.ltb_addr == point.ltb_addr) {
                out.push(DataPoint {
                    name: point.name.clone(),
                    catalog_id: point.catalog_id,
                    bit_length: point.bit_length,
                    is_mwd: row.tool.is_mwd,
                    ltb_addr: point.ltb_addr,
                    description: point.description.clone(),
                    time: None,
                    depth: None,
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

/// Hands out the same in-memory catalog regardless of the selected version.
pub struct InMemoryCatalogSource {
    catalog: Arc<InMemoryCatalog>,
}

impl InMemoryCatalogSource {
    pub fn new(catalog: InMemoryCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

impl CatalogSource for InMemoryCatalogSource {
    fn open(&self, _selected: &SelectedCatalog) -> Result<Arc<dyn Catalog>, CatalogError> {
        Ok(Arc::clone(&self.catalog) as Arc<dyn Catalog>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_tool("IMPTOOL", "IMP", 137, true, "", &["80", "160"])
            .with_tool("ECOTOOL", "ECO", 40, false, "_v", &["7.1"])
            .with_point("sticknslip", 4650, 8, 137, "Stick slip")
            .with_point("rgx", 4504, 12, 137, "")
            .with_point("RHOB_v", 900, 12, 40, "Bulk density")
    }

    #[test]
    fn points_are_sorted_by_name_and_joined_to_tools() {
        let points = catalog()
            .data_points(&["sticknslip".into(), "rgx".into(), "RHOB_v".into()], &[137])
            .unwrap();
        let names: Vec<&str> = points.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rgx", "sticknslip"]);
        assert!(points.iter().all(|p| p.is_mwd));
    }

    #[test]
    fn tools_report_latest_version() {
        let tools = catalog().tools_by_display_name(&["IMP".into()]).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].latest_version.as_deref(), Some("160"));
        assert_eq!(catalog().latest_tool_version("ECOTOOL").unwrap().as_deref(), Some("7.1"));
    }
}
