use std::collections::HashSet;
use std::sync::OnceLock;

use framegen_catalog::{compare_versions, Catalog, CatalogTool};
use framegen_types::{classify_section_size, Tool, THREE_FRAMESET_TOOL};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ResolveError;

/// A tool as the user declared it: display name plus a free-form firmware string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEntry {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "VERSION", default)]
    pub version: String,
    #[serde(rename = "LONG", default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
}

impl ToolEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            long_name: None,
        }
    }
}

fn mwd_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)v\s*(\d+)(?:\.(\d+))?").expect("MWD version pattern"))
}

fn lwd_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"v(\d+\.\d+)").expect("LWD version pattern"))
}

/// MWD firmware strings carry the major version only: `"v16.0"` → `"160"`.
pub fn parse_mwd_version(raw: &str) -> Option<String> {
    mwd_pattern()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|major| format!("{}0", major.as_str()))
}

/// LWD firmware strings keep `major.minor` verbatim: `"v7.1"` → `"7.1"`.
pub fn parse_lwd_version(raw: &str) -> Option<String> {
    lwd_pattern()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn entry_version(name: &str, entries: &[ToolEntry], parse: fn(&str) -> Option<String>) -> Option<String> {
    entries
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| parse(&e.version))
}

/// Parsed MWD version of the first entry named `name`, if the tool was declared at all.
pub fn mwd_version(entries: &[ToolEntry], name: &str) -> Option<String> {
    entry_version(name, entries, parse_mwd_version)
}

/// Parsed LWD version of the first entry named `name`.
pub fn lwd_version(entries: &[ToolEntry], name: &str) -> Option<String> {
    entry_version(name, entries, parse_lwd_version)
}

/// Spacing/block values requested for one DDR recording slot, straight from the request.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RequestedDdrSlot {
    pub spacing: Option<f64>,
    pub block: Option<i64>,
}

/// Maps declared tools onto catalog tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToolResolver;

impl ToolResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves declared tools in input order. Later entries repeating a display name are
    /// ignored; names the catalog does not know are dropped.
    pub fn resolve(
        &self,
        catalog: &dyn Catalog,
        entries: &[ToolEntry],
        section_size: f64,
    ) -> Result<Vec<Tool>, ResolveError> {
        let mut seen = HashSet::new();
        let declared: Vec<&ToolEntry> = entries
            .iter()
            .filter(|e| seen.insert(e.name.as_str()))
            .collect();
        let names: Vec<String> = declared.iter().map(|e| e.name.clone()).collect();
        let rows = catalog.tools_by_display_name(&names)?;

        let mut tools = Vec::with_capacity(declared.len());
        for entry in declared {
            let Some(row) = pick_row(&rows, &entry.name) else {
                warn!(tool = %entry.name, "tool not in catalog, dropped");
                continue;
            };
            let tool = if row.is_mwd {
                let version = match parse_mwd_version(&entry.version) {
                    Some(v) if row.tool_id == THREE_FRAMESET_TOOL && v == "80" => Some("100".to_string()),
                    Some(v) => Some(v),
                    None => catalog.latest_tool_version(&row.tool_id)?,
                };
                into_tool(row, version, None)
            } else {
                let size = classify_section_size(section_size).to_string();
                into_tool(row, parse_lwd_version(&entry.version), Some(size))
            };
            debug!(tool = %tool.tool_id, version = ?tool.version, size = ?tool.size, "tool resolved");
            tools.push(tool);
        }
        Ok(tools)
    }
}

// Several catalog tools can share a display name; the one with the newest firmware wins.
fn pick_row<'a>(rows: &'a [CatalogTool], name: &str) -> Option<&'a CatalogTool> {
    rows.iter()
        .filter(|r| r.display_name == name)
        .max_by(|a, b| match (&a.latest_version, &b.latest_version) {
            (Some(a), Some(b)) => compare_versions(a, b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        })
}

fn into_tool(row: &CatalogTool, version: Option<String>, size: Option<String>) -> Tool {
    Tool {
        tool_id: row.tool_id.clone(),
        display_name: row.display_name.clone(),
        ltb_addr: row.ltb_addr,
        is_mwd: row.is_mwd,
        suffix: row.suffix.clone(),
        version,
        size,
        tr_spacing: None,
        rt_blocksize: None,
    }
}

/// Copies the requested DDR recording layout onto the DDR tools of the assembly.
pub fn apply_ddr_layout(tools: &mut [Tool], slots: &[RequestedDdrSlot; 3]) {
    let ddr1_version = tools
        .iter()
        .find(|t| t.tool_id.contains("DDR1"))
        .and_then(|t| t.version.clone());
    for tool in tools.iter_mut() {
        let slot = if tool.tool_id.contains("DDR1") {
            Some(slots[0])
        } else if tool.tool_id.contains("DDR2") {
            Some(slots[1])
        } else if tool.tool_id.contains("DDR3") {
            Some(slots[2])
        } else {
            None
        };
        match slot {
            Some(slot) => {
                tool.tr_spacing = slot.spacing;
                tool.rt_blocksize = slot.block;
            }
            None if tool.tool_id.contains("DDRT") => tool.version = ddr1_version.clone(),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegen_catalog::InMemoryCatalog;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_tool("IMPTOOL", "IMP", 137, true, "", &["80", "160"])
            .with_tool("DVDXTTOOL", "DVDXT", 138, true, "", &["100"])
            .with_tool("ECOTOOL", "ECO", 40, false, "_v", &["7.1", "8.2"])
            .with_tool("ECOLEGACY", "ECO", 41, false, "_v", &["6.0"])
            .with_tool("MP3TOOL", "MP3", 60, false, "_mp", &["8.5"])
            .with_tool("DDR1TOOL", "DDR1", 90, false, "_r1", &["2.0"])
            .with_tool("DDRTTOOL", "DDRT", 93, false, "", &["1.0"])
    }

    #[test]
    fn mwd_versions_keep_major_only() {
        assert_eq!(parse_mwd_version("v16.0").as_deref(), Some("160"));
        assert_eq!(parse_mwd_version("V 16").as_deref(), Some("160"));
        assert_eq!(parse_mwd_version("IMP v8.2 build 4").as_deref(), Some("80"));
        assert_eq!(parse_mwd_version("latest"), None);
    }

    #[test]
    fn lwd_versions_keep_major_minor() {
        assert_eq!(parse_lwd_version("v7.1").as_deref(), Some("7.1"));
        assert_eq!(parse_lwd_version("fw v10.12a").as_deref(), Some("10.12"));
        assert_eq!(parse_lwd_version("v7"), None);
        assert_eq!(parse_lwd_version("V7.1"), None);
    }

    #[test]
    fn entry_lookup_returns_none_for_undeclared_tool() {
        let entries = [ToolEntry::new("ECO", "v7.1")];
        assert_eq!(lwd_version(&entries, "ECO").as_deref(), Some("7.1"));
        assert_eq!(lwd_version(&entries, "ARC6"), None);
        assert_eq!(mwd_version(&entries, "IMP"), None);
    }

    #[test]
    fn resolves_in_input_order_and_drops_unknown_names() {
        let entries = [
            ToolEntry::new("ECO", "v7.1"),
            ToolEntry::new("GHOST", "v1.0"),
            ToolEntry::new("IMP", "v16.0"),
            ToolEntry::new("ECO", "v8.2"),
        ];
        let tools = ToolResolver::new().resolve(&catalog(), &entries, 8.5).unwrap();
        let ids: Vec<&str> = tools.iter().map(|t| t.tool_id.as_str()).collect();
        assert_eq!(ids, vec!["ECOTOOL", "IMPTOOL"]);
        assert_eq!(tools[0].version.as_deref(), Some("7.1"));
        assert_eq!(tools[0].size.as_deref(), Some("6.75"));
        assert_eq!(tools[1].version.as_deref(), Some("160"));
        assert_eq!(tools[1].size, None);
    }

    #[test]
    fn mwd_without_parsable_version_takes_catalog_latest() {
        let entries = [ToolEntry::new("IMP", "unknown")];
        let tools = ToolResolver::new().resolve(&catalog(), &entries, 12.25).unwrap();
        assert_eq!(tools[0].version.as_deref(), Some("160"));
    }

    #[test]
    fn three_frameset_tool_maps_eighty_to_hundred() {
        let entries = [ToolEntry::new("DVDXT", "v8.1")];
        let tools = ToolResolver::new().resolve(&catalog(), &entries, 12.25).unwrap();
        assert_eq!(tools[0].version.as_deref(), Some("100"));
    }

    #[test]
    fn lwd_without_version_still_gets_size() {
        let entries = [ToolEntry::new("MP3", "")];
        let tools = ToolResolver::new().resolve(&catalog(), &entries, 17.5).unwrap();
        assert_eq!(tools[0].version, None);
        assert_eq!(tools[0].size.as_deref(), Some("9.0"));
    }

    #[test]
    fn ddr_layout_copies_slots_and_version() {
        let entries = [ToolEntry::new("DDRT", ""), ToolEntry::new("DDR1", "v2.0")];
        let mut tools = ToolResolver::new().resolve(&catalog(), &entries, 8.5).unwrap();
        let slots = [
            RequestedDdrSlot {
                spacing: Some(150.0),
                block: Some(4),
            },
            RequestedDdrSlot::default(),
            RequestedDdrSlot::default(),
        ];
        apply_ddr_layout(&mut tools, &slots);
        let ddr1 = tools.iter().find(|t| t.tool_id == "DDR1TOOL").unwrap();
        assert_eq!(ddr1.tr_spacing, Some(150.0));
        assert_eq!(ddr1.rt_blocksize, Some(4));
        let ddrt = tools.iter().find(|t| t.tool_id == "DDRTTOOL").unwrap();
        assert_eq!(ddrt.version.as_deref(), Some("2.0"));
    }
}
