use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Number of frameset slots every request carries.
pub const FRAMESET_COUNT: usize = 6;

/// Primary tool that only transmits three framesets.
pub const THREE_FRAMESET_TOOL: &str = "DVDXTTOOL";

/// Primary tool that only transmits one frameset and has no on-demand frame.
pub const SINGLE_FRAMESET_TOOL: &str = "SPTOOL";

/// Frameset data-point bound once an extended frame is active.
pub const EXTENDED_MAX_DATA_POINTS: u32 = 333;

/// Identity projection of a [`DataPoint`]: (name, catalog id, LTB address, MWD flag, bit length).
pub type DataPointKey<'a> = (&'a str, i64, i64, bool, i64);

/// Identity projection of a [`Tool`]: (tool id, display name, LTB address, MWD flag, suffix).
pub type ToolKey<'a> = (&'a str, &'a str, i64, bool, &'a str);

/// Catalog-backed measurement point.
///
/// Equality and hashing go through [`DataPoint::identity`]; the description and the
/// per-request overrides never take part.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataPoint {
    pub name: String,
    #[serde(rename = "datpid")]
    pub catalog_id: i64,
    #[serde(rename = "length")]
    pub bit_length: i64,
    pub is_mwd: bool,
    pub ltb_addr: i64,
    pub description: String,
    /// Requested time update override.
    #[serde(default)]
    pub time: Option<f64>,
    /// Requested depth update override.
    #[serde(default)]
    pub depth: Option<f64>,
}

impl DataPoint {
    pub fn identity(&self) -> DataPointKey<'_> {
        (
            self.name.as_str(),
            self.catalog_id,
            self.ltb_addr,
            self.is_mwd,
            self.bit_length,
        )
    }
}

impl PartialEq for DataPoint {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for DataPoint {}

impl Hash for DataPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Tool on the bottom hole assembly, resolved against the catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tool {
    pub tool_id: String,
    pub display_name: String,
    pub ltb_addr: i64,
    pub is_mwd: bool,
    #[serde(rename = "dpoint_suffix")]
    pub suffix: String,
    pub version: Option<String>,
    /// Collar size bucket, only set for LWD tools.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub tr_spacing: Option<f64>,
    #[serde(default)]
    pub rt_blocksize: Option<i64>,
}

impl Tool {
    pub fn identity(&self) -> ToolKey<'_> {
        (
            self.tool_id.as_str(),
            self.display_name.as_str(),
            self.ltb_addr,
            self.is_mwd,
            self.suffix.as_str(),
        )
    }
}

impl PartialEq for Tool {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Tool {}

impl Hash for Tool {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Spacing/block pair for one DDR recording slot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DdrSlot {
    pub spacing: f64,
    pub block: i64,
}

impl DdrSlot {
    /// Fallback used when a request leaves slot `index` (0-based) unset.
    pub fn fallback(index: usize) -> Self {
        Self {
            spacing: 100.0 * (index as f64 + 1.0),
            block: 2,
        }
    }
}

/// One of the six transmission framesets (FSL).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameSet {
    pub description: String,
    pub bitrate: f64,
    pub rop: f64,
    /// Update interval for non-primary (LWD) points.
    pub nonprimary_update: f64,
    /// Update interval for primary (MWD) points.
    pub primary_update: f64,
    pub ddr: [DdrSlot; 3],
    pub min_bounds_pct: u32,
    pub max_bounds_pct: u32,
    pub max_data_points: u32,
    pub mtf: Vec<DataPoint>,
    pub gtf: Vec<DataPoint>,
    pub rotary: Vec<DataPoint>,
}

impl Default for FrameSet {
    fn default() -> Self {
        Self {
            description: String::new(),
            bitrate: 6.0,
            rop: 100.0,
            nonprimary_update: 1.0,
            primary_update: 6.0,
            ddr: [DdrSlot::fallback(0), DdrSlot::fallback(1), DdrSlot::fallback(2)],
            min_bounds_pct: 10,
            max_bounds_pct: 50,
            max_data_points: 165,
            mtf: Vec::new(),
            gtf: Vec::new(),
            rotary: Vec::new(),
        }
    }
}

impl FrameSet {
    /// A frameset counts as populated only when all three groupings carry points.
    pub fn is_populated(&self) -> bool {
        !self.mtf.is_empty() && !self.gtf.is_empty() && !self.rotary.is_empty()
    }
}

/// Utility frame shared by every frameset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UtilityFrame {
    pub description: String,
    pub bitrate: f64,
    pub rop: f64,
    pub points: Vec<DataPoint>,
}

impl Default for UtilityFrame {
    fn default() -> Self {
        Self {
            description: String::new(),
            bitrate: 6.0,
            rop: 100.0,
            points: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub on_demand_required: bool,
    pub multi_frame_required: bool,
    pub provision_bha: bool,
    pub ddr_bha: bool,
}

/// Fully assembled request, ready for packing and serialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameRequest {
    pub uid: String,
    pub job_number: String,
    pub well_name: String,
    pub section_size: String,
    /// Catalog file the request was resolved against.
    pub catalog: String,
    /// QC reference code of that catalog, when known.
    pub catalog_qc_code: Option<String>,
    pub num_of_fsl: u32,
    pub flags: FeatureFlags,
    pub framesets: [FrameSet; FRAMESET_COUNT],
    pub utility: UtilityFrame,
    pub tools: Vec<Tool>,
    pub extended_frame: Vec<DataPoint>,
    pub on_demand_frame: Vec<DataPoint>,
    pub multi_on_demand_frame: Vec<Vec<DataPoint>>,
}

impl FrameRequest {
    pub fn new(uid: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            job_number: String::new(),
            well_name: String::new(),
            section_size: String::new(),
            catalog: catalog.into(),
            catalog_qc_code: None,
            num_of_fsl: 1,
            flags: FeatureFlags::default(),
            framesets: std::array::from_fn(|_| FrameSet::default()),
            utility: UtilityFrame::default(),
            tools: Vec::new(),
            extended_frame: Vec::new(),
            on_demand_frame: Vec::new(),
            multi_on_demand_frame: Vec::new(),
        }
    }

    /// First MWD tool in resolution order.
    pub fn primary_tool(&self) -> Option<&Tool> {
        self.tools.iter().find(|t| t.is_mwd)
    }

    /// Adds a tool unless one with the same identity is already present.
    pub fn insert_tool(&mut self, tool: Tool) -> bool {
        if self.tools.contains(&tool) {
            return false;
        }
        self.tools.push(tool);
        true
    }

    /// Framesets the primary tool is able to transmit.
    pub fn active_frameset_count(&self) -> usize {
        match self.primary_tool().map(|t| t.tool_id.as_str()) {
            Some(SINGLE_FRAMESET_TOOL) => 1,
            Some(THREE_FRAMESET_TOOL) => 3,
            _ => FRAMESET_COUNT,
        }
    }
}

/// Parses a section size such as `"12.25in"` or `"8.5"` into inches.
pub fn parse_section_size(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let numeric = trimmed.strip_suffix("in").unwrap_or(trimmed).trim();
    numeric.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Maps a hole section size (inches) to the LWD collar size bucket.
pub fn classify_section_size(section_size: f64) -> &'static str {
    if section_size <= 7.5 {
        "4.75"
    } else if section_size <= 10.0 {
        "6.75"
    } else if section_size <= 15.0 {
        "8.25"
    } else {
        "9.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn point(name: &str, id: i64) -> DataPoint {
        DataPoint {
            name: name.into(),
            catalog_id: id,
            bit_length: 8,
            is_mwd: true,
            ltb_addr: 10,
            description: "Gamma ray".into(),
            time: None,
            depth: None,
        }
    }

    fn tool(id: &str) -> Tool {
        Tool {
            tool_id: id.into(),
            display_name: "IMP".into(),
            ltb_addr: 137,
            is_mwd: true,
            suffix: String::new(),
            version: Some("160".into()),
            size: None,
            tr_spacing: None,
            rt_blocksize: None,
        }
    }

    #[test]
    fn section_size_buckets_match_boundaries() {
        assert_eq!(classify_section_size(7.0), "4.75");
        assert_eq!(classify_section_size(7.5), "4.75");
        assert_eq!(classify_section_size(7.50001), "6.75");
        assert_eq!(classify_section_size(10.0), "6.75");
        assert_eq!(classify_section_size(10.00001), "8.25");
        assert_eq!(classify_section_size(15.0), "8.25");
        assert_eq!(classify_section_size(15.00001), "9.0");
        assert_eq!(classify_section_size(26.0), "9.0");
    }

    #[test]
    fn section_size_classification_is_monotonic() {
        let order = ["4.75", "6.75", "8.25", "9.0"];
        let mut last = 0;
        for step in 0..400 {
            let size = step as f64 * 0.05;
            let rank = order
                .iter()
                .position(|b| *b == classify_section_size(size))
                .unwrap();
            assert!(rank >= last, "bucket went backwards at {size}");
            last = rank;
        }
    }

    #[test]
    fn section_size_parses_inch_suffix() {
        assert_eq!(parse_section_size("12.25in"), Some(12.25));
        assert_eq!(parse_section_size(" 8.5 "), Some(8.5));
        assert_eq!(parse_section_size("big"), None);
    }

    #[test]
    fn data_point_identity_ignores_overrides() {
        let a = point("GR", 101);
        let mut b = point("GR", 101);
        b.description = "other".into();
        b.time = Some(12.0);
        b.depth = Some(0.5);
        assert_eq!(a, b);

        let set: HashSet<DataPoint> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);

        let c = point("GR", 102);
        assert_ne!(a, c);
        let mut d = point("GR", 101);
        d.bit_length = 12;
        assert_ne!(a, d);
    }

    #[test]
    fn tool_identity_ignores_version_and_size() {
        let a = tool("IMPTOOL");
        let mut b = tool("IMPTOOL");
        b.version = Some("170".into());
        b.size = Some("6.75".into());
        b.tr_spacing = Some(31.0);
        assert_eq!(a, b);

        let set: HashSet<Tool> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_ne!(a, tool("OTHERTOOL"));
    }

    #[test]
    fn insert_tool_deduplicates_by_identity() {
        let mut req = FrameRequest::new("uid", "catalog.db");
        assert!(req.insert_tool(tool("IMPTOOL")));
        let mut again = tool("IMPTOOL");
        again.version = Some("999".into());
        assert!(!req.insert_tool(again));
        assert_eq!(req.tools.len(), 1);
    }

    #[test]
    fn active_frameset_count_follows_primary_tool() {
        let mut req = FrameRequest::new("uid", "catalog.db");
        assert_eq!(req.active_frameset_count(), 6);
        req.insert_tool(tool(THREE_FRAMESET_TOOL));
        assert_eq!(req.active_frameset_count(), 3);
        req.tools = vec![tool(SINGLE_FRAMESET_TOOL)];
        assert_eq!(req.active_frameset_count(), 1);
    }

    #[test]
    fn frameset_defaults_carry_ddr_fallbacks() {
        let fsl = FrameSet::default();
        assert_eq!(fsl.ddr[0], DdrSlot { spacing: 100.0, block: 2 });
        assert_eq!(fsl.ddr[2], DdrSlot { spacing: 300.0, block: 2 });
        assert!(!fsl.is_populated());
    }

    #[test]
    fn data_point_uses_catalog_field_names_on_the_wire() {
        let json = serde_json::to_value(point("GR", 7)).unwrap();
        assert_eq!(json["datpid"], 7);
        assert_eq!(json["length"], 8);
    }
}
