//! Raw request → [`FrameRequest`].

use std::collections::HashSet;

use framegen_catalog::{Catalog, FrameLibrary, SelectedCatalog};
use framegen_resolve::{apply_ddr_layout, DataPointResolver, OverrideValue, ToolEntry, UpdateOverrides};
use framegen_rules::RuleEngine;
use framegen_types::{
    DataPoint, DdrSlot, FeatureFlags, FrameRequest, FrameSet, Tool, UtilityFrame, EXTENDED_MAX_DATA_POINTS,
    FRAMESET_COUNT, THREE_FRAMESET_TOOL,
};
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::request::{Embedded, RawFrameSet, RawRequest};

/// MTF tokens sampled at the toolface interval.
const MTF_TOOLFACE: [&str; 5] = ["mtf", "mtfs", "ITFS_g", "GTFS_g", "CO_ITF_gdi"];
/// GTF tokens sampled at the toolface interval.
const GTF_TOOLFACE: [&str; 2] = ["gtf", "gtfs"];
/// Raw magnetometer and accelerometer channels; they replace the computed toolface.
const RAW_TOOLFACE: [&str; 8] = ["hz", "hy", "gy", "gz", "rhz", "rhy", "rgy", "rgz"];
const COMPUTED_TOOLFACE: [&str; 2] = ["mtf", "mtfs"];
const RAW_TOOLFACE_FACTOR: f64 = 4.0;
const RAW_TOOLFACE_SMALL_FRAME: usize = 20;
const RAW_TOOLFACE_MAX_BOUNDS_PCT: u32 = 70;

const NMR_CHANNELS: [&str; 7] = ["O_T2MRP_m", "O_T2SV1_m", "O_T2SV2_m", "T2LM2_m", "MRP2C_m", "MRF2C_m", "BFV2C_m"];
const NMR_CHANNEL_FACTOR: f64 = 1.15;
const NMR_PROJECTION: &str = "O_MR_PRJ8_m4";
const NMR_PROJECTION_FACTOR: f64 = 4.0;

/// Rotary points that always keep their catalog update rate.
const ROTARY_FIXED_RATE: [&str; 3] = ["GEN1_p", "GEN13_p", "ANNPRESS_p"];

fn frame_name(index: usize) -> String {
    format!("fsl{}", index + 1)
}

fn required<'r, T>(list: &'r Option<Embedded<T>>, frame: usize, field: &'static str) -> Result<&'r [T], BuildError> {
    let list = list.as_ref().ok_or_else(|| BuildError::MissingInput {
        frame: frame_name(frame),
        field,
    })?;
    list.items().map_err(|reason| BuildError::MalformedInput {
        frame: frame_name(frame),
        field,
        reason: reason.to_string(),
    })
}

/// First-seen union, keeping order.
fn union<'s, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'s [String]>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in lists.into_iter().flatten() {
        if seen.insert(token.as_str()) {
            out.push(token.clone());
        }
    }
    out
}

/// Every declared tool across the request, framesets in order.
pub fn declared_tools(raw: &RawRequest) -> Result<Vec<ToolEntry>, BuildError> {
    let mut entries = Vec::new();
    for (idx, fsl) in raw.framesets().into_iter().enumerate() {
        if let Some(fsl) = fsl {
            entries.extend_from_slice(required(&fsl.tools, idx, "TOOLS")?);
        }
    }
    Ok(entries)
}

/// Builds the typed frame structure for one request.
pub struct FrameSetAssembler<'a> {
    catalog: &'a dyn Catalog,
    library: &'a dyn FrameLibrary,
    rules: &'a RuleEngine,
}

impl<'a> FrameSetAssembler<'a> {
    pub fn new(catalog: &'a dyn Catalog, library: &'a dyn FrameLibrary, rules: &'a RuleEngine) -> Self {
        Self {
            catalog,
            library,
            rules,
        }
    }

    /// `tools` are the resolved tools in declaration order; they must contain an MWD tool for
    /// the extended and frameset-count rules to apply.
    pub fn assemble(
        &self,
        raw: &RawRequest,
        uid: &str,
        selected: &SelectedCatalog,
        mut tools: Vec<Tool>,
    ) -> Result<FrameRequest, BuildError> {
        let mut request = FrameRequest::new(uid, selected.file.clone());
        request.catalog_qc_code = selected.qc_code.clone();
        request.job_number = raw.job_number.clone().unwrap_or_default();
        request.well_name = raw.well_name.clone().unwrap_or_default();
        request.section_size = raw.section_size.clone().unwrap_or_default();
        request.num_of_fsl = raw.num_of_fsl.unwrap_or(1).clamp(1, FRAMESET_COUNT as u32);
        request.flags = FeatureFlags {
            on_demand_required: false,
            multi_frame_required: raw.modf_required,
            provision_bha: raw.provision_bha,
            ddr_bha: raw.ddr_bha,
        };

        if raw.ddr_bha {
            if let Some(fsl1) = raw.fsl1.as_ref() {
                apply_ddr_layout(&mut tools, &fsl1.ddr_slots());
            }
        }
        for tool in tools {
            request.insert_tool(tool);
        }
        let tools = request.tools.clone();
        let resolver = DataPointResolver::new(self.catalog, self.rules, &tools);

        for (idx, fsl) in raw.framesets().into_iter().enumerate() {
            if let Some(fsl) = fsl {
                request.framesets[idx] = self.frameset(&resolver, fsl, idx)?;
            }
        }
        request.utility = self.utility(&resolver, raw)?;

        if let Some(primary) = request.primary_tool().cloned() {
            self.primary_frames(&resolver, &mut request, &primary)?;
        }
        request.on_demand_frame = self.on_demand(&resolver, &tools)?;
        request.flags.on_demand_required = !request.on_demand_frame.is_empty();
        if request.flags.multi_frame_required {
            request.multi_on_demand_frame = self.multi_on_demand(&resolver, &tools)?;
        }
        debug!(
            uid,
            tools = request.tools.len(),
            num_of_fsl = request.num_of_fsl,
            extended = !request.extended_frame.is_empty(),
            on_demand = request.on_demand_frame.len(),
            "request assembled"
        );
        Ok(request)
    }

    fn frameset(&self, resolver: &DataPointResolver<'_>, raw: &RawFrameSet, idx: usize) -> Result<FrameSet, BuildError> {
        let mut mtf = required(&raw.mtf, idx, "MTF")?.to_vec();
        let gtf = required(&raw.gtf, idx, "GTF")?;
        let rotary = required(&raw.rotary, idx, "ROT")?;
        let mut overrides = raw.overrides();

        if let Some(nmr) = raw.nmr.filter(|v| *v != 0.0) {
            let nmr = nmr.trunc();
            for token in rotary {
                if NMR_CHANNELS.contains(&token.as_str()) {
                    set_time(&mut overrides, token, nmr * NMR_CHANNEL_FACTOR);
                } else if token == NMR_PROJECTION {
                    set_time(&mut overrides, token, nmr * NMR_PROJECTION_FACTOR);
                }
            }
        }

        let raw_toolface = mtf.iter().any(|t| RAW_TOOLFACE.contains(&t.as_str()));
        match raw.tf.filter(|v| *v != 0.0).map(f64::trunc) {
            Some(tf) => {
                for token in &mtf {
                    if MTF_TOOLFACE.contains(&token.as_str()) {
                        set_time(&mut overrides, token, tf);
                    } else if RAW_TOOLFACE.contains(&token.as_str()) {
                        set_time(&mut overrides, token, tf * RAW_TOOLFACE_FACTOR);
                    }
                }
                for token in gtf {
                    if GTF_TOOLFACE.contains(&token.as_str()) {
                        set_time(&mut overrides, token, tf);
                    }
                }
            }
            None => {
                let needs_tf = mtf
                    .iter()
                    .chain(gtf)
                    .any(|t| MTF_TOOLFACE.contains(&t.as_str()) || GTF_TOOLFACE.contains(&t.as_str()) || RAW_TOOLFACE.contains(&t.as_str()));
                if needs_tf {
                    warn!(frame = %frame_name(idx), "no toolface interval given, toolface updates left at catalog rate");
                }
            }
        }
        if raw_toolface {
            mtf.retain(|t| !COMPUTED_TOOLFACE.contains(&t.as_str()));
        }

        let mut rotary_overrides = overrides.clone();
        rotary_overrides
            .time
            .retain(|name, _| !ROTARY_FIXED_RATE.contains(&name.as_str()));

        let defaults = FrameSet::default();
        let mut frameset = FrameSet {
            description: raw.description.clone().unwrap_or_default(),
            bitrate: raw.bitrate.unwrap_or(defaults.bitrate),
            rop: raw.rop.unwrap_or(defaults.rop),
            nonprimary_update: raw.nonprimary_update.unwrap_or(defaults.nonprimary_update),
            primary_update: raw.primary_update.unwrap_or(defaults.primary_update),
            ddr: ddr_slots(raw),
            mtf: resolver.resolve_set(&mtf, &overrides)?,
            gtf: resolver.resolve_set(gtf, &overrides)?,
            rotary: resolver.resolve_set(rotary, &rotary_overrides)?,
            ..defaults
        };
        if raw_toolface && frameset.mtf.len() < RAW_TOOLFACE_SMALL_FRAME {
            frameset.max_bounds_pct = RAW_TOOLFACE_MAX_BOUNDS_PCT;
        }
        debug!(
            frame = %frame_name(idx),
            mtf = frameset.mtf.len(),
            gtf = frameset.gtf.len(),
            rotary = frameset.rotary.len(),
            raw_toolface,
            "frameset resolved"
        );
        Ok(frameset)
    }

    fn utility(&self, resolver: &DataPointResolver<'_>, raw: &RawRequest) -> Result<UtilityFrame, BuildError> {
        let mut lists = Vec::new();
        for (idx, fsl) in raw.framesets().into_iter().enumerate() {
            if let Some(fsl) = fsl {
                lists.push(required(&fsl.utility, idx, "UTIL")?);
            }
        }
        let tokens = union(lists);
        let defaults = UtilityFrame::default();
        let fsl1 = raw.fsl1.as_ref();
        Ok(UtilityFrame {
            description: fsl1.and_then(|f| f.description.clone()).unwrap_or_default(),
            bitrate: fsl1.and_then(|f| f.bitrate).unwrap_or(defaults.bitrate),
            rop: fsl1.and_then(|f| f.rop).unwrap_or(defaults.rop),
            points: resolver.resolve_set(&tokens, &UpdateOverrides::default())?,
        })
    }

    /// Extended frame and frameset-count limits that hang off the primary tool.
    fn primary_frames(
        &self,
        resolver: &DataPointResolver<'_>,
        request: &mut FrameRequest,
        primary: &Tool,
    ) -> Result<(), BuildError> {
        if let Some(version) = primary.version.as_deref() {
            if let Some(tokens) = self.library.extended(&primary.tool_id, version) {
                request.extended_frame = resolver.resolve_ordered(tokens)?;
                for frameset in request.framesets.iter_mut() {
                    frameset.max_data_points = EXTENDED_MAX_DATA_POINTS;
                }
                info!(tool = %primary.tool_id, version, points = request.extended_frame.len(), "extended frame active");
            }
        }
        if primary.tool_id == THREE_FRAMESET_TOOL && request.num_of_fsl > 3 {
            debug!(requested = request.num_of_fsl, "frameset count clamped to 3");
            request.num_of_fsl = 3;
        }
        Ok(())
    }

    fn on_demand(&self, resolver: &DataPointResolver<'_>, tools: &[Tool]) -> Result<Vec<DataPoint>, BuildError> {
        let lists = tools.iter().filter_map(|tool| {
            let version = tool.version.as_deref()?;
            self.library.on_demand(&tool.tool_id, version)
        });
        let tokens = union(lists);
        Ok(resolver.resolve_ordered(&tokens)?)
    }

    fn multi_on_demand(&self, resolver: &DataPointResolver<'_>, tools: &[Tool]) -> Result<Vec<Vec<DataPoint>>, BuildError> {
        let table = tools.iter().find_map(|tool| {
            let version = tool.version.as_deref()?;
            self.library.multi_on_demand(&tool.tool_id, version)
        });
        let Some(frames) = table else {
            info!("multi on-demand frames requested but no tool provides them");
            return Ok(Vec::new());
        };
        frames
            .iter()
            .map(|tokens| resolver.resolve_ordered(tokens).map_err(BuildError::from))
            .collect()
    }
}

fn set_time(overrides: &mut UpdateOverrides, token: &str, value: f64) {
    overrides.time.insert(token.to_string(), OverrideValue::from(value));
}

// Zero counts as unset, like a blank form field.
fn ddr_slots(raw: &RawFrameSet) -> [DdrSlot; 3] {
    let requested = raw.ddr_slots();
    std::array::from_fn(|i| {
        let fallback = DdrSlot::fallback(i);
        DdrSlot {
            spacing: requested[i].spacing.filter(|v| *v != 0.0).unwrap_or(fallback.spacing),
            block: requested[i].block.filter(|v| *v != 0).unwrap_or(fallback.block),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegen_catalog::{InMemoryCatalog, StaticFrameLibrary};
    use framegen_resolve::ToolResolver;
    use serde_json::json;

    fn catalog() -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new()
            .with_tool("IMPTOOL", "IMP", 137, true, "", &["160"])
            .with_tool("DVDXTTOOL", "DVDXT", 138, true, "", &["100"])
            .with_tool("ECOTOOL", "ECO", 40, false, "_v", &["7.1"])
            .with_tool("MRTOOL", "MR", 50, false, "_m", &["2.0"])
            .with_point("mtf", 10, 6, 137, "")
            .with_point("gtf", 11, 6, 137, "")
            .with_point("hz", 12, 8, 137, "")
            .with_point("gz", 13, 8, 137, "")
            .with_point("INC", 14, 10, 137, "Inclination")
            .with_point("AZM", 15, 10, 137, "Azimuth")
            .with_point("GEN1_p", 16, 8, 137, "")
            .with_point("RHOB_v", 900, 12, 40, "")
            .with_point("O_T2MRP_m", 700, 12, 50, "")
            .with_point("O_MR_PRJ8_m4", 701, 12, 50, "")
            .with_point("DDS1", 20, 8, 137, "")
            .with_point("ODF1", 21, 8, 137, "")
            .with_point("ODF2", 22, 8, 40, "");
        for i in 0..25 {
            catalog = catalog.with_point(&format!("X{i:02}"), 1000 + i, 4, 137, "");
        }
        catalog
    }

    fn tools(catalog: &InMemoryCatalog, raw: &RawRequest) -> Vec<Tool> {
        let entries = declared_tools(raw).unwrap();
        ToolResolver::new().resolve(catalog, &entries, 8.5).unwrap()
    }

    fn selected() -> SelectedCatalog {
        SelectedCatalog {
            file: "RTDPointCatalog_2025_0.db".into(),
            qc_code: Some("TnAShared2025_1_004".into()),
        }
    }

    fn raw(value: serde_json::Value) -> RawRequest {
        serde_json::from_value(value).unwrap()
    }

    fn fsl(mtf: &[&str], gtf: &[&str], rot: &[&str]) -> serde_json::Value {
        json!({
            "description": "Drilling",
            "bitrate": 3,
            "ROP": 80,
            "TF": 12,
            "MTF": mtf,
            "GTF": gtf,
            "ROT": rot,
            "UTIL": ["INC"],
            "TOOLS": [{"NAME": "IMP", "VERSION": "v16.0"}, {"NAME": "ECO", "VERSION": "v7.1"}]
        })
    }

    fn names(points: &[DataPoint]) -> Vec<&str> {
        points.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn toolface_interval_sets_time_updates() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty();
        let rules = RuleEngine::builtin();
        let raw = raw(json!({"num_of_fsl": 2, "fsl1": fsl(&["mtf", "INC"], &["gtf"], &["RHOB_v", "GEN1_p"])}));
        let tools = tools(&catalog, &raw);
        let request = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap();

        let fsl1 = &request.framesets[0];
        assert_eq!(fsl1.bitrate, 3.0);
        assert_eq!(fsl1.rop, 80.0);
        assert_eq!(fsl1.mtf.iter().find(|p| p.name == "mtf").unwrap().time, Some(12.0));
        assert_eq!(fsl1.mtf.iter().find(|p| p.name == "INC").unwrap().time, None);
        assert_eq!(fsl1.gtf[0].time, Some(12.0));
        assert_eq!(fsl1.max_bounds_pct, 50);
        assert_eq!(fsl1.ddr, [DdrSlot::fallback(0), DdrSlot::fallback(1), DdrSlot::fallback(2)]);
        assert_eq!(request.num_of_fsl, 2);
        assert_eq!(request.catalog_qc_code.as_deref(), Some("TnAShared2025_1_004"));
        assert!(!request.framesets[1].is_populated());
        assert_eq!(names(&request.utility.points), vec!["INC"]);
    }

    #[test]
    fn raw_toolface_replaces_computed_toolface() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty();
        let rules = RuleEngine::builtin();
        let raw = raw(json!({"fsl1": fsl(&["mtf", "hz", "gz"], &["gtf"], &["RHOB_v"])}));
        let tools = tools(&catalog, &raw);
        let request = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap();

        let fsl1 = &request.framesets[0];
        assert_eq!(names(&fsl1.mtf), vec!["gz", "hz"]);
        assert!(fsl1.mtf.iter().all(|p| p.time == Some(48.0)));
        assert_eq!(fsl1.max_bounds_pct, 70);
    }

    #[test]
    fn large_raw_toolface_frame_keeps_default_bounds() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty();
        let rules = RuleEngine::builtin();
        let mut mtf: Vec<String> = (0..25).map(|i| format!("X{i:02}")).collect();
        mtf.push("hz".into());
        let mtf: Vec<&str> = mtf.iter().map(String::as_str).collect();
        let raw = raw(json!({"fsl1": fsl(&mtf, &["gtf"], &["RHOB_v"])}));
        let tools = tools(&catalog, &raw);
        let request = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap();
        assert_eq!(request.framesets[0].mtf.len(), 26);
        assert_eq!(request.framesets[0].max_bounds_pct, 50);
    }

    #[test]
    fn nmr_interval_scales_and_rotary_exclusions_hold() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty();
        let rules = RuleEngine::builtin();
        let mut frameset = fsl(&["mtf"], &["gtf"], &["O_T2MRP_m", "O_MR_PRJ8_m4", "GEN1_p"]);
        frameset["NMR"] = json!("20.9");
        frameset["TOOLS"] = json!([{"NAME": "IMP", "VERSION": "v16.0"}, {"NAME": "MR", "VERSION": "v2.0"}]);
        frameset["time"] = json!([{"Name": "GEN1_p", "Update": 5}]);
        let raw = raw(json!({"fsl1": frameset}));
        let tools = tools(&catalog, &raw);
        let request = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap();

        let rotary = &request.framesets[0].rotary;
        let time = |name: &str| rotary.iter().find(|p| p.name == name).unwrap().time;
        assert_eq!(time("O_T2MRP_m"), Some(20.0 * 1.15));
        assert_eq!(time("O_MR_PRJ8_m4"), Some(80.0));
        assert_eq!(time("GEN1_p"), None);
    }

    #[test]
    fn missing_token_list_is_reported() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty();
        let rules = RuleEngine::builtin();
        let mut frameset = fsl(&["mtf"], &["gtf"], &["RHOB_v"]);
        frameset["ROT"] = serde_json::Value::Null;
        let raw = raw(json!({"fsl1": fsl(&["mtf"], &["gtf"], &["RHOB_v"]), "fsl3": frameset}));
        let tools = tools(&catalog, &raw);
        let err = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingInput { ref frame, field: "ROT" } if frame == "fsl3"));
    }

    #[test]
    fn library_frames_follow_the_tools() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty()
            .with_extended("IMPTOOL", "160", &["DDS1"])
            .with_on_demand("IMPTOOL", "160", &["ODF1"])
            .with_on_demand("ECOTOOL", "7.1", &["ODF2", "ODF1"])
            .with_multi_on_demand("ECOTOOL", "7.1", &[&["ODF2"], &["ODF1", "ODF2"]]);
        let rules = RuleEngine::builtin();
        let raw = raw(json!({"modf_required": "true", "fsl1": fsl(&["mtf"], &["gtf"], &["RHOB_v"])}));
        let tools = tools(&catalog, &raw);
        let request = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap();

        assert_eq!(names(&request.extended_frame), vec!["DDS1"]);
        assert!(request.framesets.iter().all(|f| f.max_data_points == 333));
        assert_eq!(names(&request.on_demand_frame), vec!["ODF1", "ODF2"]);
        assert!(request.flags.on_demand_required);
        assert_eq!(request.multi_on_demand_frame.len(), 2);
        assert_eq!(names(&request.multi_on_demand_frame[1]), vec!["ODF1", "ODF2"]);
    }

    #[test]
    fn three_frameset_tool_clamps_count() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty();
        let rules = RuleEngine::builtin();
        let mut frameset = fsl(&["mtf"], &["gtf"], &["RHOB_v"]);
        frameset["TOOLS"] = json!([{"NAME": "DVDXT", "VERSION": "v10"}]);
        let raw = raw(json!({"num_of_fsl": 6, "fsl1": frameset}));
        let tools = tools(&catalog, &raw);
        let request = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap();
        assert_eq!(request.num_of_fsl, 3);
        assert!(!request.flags.on_demand_required);
        assert!(request.multi_on_demand_frame.is_empty());
    }

    #[test]
    fn ddr_values_and_zero_fallbacks() {
        let catalog = catalog();
        let library = StaticFrameLibrary::empty();
        let rules = RuleEngine::builtin();
        let mut frameset = fsl(&["mtf"], &["gtf"], &["RHOB_v"]);
        frameset["R1_space"] = json!(150);
        frameset["R1_block"] = json!("4");
        frameset["R2_space"] = json!(0);
        let raw = raw(json!({"fsl1": frameset}));
        let tools = tools(&catalog, &raw);
        let request = FrameSetAssembler::new(&catalog, &library, &rules)
            .assemble(&raw, "u1", &selected(), tools)
            .unwrap();
        let ddr = request.framesets[0].ddr;
        assert_eq!(ddr[0], DdrSlot { spacing: 150.0, block: 4 });
        assert_eq!(ddr[1], DdrSlot::fallback(1));
    }
}
