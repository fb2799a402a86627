use std::collections::BTreeMap;

use framegen_types::{DataPoint, FrameRequest, FrameSet, Tool, UtilityFrame};
use serde::{Deserialize, Serialize};

/// Frameset as the packing service reads it.
#[derive(Clone, Debug, Serialize)]
pub struct WireFrameSet<'a> {
    pub description: &'a str,
    pub bitrate: f64,
    pub rop: f64,
    pub nonorion_update: f64,
    pub orion_update: f64,
    #[serde(rename = "R1_block")]
    pub r1_block: i64,
    #[serde(rename = "R1_space")]
    pub r1_space: f64,
    #[serde(rename = "R2_block")]
    pub r2_block: i64,
    #[serde(rename = "R2_space")]
    pub r2_space: f64,
    #[serde(rename = "R3_block")]
    pub r3_block: i64,
    #[serde(rename = "R3_space")]
    pub r3_space: f64,
    pub min_bounds_pct: u32,
    pub max_bounds_pct: u32,
    pub max_dpoints: u32,
    pub mtf: &'a [DataPoint],
    pub gtf: &'a [DataPoint],
    pub rotary: &'a [DataPoint],
}

impl<'a> From<&'a FrameSet> for WireFrameSet<'a> {
    fn from(fsl: &'a FrameSet) -> Self {
        Self {
            description: &fsl.description,
            bitrate: fsl.bitrate,
            rop: fsl.rop,
            nonorion_update: fsl.nonprimary_update,
            orion_update: fsl.primary_update,
            r1_block: fsl.ddr[0].block,
            r1_space: fsl.ddr[0].spacing,
            r2_block: fsl.ddr[1].block,
            r2_space: fsl.ddr[1].spacing,
            r3_block: fsl.ddr[2].block,
            r3_space: fsl.ddr[2].spacing,
            min_bounds_pct: fsl.min_bounds_pct,
            max_bounds_pct: fsl.max_bounds_pct,
            max_dpoints: fsl.max_data_points,
            mtf: &fsl.mtf,
            gtf: &fsl.gtf,
            rotary: &fsl.rotary,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WireUtility<'a> {
    pub description: &'a str,
    pub bitrate: f64,
    pub rop: f64,
    pub utility: &'a [DataPoint],
}

impl<'a> From<&'a UtilityFrame> for WireUtility<'a> {
    fn from(utility: &'a UtilityFrame) -> Self {
        Self {
            description: &utility.description,
            bitrate: utility.bitrate,
            rop: utility.rop,
            utility: &utility.points,
        }
    }
}

/// Normalized request body posted to the packing service.
#[derive(Clone, Debug, Serialize)]
pub struct PackingRequest<'a> {
    pub uid: &'a str,
    pub job_number: &'a str,
    pub well_name: &'a str,
    pub section_size: &'a str,
    pub fsl1: WireFrameSet<'a>,
    pub fsl2: WireFrameSet<'a>,
    pub fsl3: WireFrameSet<'a>,
    pub fsl4: WireFrameSet<'a>,
    pub fsl5: WireFrameSet<'a>,
    pub fsl6: WireFrameSet<'a>,
    pub utility: WireUtility<'a>,
    pub num_of_fsl: u32,
    pub odf_required: bool,
    pub modf_required: bool,
    pub provision_bha: bool,
    pub ddr_bha: bool,
    pub hspm_version: &'a str,
    pub tools: &'a [Tool],
    pub odf_frame: &'a [DataPoint],
    pub modf_frame: &'a [Vec<DataPoint>],
    pub dds_frame: &'a [DataPoint],
}

impl<'a> PackingRequest<'a> {
    pub fn new(req: &'a FrameRequest) -> Self {
        let [f1, f2, f3, f4, f5, f6] = &req.framesets;
        Self {
            uid: &req.uid,
            job_number: &req.job_number,
            well_name: &req.well_name,
            section_size: &req.section_size,
            fsl1: f1.into(),
            fsl2: f2.into(),
            fsl3: f3.into(),
            fsl4: f4.into(),
            fsl5: f5.into(),
            fsl6: f6.into(),
            utility: (&req.utility).into(),
            num_of_fsl: req.num_of_fsl,
            odf_required: req.flags.on_demand_required,
            modf_required: req.flags.multi_frame_required,
            provision_bha: req.flags.provision_bha,
            ddr_bha: req.flags.ddr_bha,
            hspm_version: &req.catalog,
            tools: &req.tools,
            odf_frame: &req.on_demand_frame,
            modf_frame: &req.multi_on_demand_frame,
            dds_frame: &req.extended_frame,
        }
    }

    /// Framesets in slot order.
    pub fn framesets(&self) -> [&WireFrameSet<'a>; 6] {
        [&self.fsl1, &self.fsl2, &self.fsl3, &self.fsl4, &self.fsl5, &self.fsl6]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameParameters {
    #[serde(rename = "ROP", default)]
    pub rop: Option<f64>,
}

/// One packed frame; framesets carry parameters and the three groupings, the utility frame
/// carries only its list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectedFrame {
    #[serde(rename = "Parameters", default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<FrameParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtf: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtf: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotary: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utility: Option<Vec<String>>,
}

impl CorrectedFrame {
    pub fn rop(&self) -> Option<f64> {
        self.parameters.as_ref().and_then(|p| p.rop)
    }
}

/// Packing service answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackingResult {
    #[serde(default)]
    pub corrected: BTreeMap<String, CorrectedFrame>,
    /// Frame name → field → message (null when the field packed cleanly).
    #[serde(default)]
    pub errors: BTreeMap<String, BTreeMap<String, Option<String>>>,
}

impl PackingResult {
    /// Non-null error messages as (frame, message), frames in name order.
    pub fn error_messages(&self) -> Vec<(&str, &str)> {
        self.errors
            .iter()
            .flat_map(|(frame, fields)| {
                fields
                    .values()
                    .filter_map(|m| m.as_deref())
                    .filter(|m| !m.is_empty())
                    .map(move |m| (frame.as_str(), m))
            })
            .collect()
    }

    /// Neither framesets nor errors came back.
    pub fn is_empty(&self) -> bool {
        self.corrected.is_empty() && self.error_messages().is_empty()
    }

    pub fn frameset(&self, index: usize) -> Option<&CorrectedFrame> {
        self.corrected.get(&format!("fsl{}", index + 1))
    }

    pub fn utility(&self) -> Option<&[String]> {
        self.corrected.get("utility").and_then(|u| u.utility.as_deref())
    }
}
