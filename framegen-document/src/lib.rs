//! Wire document for the downhole configuration software.

use chrono::{Local, NaiveDateTime};
use framegen_catalog::FALLBACK_QC_CODE;
use framegen_types::{DataPoint, FrameRequest, Tool, SINGLE_FRAMESET_TOOL};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;
use tracing::debug;

/// Display names of the LWD tools that own a multi-on-demand frame set.
const MULTI_FRAME_TOOLS: [&str; 2] = ["ARC6", "ECO"];

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("no MWD tool in frame request")]
    NoPrimaryTool,
    #[error("multi-on-demand frames need an ARC6 or ECO tool on the assembly")]
    NoMultiFrameTool,
    #[error("xml error: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for DocumentError {
    fn from(e: quick_xml::Error) -> Self {
        DocumentError::Xml(e.to_string())
    }
}

/// Where and when a document is produced.
#[derive(Clone, Debug)]
pub struct DocumentContext {
    pub generated_at: NaiveDateTime,
    pub host: String,
}

impl DocumentContext {
    pub fn now(host: impl Into<String>) -> Self {
        Self {
            generated_at: Local::now().naive_local(),
            host: host.into(),
        }
    }

    fn date(&self) -> String {
        self.generated_at.format("%Y-%m-%d").to_string()
    }

    fn timestamp(&self) -> String {
        self.generated_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// Serializes assembled requests, stamping them with the local clock.
#[derive(Clone, Debug)]
pub struct DocumentSerializer {
    host: String,
}

impl DocumentSerializer {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn serialize(&self, request: &FrameRequest) -> Result<String, DocumentError> {
        render(request, &DocumentContext::now(self.host.clone()))
    }
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

type Attrs<'a> = &'a [(&'a str, String)];

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn tag<'a>(name: &'a str, attrs: Attrs<'_>) -> BytesStart<'a> {
        let mut start = BytesStart::new(name);
        for (key, value) in attrs {
            start.push_attribute((*key, value.as_str()));
        }
        start
    }

    fn open(&mut self, name: &str, attrs: Attrs<'_>) -> Result<(), DocumentError> {
        self.writer.write_event(Event::Start(Self::tag(name, attrs)))?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), DocumentError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: Attrs<'_>) -> Result<(), DocumentError> {
        self.writer.write_event(Event::Empty(Self::tag(name, attrs)))?;
        Ok(())
    }

    /// A frame element listing point ids; a frame without points holds a single space.
    fn frame(&mut self, name: &str, attrs: Attrs<'_>, points: &[DataPoint]) -> Result<(), DocumentError> {
        self.open(name, attrs)?;
        if points.is_empty() {
            self.writer.write_event(Event::Text(BytesText::new(" ")))?;
        } else {
            for point in points {
                self.empty("DataPoint", &[("ID", point.catalog_id.to_string())])?;
            }
        }
        self.close(name)
    }

    fn finish(self) -> Result<String, DocumentError> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| DocumentError::Xml(e.to_string()))
    }
}

fn check_status(populated: bool) -> String {
    let status = if populated { "Checked" } else { "Empty" };
    status.to_string()
}

fn tool_attrs(tool: &Tool) -> Vec<(&'static str, String)> {
    let mut attrs = vec![("Name", tool.tool_id.clone())];
    if let Some(version) = tool.version.as_ref().filter(|v| !v.is_empty()) {
        attrs.push(("Version", version.clone()));
    }
    if let Some(size) = &tool.size {
        attrs.push(("Size", size.clone()));
    }
    if let Some(spacing) = tool.tr_spacing.filter(|s| *s != 0.0) {
        attrs.push(("TRSpacing", spacing.to_string()));
    }
    if let Some(block) = tool.rt_blocksize.filter(|b| *b != 0) {
        let block = block.to_string();
        for key in ["RTBlockSize", "RTBlockSize_A", "RTBlockSize_B", "RTBlockSize_C"] {
            attrs.push((key, block.clone()));
        }
        for key in ["DataComp", "DataComp_A", "DataComp_B", "DataComp_C"] {
            attrs.push((key, "false".into()));
        }
        for key in ["CompDis", "CompDis_A", "CompDis_B", "CompDis_C"] {
            attrs.push((key, "0".into()));
        }
    }
    attrs
}

/// Renders the `Run` document for an assembled request.
pub fn render(request: &FrameRequest, ctx: &DocumentContext) -> Result<String, DocumentError> {
    let primary = request.primary_tool().ok_or(DocumentError::NoPrimaryTool)?;
    let date = ctx.date();
    let timestamp = ctx.timestamp();
    let notes = format!(
        "{}_{}_{}_{}",
        request.job_number, request.well_name, request.section_size, date
    );
    let fsl1 = &request.framesets[0];
    // Auxiliary frames share the first frameset's rate settings.
    let aux = |description: &str, status: String| {
        vec![
            ("Description", description.to_string()),
            ("BitRate", fsl1.bitrate.to_string()),
            ("ROP", fsl1.rop.to_string()),
            ("Notes", notes.clone()),
            ("CheckStatus", status),
        ]
    };

    let mut out = XmlOut::new();
    out.writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    out.open(
        "Run",
        &[
            ("Name", notes.clone()),
            ("TelemetryTool", primary.tool_id.clone()),
            ("Version", primary.version.clone().unwrap_or_default()),
            ("UnitSystem", "ENGLISH".into()),
            ("UserMode", "FIELD".into()),
            ("FileDate", timestamp.clone()),
            ("LastEditComputer", ctx.host.clone()),
            ("NumberOfFSLToBeDisplayed", "6".into()),
            ("FileFormatVersion", "3.0".into()),
        ],
    )?;

    out.open("BottomHoleAssembly", &[])?;
    for tool in &request.tools {
        out.empty("Tool", &tool_attrs(tool))?;
    }
    out.close("BottomHoleAssembly")?;

    for (idx, fsl) in request.framesets.iter().take(request.active_frameset_count()).enumerate() {
        out.open(
            "FrameSetList",
            &[
                ("Description", format!("FSL-{}", idx + 1)),
                ("BitRate", fsl.bitrate.to_string()),
                ("ROP", fsl.rop.to_string()),
                ("Notes", fsl.description.clone()),
                ("CheckStatus", check_status(fsl.is_populated())),
            ],
        )?;
        out.frame("MagneticToolFaceFrame", &[], &fsl.mtf)?;
        out.frame("GravityToolFaceFrame", &[], &fsl.gtf)?;
        out.frame("RotatingFrame", &[], &fsl.rotary)?;
        out.close("FrameSetList")?;
    }

    if !request.extended_frame.is_empty() {
        out.frame("DDSFrame", &aux("DDS Frame", check_status(true)), &request.extended_frame)?;
    }

    out.frame(
        "UtilityFrame",
        &aux("Utility Frame", check_status(true)),
        &request.utility.points,
    )?;

    if primary.tool_id != SINGLE_FRAMESET_TOOL {
        out.frame(
            "OnDemandFrame",
            &aux("ODF", check_status(!request.on_demand_frame.is_empty())),
            &request.on_demand_frame,
        )?;

        if !request.multi_on_demand_frame.is_empty() {
            let owner = request
                .tools
                .iter()
                .find(|t| MULTI_FRAME_TOOLS.contains(&t.display_name.as_str()))
                .ok_or(DocumentError::NoMultiFrameTool)?;
            let has_eco = request.tools.iter().any(|t| t.display_name == "ECO");
            out.open(
                "MODFSet",
                &[
                    ("SubName", "MODFSet 1".into()),
                    ("LWDLTBID", owner.ltb_addr.to_string()),
                    ("LockLevel", "Unlocked".into()),
                ],
            )?;
            for (idx, frame) in request.multi_on_demand_frame.iter().enumerate() {
                let name = if has_eco {
                    format!("ECO APPO2 MODF{}", idx + 1)
                } else {
                    format!("ARC6 APPO MODF{}", idx + 1)
                };
                let mut attrs = aux("", check_status(true));
                attrs[0] = ("Name", name);
                out.frame("MODF", &attrs, frame)?;
            }
            out.close("MODFSet")?;
        }
    }

    out.empty("CustomRuleFile", &[("Name", "CustomRuleFile".into())])?;
    out.empty(
        "QCElement",
        &[
            (
                "HSPMVersion",
                request.catalog_qc_code.clone().unwrap_or_else(|| FALLBACK_QC_CODE.to_string()),
            ),
            ("FileDateTime", timestamp),
            ("LocationSpecificRules", String::new()),
            ("QCCheck", "NoErrorOrWarning".into()),
        ],
    )?;
    out.close("Run")?;

    debug!(uid = %request.uid, tools = request.tools.len(), "document rendered");
    out.finish()
}
