//! Raw frame request as submitted by the form front end.
//!
//! The front end is loose with types: flags arrive as booleans or `"true"`, numbers as numbers
//! or numeric strings, and token lists either as arrays or as strings holding an encoded array.
//! Everything is normalized here so the assembler only sees typed values.

use std::collections::HashMap;

use framegen_resolve::{OverrideValue, RequestedDdrSlot, ToolEntry, UpdateOverrides};
use framegen_types::FRAMESET_COUNT;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};

/// A list that may arrive as a JSON array or as a string containing one.
///
/// A string that does not decode is kept as an error instead of failing the whole request,
/// so the failure surfaces once the request has been accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedded<T>(Result<Vec<T>, String>);

impl<T> Embedded<T> {
    pub fn items(&self) -> Result<&[T], &str> {
        match &self.0 {
            Ok(items) => Ok(items),
            Err(reason) => Err(reason),
        }
    }
}

impl<T> From<Vec<T>> for Embedded<T> {
    fn from(items: Vec<T>) -> Self {
        Embedded(Ok(items))
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Embedded<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr<U> {
            List(Vec<U>),
            Encoded(String),
        }

        Ok(match Repr::<T>::deserialize(deserializer)? {
            Repr::List(items) => Embedded(Ok(items)),
            Repr::Encoded(text) => Embedded(serde_json::from_str(&text).map_err(|e| e.to_string())),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Number(f64),
    Text(String),
}

fn opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Loose::Number(n)) => Ok(Some(n)),
        Some(Loose::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Loose::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a number, found {s:?}"))),
        Some(Loose::Bool(b)) => Err(D::Error::custom(format!("expected a number, found {b}"))),
    }
}

fn opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(opt_f64(deserializer)?.map(|v| v.trunc() as i64))
}

fn opt_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    match opt_f64(deserializer)? {
        Some(v) if v < 0.0 => Err(D::Error::custom(format!("expected a non-negative count, found {v}"))),
        other => Ok(other.map(|v| v.trunc() as u32)),
    }
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        None => false,
        Some(Loose::Bool(b)) => b,
        Some(Loose::Number(n)) => n != 0.0,
        Some(Loose::Text(s)) => s.trim().eq_ignore_ascii_case("true"),
    })
}

fn opt_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        None => None,
        Some(Loose::Text(s)) => Some(s),
        Some(Loose::Number(n)) => Some(n.to_string()),
        Some(Loose::Bool(b)) => Some(b.to_string()),
    })
}

/// One `{Name, Update}` override entry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct UpdateEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Update", default = "null_override")]
    pub update: OverrideValue,
}

fn null_override() -> OverrideValue {
    OverrideValue::Null
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawFrameSet {
    #[serde(default, deserialize_with = "opt_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub bitrate: Option<f64>,
    #[serde(rename = "ROP", default, deserialize_with = "opt_f64")]
    pub rop: Option<f64>,
    #[serde(rename = "nonORION", default, deserialize_with = "opt_f64")]
    pub nonprimary_update: Option<f64>,
    #[serde(rename = "ORION", default, deserialize_with = "opt_f64")]
    pub primary_update: Option<f64>,
    /// Toolface sampling interval.
    #[serde(rename = "TF", default, deserialize_with = "opt_f64")]
    pub tf: Option<f64>,
    /// NMR block update interval.
    #[serde(rename = "NMR", default, deserialize_with = "opt_f64")]
    pub nmr: Option<f64>,
    #[serde(rename = "R1_space", default, deserialize_with = "opt_f64")]
    pub r1_space: Option<f64>,
    #[serde(rename = "R1_block", default, deserialize_with = "opt_i64")]
    pub r1_block: Option<i64>,
    #[serde(rename = "R2_space", default, deserialize_with = "opt_f64")]
    pub r2_space: Option<f64>,
    #[serde(rename = "R2_block", default, deserialize_with = "opt_i64")]
    pub r2_block: Option<i64>,
    #[serde(rename = "R3_space", default, deserialize_with = "opt_f64")]
    pub r3_space: Option<f64>,
    #[serde(rename = "R3_block", default, deserialize_with = "opt_i64")]
    pub r3_block: Option<i64>,
    #[serde(default)]
    pub time: Option<Vec<UpdateEntry>>,
    #[serde(default)]
    pub depth: Option<Vec<UpdateEntry>>,
    #[serde(rename = "MTF", default)]
    pub mtf: Option<Embedded<String>>,
    #[serde(rename = "GTF", default)]
    pub gtf: Option<Embedded<String>>,
    #[serde(rename = "ROT", default)]
    pub rotary: Option<Embedded<String>>,
    #[serde(rename = "UTIL", default)]
    pub utility: Option<Embedded<String>>,
    #[serde(rename = "TOOLS", default)]
    pub tools: Option<Embedded<ToolEntry>>,
}

impl RawFrameSet {
    /// Requested DDR slots, unset values left for the caller's fallback.
    pub fn ddr_slots(&self) -> [RequestedDdrSlot; 3] {
        [
            RequestedDdrSlot {
                spacing: self.r1_space,
                block: self.r1_block,
            },
            RequestedDdrSlot {
                spacing: self.r2_space,
                block: self.r2_block,
            },
            RequestedDdrSlot {
                spacing: self.r3_space,
                block: self.r3_block,
            },
        ]
    }

    pub fn overrides(&self) -> UpdateOverrides {
        let collect = |entries: &Option<Vec<UpdateEntry>>| -> HashMap<String, OverrideValue> {
            entries
                .iter()
                .flatten()
                .map(|e| (e.name.clone(), e.update.clone()))
                .collect()
        };
        UpdateOverrides {
            time: collect(&self.time),
            depth: collect(&self.depth),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawRequest {
    #[serde(default, deserialize_with = "opt_text")]
    pub uid: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub job_number: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub well_name: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub section_size: Option<String>,
    /// Catalog version label, e.g. `"HSPM 2025.0"`.
    #[serde(default, deserialize_with = "opt_text")]
    pub hspm_version: Option<String>,
    #[serde(default, deserialize_with = "opt_u32")]
    pub num_of_fsl: Option<u32>,
    #[serde(default, deserialize_with = "flag")]
    pub modf_required: bool,
    #[serde(default, deserialize_with = "flag")]
    pub odf_required: bool,
    #[serde(default, deserialize_with = "flag")]
    pub provision_bha: bool,
    #[serde(default, deserialize_with = "flag")]
    pub ddr_bha: bool,
    #[serde(default)]
    pub fsl1: Option<RawFrameSet>,
    #[serde(default)]
    pub fsl2: Option<RawFrameSet>,
    #[serde(default)]
    pub fsl3: Option<RawFrameSet>,
    #[serde(default)]
    pub fsl4: Option<RawFrameSet>,
    #[serde(default)]
    pub fsl5: Option<RawFrameSet>,
    #[serde(default)]
    pub fsl6: Option<RawFrameSet>,
}

impl RawRequest {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn framesets(&self) -> [Option<&RawFrameSet>; FRAMESET_COUNT] {
        [
            self.fsl1.as_ref(),
            self.fsl2.as_ref(),
            self.fsl3.as_ref(),
            self.fsl4.as_ref(),
            self.fsl5.as_ref(),
            self.fsl6.as_ref(),
        ]
    }

    /// Trimmed UID, `None` when missing or blank.
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loose_scalars_are_normalized() {
        let raw: RawRequest = serde_json::from_value(json!({
            "uid": "u1",
            "job_number": 4711,
            "section_size": "8.5in",
            "num_of_fsl": "3",
            "modf_required": "true",
            "odf_required": false,
            "ddr_bha": "false",
            "fsl1": {"bitrate": "6", "ROP": 120, "TF": "", "R1_block": "4"}
        }))
        .unwrap();
        assert_eq!(raw.uid(), Some("u1"));
        assert_eq!(raw.job_number.as_deref(), Some("4711"));
        assert_eq!(raw.num_of_fsl, Some(3));
        assert!(raw.modf_required);
        assert!(!raw.ddr_bha);
        let fsl1 = raw.fsl1.as_ref().unwrap();
        assert_eq!(fsl1.bitrate, Some(6.0));
        assert_eq!(fsl1.rop, Some(120.0));
        assert_eq!(fsl1.tf, None);
        assert_eq!(fsl1.r1_block, Some(4));
    }

    #[test]
    fn lists_accept_arrays_and_encoded_strings() {
        let raw: RawFrameSet = serde_json::from_value(json!({
            "MTF": ["mtf", "gtf"],
            "GTF": "[\"gtf\"]",
            "TOOLS": "[{\"NAME\": \"IMP\", \"VERSION\": \"v16.0\", \"LONG\": \"Impulse\"}]"
        }))
        .unwrap();
        assert_eq!(raw.mtf.unwrap().items().unwrap(), ["mtf", "gtf"]);
        assert_eq!(raw.gtf.unwrap().items().unwrap(), ["gtf"]);
        let tools = raw.tools.unwrap().items().unwrap().to_vec();
        assert_eq!(tools[0].name, "IMP");
        assert_eq!(tools[0].long_name.as_deref(), Some("Impulse"));
        assert!(raw.rotary.is_none());
    }

    #[test]
    fn garbage_in_an_encoded_list_is_kept_as_an_error() {
        let raw: RawFrameSet = serde_json::from_value(json!({"MTF": "not json", "GTF": ["gtf"]})).unwrap();
        assert!(raw.mtf.unwrap().items().is_err());
        assert_eq!(raw.gtf.unwrap().items().unwrap(), ["gtf"]);
    }

    #[test]
    fn overrides_and_ddr_slots() {
        let raw: RawFrameSet = serde_json::from_value(json!({
            "time": [{"Name": "GR", "Update": "12"}, {"Name": "RES", "Update": 30}],
            "depth": [{"Name": "GR", "Update": null}],
            "R2_space": 250
        }))
        .unwrap();
        let overrides = raw.overrides();
        assert_eq!(overrides.time["GR"].to_f64(), Some(12.0));
        assert_eq!(overrides.time["RES"].to_f64(), Some(30.0));
        assert_eq!(overrides.depth["GR"], OverrideValue::Null);
        let slots = raw.ddr_slots();
        assert_eq!(slots[1].spacing, Some(250.0));
        assert_eq!(slots[0], RequestedDdrSlot::default());
    }

    #[test]
    fn blank_uid_counts_as_missing() {
        let raw = RawRequest::from_json(r#"{"uid": "  ", "fsl2": null}"#).unwrap();
        assert_eq!(raw.uid(), None);
        assert!(raw.framesets().iter().all(Option::is_none));
    }
}
