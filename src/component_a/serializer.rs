//! serializer.rs
//! Snapshot → wire text. Pure; operates on an owned copy, no locking.
//!
//! Both encodings carry the same fields in the same order:
//! act, calib, pbits, pmm, button, grip, actTime.
//! Values are textual: booleans as `True`/`False`, floats always with a fractional
//! part (`-1.0`, `42.5`), `actTime` as seconds since the Unix epoch. Output is one line.

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use std::{
    io,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::component_a::state_cell::Snapshot;
use crate::utils::error::EncodeError;

pub const ROOT_TAG: &str = "GripperData";
pub const FIELD_ORDER: [&str; 7] = ["act", "calib", "pbits", "pmm", "button", "grip", "actTime"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    Xml,
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "GripperData")]
    data: &'a WireFields,
}

/// Field values already rendered as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireFields {
    pub act: String,
    pub calib: String,
    pub pbits: String,
    pub pmm: String,
    pub button: String,
    pub grip: String,
    #[serde(rename = "actTime")]
    pub act_time: String,
}

impl WireFields {
    pub fn from_snapshot(s: &Snapshot) -> Self {
        Self {
            act: bool_text(s.activated).into(),
            calib: bool_text(s.calibrated).into(),
            pbits: s.position_raw.to_string(),
            pmm: float_text(s.position_mm),
            button: bool_text(s.button_pressed).into(),
            grip: bool_text(s.commanded_open).into(),
            act_time: float_text(epoch_secs(s.last_command_time)),
        }
    }

    /// (name, value) pairs in wire order.
    pub fn pairs(&self) -> [(&'static str, &str); 7] {
        [
            ("act", self.act.as_str()),
            ("calib", self.calib.as_str()),
            ("pbits", self.pbits.as_str()),
            ("pmm", self.pmm.as_str()),
            ("button", self.button.as_str()),
            ("grip", self.grip.as_str()),
            ("actTime", self.act_time.as_str()),
        ]
    }
}

pub fn serialize(snapshot: &Snapshot, format: WireFormat) -> Result<String, EncodeError> {
    let fields = WireFields::from_snapshot(snapshot);
    match format {
        WireFormat::Json => to_json(&fields),
        WireFormat::Xml => Ok(to_xml(&fields)),
    }
}

fn to_json(fields: &WireFields) -> Result<String, EncodeError> {
    let mut buf = Vec::with_capacity(192);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    Envelope { data: fields }.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

fn to_xml(fields: &WireFields) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('<');
    out.push_str(ROOT_TAG);
    out.push('>');
    for (name, value) in fields.pairs() {
        out.push_str(&format!("<{name}>{value}</{name}>"));
    }
    out.push_str("</");
    out.push_str(ROOT_TAG);
    out.push('>');
    out
}

/// Compact JSON with `": "` and `", "` separators, kept on one line.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[inline]
pub fn bool_text(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

/// Shortest round-trip text, always with a fractional part for finite integral values.
pub fn float_text(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

pub fn epoch_secs(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_a::state_cell::UNCALIBRATED_MM;
    use std::time::Duration;

    fn scenario() -> Snapshot {
        Snapshot {
            activated: true,
            calibrated: true,
            position_raw: 120,
            position_mm: 42.5,
            button_pressed: false,
            commanded_open: false,
            last_command_time: UNIX_EPOCH + Duration::from_millis(1_720_000_000_250),
            seq: 9,
        }
    }

    fn xml_value<'a>(doc: &'a str, tag: &str) -> &'a str {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        let start = doc.find(&open).expect("open tag") + open.len();
        let end = doc[start..].find(&close).expect("close tag") + start;
        &doc[start..end]
    }

    #[test]
    fn json_scenario_matches_wire_text() {
        let text = serialize(&scenario(), WireFormat::Json).unwrap();
        assert!(text.contains(r#""act": "True""#), "{text}");
        assert!(text.contains(r#""pmm": "42.5""#), "{text}");
        assert!(text.contains(r#""grip": "False""#), "{text}");
        assert!(text.contains(r#""pbits": "120""#), "{text}");
        assert!(text.contains(r#""actTime": "1720000000.25""#), "{text}");
        assert!(text.starts_with(r#"{"GripperData": {"act""#), "{text}");
        assert!(!text.contains('\n'));
    }

    #[test]
    fn json_field_order_is_fixed() {
        let text = serialize(&scenario(), WireFormat::Json).unwrap();
        let positions: Vec<usize> = FIELD_ORDER
            .iter()
            .map(|f| text.find(&format!("\"{f}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{text}");
    }

    #[test]
    fn xml_field_order_is_fixed() {
        let text = serialize(&scenario(), WireFormat::Xml).unwrap();
        assert!(text.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><GripperData>"#));
        assert!(text.ends_with("</GripperData>"));
        let positions: Vec<usize> = FIELD_ORDER
            .iter()
            .map(|f| text.find(&format!("<{f}>")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{text}");
        assert!(!text.contains('\n'));
    }

    #[test]
    fn json_and_xml_expose_identical_values() {
        let mut uncalibrated = scenario();
        uncalibrated.calibrated = false;
        uncalibrated.position_mm = UNCALIBRATED_MM;
        uncalibrated.button_pressed = true;

        for snap in [scenario(), uncalibrated] {
            let json: serde_json::Value =
                serde_json::from_str(&serialize(&snap, WireFormat::Json).unwrap()).unwrap();
            let xml = serialize(&snap, WireFormat::Xml).unwrap();
            for field in FIELD_ORDER {
                let jv = json[ROOT_TAG][field].as_str().unwrap();
                assert_eq!(jv, xml_value(&xml, field), "field {field}");
            }
            if !snap.calibrated {
                assert_eq!(json[ROOT_TAG]["calib"], "False");
                assert_eq!(json[ROOT_TAG]["pmm"], "-1.0");
                assert_eq!(xml_value(&xml, "pmm"), "-1.0");
            }
        }
    }

    #[test]
    fn float_text_keeps_fraction() {
        assert_eq!(float_text(-1.0), "-1.0");
        assert_eq!(float_text(42.5), "42.5");
        assert_eq!(float_text(0.0), "0.0");
        assert_eq!(float_text(85.0), "85.0");
    }
}
