//! Typed model of `tshark -T json` output
//!
//! ```json
//! [
//!   {
//!     "_index": "packets-2024-01-01",
//!     "_source": {
//!       "layers": {
//!         "frame": {"frame.number": "1", "frame.comment": "good_1.dat"},
//!         "udp": {"udp.srcport": "53", "_ws.expert": {"_ws.expert.severity": "6291456"}}
//!       }
//!     }
//!   }
//! ]
//! ```
//!
//! Layer values are objects for decoded protocols, arrays when a protocol
//! occurs more than once (`--no-duplicate-keys`), and bare strings for a
//! layer that decoded no fields.

use crate::error::{EngineError, EngineResult};
use crate::verdict::Severity;
use serde::Deserialize;
use serde_json::{Map, Value};

const COMMENT_FIELD: &str = "frame.comment";
const NUMBER_FIELD: &str = "frame.number";
const SEVERITY_FIELD: &str = "_ws.expert.severity";
const MESSAGE_FIELD: &str = "_ws.expert.message";
const MALFORMED_LAYER: &str = "_ws.malformed";

#[derive(Debug, Clone, Deserialize)]
pub struct TsharkPacket {
    #[serde(rename = "_source")]
    pub source: TsharkSource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TsharkSource {
    #[serde(default)]
    pub layers: Map<String, Value>,
}

/// Parse the full JSON document tshark writes to stdout
pub fn parse_packets(json: &str) -> EngineResult<Vec<TsharkPacket>> {
    // tshark prints nothing at all for an empty capture
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
        .map_err(|e| EngineError::dissector_output(format!("tshark JSON did not parse: {e}")))
}

/// Decoded view of one protocol layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFindings {
    pub field_count: usize,
    pub severity: Option<Severity>,
    pub message: String,
}

impl TsharkPacket {
    pub fn layers(&self) -> &Map<String, Value> {
        &self.source.layers
    }

    /// First frame comment found anywhere in the packet
    pub fn annotation(&self) -> Option<String> {
        self.layers()
            .values()
            .find_map(|layer| find_field(layer, COMMENT_FIELD))
            .and_then(scalar_text)
            .filter(|s| !s.is_empty())
    }

    /// `frame.number` of the packet, when tshark reported one
    pub fn frame_number(&self) -> Option<String> {
        self.layers()
            .get("frame")
            .and_then(|frame| find_field(frame, NUMBER_FIELD))
            .and_then(scalar_text)
    }

    /// Whether the generic cross-layer malformation marker is present
    pub fn is_malformed(&self) -> bool {
        self.layers()
            .keys()
            .any(|k| k.eq_ignore_ascii_case(MALFORMED_LAYER))
    }

    /// The layer for `protocol`, or `None` when the protocol was not decoded
    pub fn protocol_layer(&self, protocol: &str) -> Option<&Value> {
        self.layers()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(protocol))
            .map(|(_, v)| v)
    }

    /// Field count and first expert diagnostic of the `protocol` layer
    pub fn findings(&self, protocol: &str) -> Option<LayerFindings> {
        let layer = self.protocol_layer(protocol)?;
        // Repeated protocol: the outermost occurrence is the one under test
        let layer = match layer {
            Value::Array(items) => items.first().unwrap_or(&Value::Null),
            other => other,
        };
        let fields = match layer {
            Value::Object(map) => Some(map),
            _ => None,
        };
        let field_count = fields.map_or(0, |m| m.len());

        let (severity, message) = match fields.and_then(find_expert) {
            Some((raw, message)) => (Some(Severity::from_raw_floor(raw)), message),
            None => (None, String::new()),
        };

        Some(LayerFindings {
            field_count,
            severity,
            message,
        })
    }
}

/// First `(severity, message)` pair in a layer, searched depth-first
fn find_expert(map: &Map<String, Value>) -> Option<(u32, String)> {
    if let Some(raw) = map.get(SEVERITY_FIELD).and_then(scalar_text) {
        let severity = parse_severity(&raw)?;
        let message = map
            .get(MESSAGE_FIELD)
            .and_then(scalar_text)
            .unwrap_or_default();
        return Some((severity, message));
    }
    map.values().find_map(|value| match value {
        Value::Object(inner) => find_expert(inner),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::Object(inner) => find_expert(inner),
            _ => None,
        }),
        _ => None,
    })
}

/// Decimal or `0x`-prefixed hexadecimal severity value
pub fn parse_severity(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn find_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(name)
            .or_else(|| map.values().find_map(|v| find_field(v, name))),
        Value::Array(items) => items.iter().find_map(|v| find_field(v, name)),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.first().and_then(scalar_text),
        _ => None,
    }
}
