//! Dissector invoker
//!
//! Runs tshark once over an aggregate capture and reduces every packet to a
//! [`DissectionResult`] for the target protocol.

use super::tshark::{parse_packets, TsharkPacket};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::toolchain::{run_checked, ToolInvocation, ToolRunner};
use crate::verdict::Severity;
use serde::Serialize;
use std::path::Path;

pub const ABSENT_MESSAGE: &str =
    "Packet malformed to the point that the expected protocol is not found";
pub const STRICT_MALFORMED_MESSAGE: &str =
    "Packet carries a malformed marker and strict mode is on";
pub const ZERO_FIELDS_MESSAGE: &str =
    "Expected protocol found in packet but protocol layer has zero fields";

/// What the dissector found for one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DissectionResult {
    /// Annotation of the frame, or its position when it has none
    pub frame: String,
    /// Target protocol layer decoded (and, in strict mode, no malformation)
    pub present: bool,
    pub field_count: usize,
    pub severity: Severity,
    pub message: String,
    /// Generic malformation marker seen on the packet
    pub malformed: bool,
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct DissectOptions {
    /// Treat any malformation marker as an absent protocol
    pub strict: bool,
    /// Log the layer tree of every rejected frame
    pub debug: bool,
    /// Extra environment for the dissector process
    pub env: Vec<(String, String)>,
}

/// Name the dissector uses for a protocol tag
pub fn dissector_protocol(protocol: &str) -> String {
    match protocol.to_ascii_lowercase().as_str() {
        "ipv4" => "ip".to_string(),
        other => other.to_string(),
    }
}

pub struct DissectorInvoker<'a> {
    config: &'a EngineConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> DissectorInvoker<'a> {
    pub fn new(config: &'a EngineConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    /// Build the tshark command line for `capture`
    pub fn invocation(&self, capture: &Path, options: &DissectOptions) -> ToolInvocation {
        let mut inv = ToolInvocation::new(&self.config.tools.tshark)
            .arg("-r")
            .path_arg(capture)
            .args(["-T", "json", "--no-duplicate-keys"]);
        for pref in &self.config.dissector_prefs {
            inv = inv.arg("-o").arg(pref.as_str());
        }
        for (key, value) in &options.env {
            inv = inv.env(key.as_str(), value.as_str());
        }
        inv
    }

    /// Dissect every frame of `capture`, in stored order
    pub fn dissect(
        &self,
        capture: &Path,
        protocol: &str,
        options: &DissectOptions,
    ) -> EngineResult<Vec<DissectionResult>> {
        let output = run_checked(self.runner, &self.invocation(capture, options))?;
        let packets = parse_packets(&output.stdout_lossy())?;
        let target = dissector_protocol(protocol);

        let results: Vec<DissectionResult> = packets
            .iter()
            .enumerate()
            .map(|(index, packet)| {
                let result = inspect(packet, index, &target, options.strict);
                log_result(&result, protocol);
                if options.debug && (!result.present || result.severity.rejects()) {
                    log_layers(&result.frame, packet);
                }
                result
            })
            .collect();

        tracing::debug!(
            capture = %capture.display(),
            protocol = %target,
            frames = results.len(),
            "Dissection complete"
        );
        Ok(results)
    }
}

/// Reduce one packet to the finding for `protocol`
pub fn inspect(packet: &TsharkPacket, index: usize, protocol: &str, strict: bool) -> DissectionResult {
    let frame = packet
        .annotation()
        .or_else(|| packet.frame_number())
        .unwrap_or_else(|| (index + 1).to_string());
    let malformed = packet.is_malformed();

    let absent = |message: &str| DissectionResult {
        frame: frame.clone(),
        present: false,
        field_count: 0,
        severity: Severity::Error,
        message: message.to_string(),
        malformed,
    };

    let findings = match packet.findings(protocol) {
        Some(f) => f,
        None => return absent(ABSENT_MESSAGE),
    };
    if strict && malformed {
        return absent(STRICT_MALFORMED_MESSAGE);
    }

    let (severity, message) = if findings.field_count == 0 {
        (Severity::Warning, ZERO_FIELDS_MESSAGE.to_string())
    } else {
        (findings.severity.unwrap_or(Severity::None), findings.message)
    };

    DissectionResult {
        frame,
        present: true,
        field_count: findings.field_count,
        severity,
        message,
        malformed,
    }
}

fn log_result(result: &DissectionResult, protocol: &str) {
    let valid = result.present && !result.severity.rejects();
    match result.severity {
        Severity::Error => tracing::warn!(
            input = %result.frame,
            proto = %protocol,
            valid,
            severity = %result.severity,
            message = %result.message,
            "Frame validated"
        ),
        _ => tracing::info!(
            input = %result.frame,
            proto = %protocol,
            valid,
            severity = %result.severity,
            message = %result.message,
            "Frame validated"
        ),
    }
}

fn log_layers(frame: &str, packet: &TsharkPacket) {
    match serde_json::to_string_pretty(packet.layers()) {
        Ok(tree) => tracing::info!(input = %frame, "Rejected frame layers:\n{tree}"),
        Err(e) => tracing::debug!(input = %frame, error = %e, "Could not render layer tree"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::ToolOutput;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedTshark {
        stdout: String,
        seen: Mutex<Vec<ToolInvocation>>,
    }

    impl ToolRunner for ScriptedTshark {
        fn run(&self, invocation: &ToolInvocation) -> EngineResult<ToolOutput> {
            self.seen.lock().unwrap().push(invocation.clone());
            Ok(ToolOutput {
                status: Some(0),
                stdout: self.stdout.clone().into_bytes(),
                stderr: String::new(),
            })
        }
    }

    fn packet(layers: serde_json::Value) -> TsharkPacket {
        serde_json::from_value(json!({ "_source": { "layers": layers } })).unwrap()
    }

    #[test]
    fn test_alias() {
        assert_eq!(dissector_protocol("IPv4"), "ip");
        assert_eq!(dissector_protocol("UDP"), "udp");
    }

    #[test]
    fn test_absent_protocol() {
        let p = packet(json!({"frame": {"frame.comment": "neg_short.dat"}, "data": {"data.len": "3"}}));
        let r = inspect(&p, 0, "udp", false);
        assert_eq!(r.frame, "neg_short.dat");
        assert!(!r.present);
        assert_eq!(r.severity, Severity::Error);
        assert_eq!(r.message, ABSENT_MESSAGE);
    }

    #[test]
    fn test_strict_mode_turns_malformation_into_absence() {
        let p = packet(json!({"udp": {"udp.port": "53"}, "_ws.malformed": {}}));
        let lenient = inspect(&p, 0, "udp", false);
        assert!(lenient.present);
        assert!(lenient.malformed);
        assert_eq!(lenient.severity, Severity::None);

        let strict = inspect(&p, 0, "udp", true);
        assert!(!strict.present);
        assert_eq!(strict.severity, Severity::Error);
    }

    #[test]
    fn test_zero_fields_is_warning() {
        let r = inspect(&packet(json!({"tpkt": {}})), 4, "tpkt", false);
        assert!(r.present);
        assert_eq!(r.frame, "5");
        assert_eq!(r.severity, Severity::Warning);
        assert_eq!(r.message, ZERO_FIELDS_MESSAGE);
    }

    #[test]
    fn test_frame_number_fallback() {
        let r = inspect(&packet(json!({"frame": {"frame.number": "7"}, "udp": {"a": "1"}})), 0, "udp", false);
        assert_eq!(r.frame, "7");
    }

    #[test]
    fn test_dissect_runs_tshark_once_with_prefs() {
        let doc = json!([
            {"_source": {"layers": {
                "frame": {"frame.comment": "good_1.dat"},
                "udp": {"udp.srcport": "53"}
            }}},
            {"_source": {"layers": {
                "frame": {"frame.comment": "edge_1.dat"},
                "udp": {"udp.srcport": "53", "_ws.expert": {
                    "_ws.expert.severity": "8388608",
                    "_ws.expert.message": "Bad length"
                }}
            }}}
        ]);
        let runner = ScriptedTshark {
            stdout: doc.to_string(),
            seen: Mutex::new(Vec::new()),
        };
        let config = EngineConfig::default();
        let invoker = DissectorInvoker::new(&config, &runner);
        let options = DissectOptions {
            strict: false,
            debug: true,
            env: vec![("GCOV_PREFIX".to_string(), "/tmp/run".to_string())],
        };
        let results = invoker.dissect(Path::new("/tmp/run/all.pcapng"), "UDP", &options).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].severity, Severity::None);
        assert_eq!(results[1].severity, Severity::Error);
        assert_eq!(results[1].message, "Bad length");

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let args = &seen[0].args;
        assert_eq!(&args[..5], &["-r", "/tmp/run/all.pcapng", "-T", "json", "--no-duplicate-keys"]);
        assert!(args.iter().any(|a| a == "udp.check_checksum:FALSE"));
        assert_eq!(seen[0].env, options.env);
    }
}
