//! Scripted stand-in for the Wireshark command-line tools.
//!
//! text2pcap, editcap and mergecap write real pcapng files so the engine's
//! post-merge checks run against actual bytes. tshark reads the capture back
//! and renders JSON from a per-test script. Nothing here needs Wireshark.

#![allow(dead_code)]

use frame_engine::capture::read_capture;
use frame_engine::{EngineResult, ToolInvocation, ToolOutput, ToolRunner};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Mutex;

/// Builds the tshark layer tree for (annotation, frame bytes)
pub type DissectorScript = Box<dyn Fn(&str, &[u8]) -> Value + Send + Sync>;

/// Injected misbehaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The named tool exits with status 2
    Exit(&'static str),
    /// editcap silently drops the comment of this dump id
    DropComment(String),
    /// mergecap writes the units in reverse order
    ReverseMerge,
    /// The checker is killed by a signal
    CheckerSignal,
}

pub struct FakeToolchain {
    script: DissectorScript,
    faults: Vec<Fault>,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl FakeToolchain {
    pub fn new(script: DissectorScript) -> Self {
        Self {
            script,
            faults: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, tool: &str) -> usize {
        self.calls().iter().filter(|c| c.tool_name() == tool).count()
    }

    fn text2pcap(&self, inv: &ToolInvocation) -> ToolOutput {
        let text = String::from_utf8_lossy(inv.stdin.as_deref().unwrap_or(&[])).to_string();
        let mut bytes = Vec::new();
        for line in text.lines() {
            for token in line.split_whitespace().skip(1) {
                bytes.push(u8::from_str_radix(token, 16).unwrap());
            }
        }
        let out = inv.args.last().unwrap();
        std::fs::write(out, write_pcapng(&[(bytes, None)])).unwrap();
        ok(Vec::new())
    }

    fn editcap(&self, inv: &ToolInvocation) -> ToolOutput {
        let args = &inv.args;
        let flag = args.iter().position(|a| a == "-a").unwrap();
        let (_, comment) = args[flag + 1].split_once(':').unwrap();
        let input = &args[args.len() - 2];
        let output = &args[args.len() - 1];

        let keep = !self
            .faults
            .iter()
            .any(|f| matches!(f, Fault::DropComment(id) if id == comment));
        let frames: Vec<(Vec<u8>, Option<String>)> = read_capture(Path::new(input))
            .unwrap()
            .into_iter()
            .map(|f| (f.data, keep.then(|| comment.to_string())))
            .collect();
        std::fs::write(output, write_pcapng(&frames)).unwrap();
        ok(Vec::new())
    }

    fn mergecap(&self, inv: &ToolInvocation) -> ToolOutput {
        let args = &inv.args;
        let w = args.iter().position(|a| a == "-w").unwrap();
        let output = &args[w + 1];
        let mut units: Vec<&String> = args[w + 2..].iter().collect();
        if self.faults.contains(&Fault::ReverseMerge) {
            units.reverse();
        }
        let mut frames = Vec::new();
        for unit in units {
            for f in read_capture(Path::new(unit)).unwrap() {
                frames.push((f.data, f.annotation));
            }
        }
        std::fs::write(output, write_pcapng(&frames)).unwrap();
        ok(Vec::new())
    }

    fn tshark(&self, inv: &ToolInvocation) -> ToolOutput {
        let r = inv.args.iter().position(|a| a == "-r").unwrap();
        let packets: Vec<Value> = read_capture(Path::new(&inv.args[r + 1]))
            .unwrap()
            .into_iter()
            .map(|f| {
                let annotation = f.annotation.clone().unwrap_or_default();
                let mut layers = (self.script)(&annotation, &f.data);
                let frame = json!({ "frame.number": f.number.to_string(), "frame.comment": annotation });
                if let Some(map) = layers.as_object_mut() {
                    map.insert("frame".to_string(), frame);
                }
                json!({ "_index": "packets-test", "_type": "doc", "_score": null, "_source": { "layers": layers } })
            })
            .collect();
        ok(serde_json::to_vec(&packets).unwrap())
    }

    fn checker(&self, inv: &ToolInvocation) -> ToolOutput {
        if self.faults.contains(&Fault::CheckerSignal) {
            return ToolOutput {
                status: None,
                stdout: Vec::new(),
                stderr: "Killed".to_string(),
            };
        }
        let path = Path::new(&inv.args[0]);
        let bytes = std::fs::read(path).unwrap();
        if bytes.len() >= 8 {
            ok(b"Validation ACCEPTED\n".to_vec())
        } else {
            ToolOutput {
                status: Some(1),
                stdout: b"Validation failed\n".to_vec(),
                stderr: "header: not enough data\n".to_string(),
            }
        }
    }
}

impl ToolRunner for FakeToolchain {
    fn run(&self, invocation: &ToolInvocation) -> EngineResult<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let tool = invocation.tool_name();
        if self.faults.iter().any(|f| matches!(f, Fault::Exit(t) if *t == tool)) {
            return Ok(ToolOutput {
                status: Some(2),
                stdout: Vec::new(),
                stderr: format!("{tool}: simulated failure"),
            });
        }
        Ok(match tool.as_str() {
            "text2pcap" => self.text2pcap(invocation),
            "editcap" => self.editcap(invocation),
            "mergecap" => self.mergecap(invocation),
            "tshark" => self.tshark(invocation),
            "checker" => self.checker(invocation),
            other => panic!("unexpected tool {other}"),
        })
    }
}

fn ok(stdout: Vec<u8>) -> ToolOutput {
    ToolOutput {
        status: Some(0),
        stdout,
        stderr: String::new(),
    }
}

fn block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let len = (12 + body.len()) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(&block_type.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&len.to_le_bytes());
    out
}

fn pad(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

/// Little-endian pcapng with one export-PDU interface
pub fn write_pcapng(frames: &[(Vec<u8>, Option<String>)]) -> Vec<u8> {
    let mut shb = Vec::new();
    shb.extend_from_slice(&0x1A2B_3C4Du32.to_le_bytes());
    shb.extend_from_slice(&1u16.to_le_bytes());
    shb.extend_from_slice(&0u16.to_le_bytes());
    shb.extend_from_slice(&(-1i64).to_le_bytes());
    let mut out = block(0x0A0D_0D0A, &shb);

    let mut idb = Vec::new();
    idb.extend_from_slice(&252u16.to_le_bytes());
    idb.extend_from_slice(&0u16.to_le_bytes());
    idb.extend_from_slice(&0u32.to_le_bytes());
    out.extend(block(1, &idb));

    for (data, comment) in frames {
        let mut epb = Vec::new();
        for v in [0u32, 0, 0, data.len() as u32, data.len() as u32] {
            epb.extend_from_slice(&v.to_le_bytes());
        }
        epb.extend_from_slice(data);
        pad(&mut epb);
        if let Some(c) = comment {
            epb.extend_from_slice(&1u16.to_le_bytes());
            epb.extend_from_slice(&(c.len() as u16).to_le_bytes());
            epb.extend_from_slice(c.as_bytes());
            pad(&mut epb);
            epb.extend_from_slice(&[0; 4]);
        }
        out.extend(block(6, &epb));
    }
    out
}

/// Well-formed UDP frames decode; frames shorter than a UDP header do not.
/// Annotations containing `edge` carry an Error diagnostic and those
/// containing `trailer` a malformation marker.
pub fn udp_script() -> DissectorScript {
    Box::new(|annotation: &str, data: &[u8]| {
        if data.len() < 8 {
            return json!({ "data": { "data.data": "00", "data.len": data.len().to_string() } });
        }
        let mut udp = json!({
            "udp.srcport": u16::from_be_bytes([data[0], data[1]]).to_string(),
            "udp.dstport": u16::from_be_bytes([data[2], data[3]]).to_string(),
            "udp.length": u16::from_be_bytes([data[4], data[5]]).to_string()
        });
        if annotation.contains("edge") {
            udp["udp.length_tree"] = json!({
                "_ws.expert": {
                    "_ws.expert.message": "Bad length value",
                    "_ws.expert.severity": "8388608",
                    "_ws.expert.group": "117440512"
                }
            });
        }
        let mut layers = json!({ "udp": udp });
        if annotation.contains("trailer") {
            layers["_ws.malformed"] = json!({ "_ws.expert": { "_ws.expert.severity": "8388608" } });
        }
        layers
    })
}

/// Write `(file name, bytes)` dumps into `dir`
pub fn write_dumps(dir: &Path, dumps: &[(&str, &[u8])]) {
    for (name, bytes) in dumps {
        std::fs::write(dir.join(name), bytes).unwrap();
    }
}

/// Write a label store in record form
pub fn write_labels(path: &Path, labels: &[(&str, bool, &str)]) {
    let mut map = serde_json::Map::new();
    for (id, accepted, hint) in labels {
        map.insert(
            id.to_string(),
            json!({ "accepted": accepted.to_string(), "hint": hint }),
        );
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(map)).unwrap()).unwrap();
}

pub const GOOD_UDP: &[u8] = &[0x00, 0x35, 0x00, 0x35, 0x00, 0x0c, 0x00, 0x00];
pub const SHORT_UDP: &[u8] = &[0x00, 0x35, 0x00];
