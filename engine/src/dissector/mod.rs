//! Dissector invocation and output parsing

pub mod invoker;
pub mod tshark;

pub use invoker::{dissector_protocol, inspect, DissectOptions, DissectionResult, DissectorInvoker};
pub use tshark::{parse_packets, LayerFindings, TsharkPacket};
