//! Frame containers: single-frame captures, annotation, merge, read-back

pub mod hexdump;
pub mod pcapng;
pub mod writer;

pub use hexdump::od_hex;
pub use pcapng::{parse_capture, read_capture, CapturedFrame};
pub use writer::{verify_merged, AggregateCapture, CaptureWriter};
