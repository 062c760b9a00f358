//! Hex text in the layout of `od -Ax -tx1 -v`, the input text2pcap expects

use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Render bytes as offset-prefixed hex lines followed by a closing offset line
pub fn od_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / BYTES_PER_LINE * 8 + 16);
    for (line, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "{:06x}", line * BYTES_PER_LINE);
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');
    }
    let _ = writeln!(out, "{:06x}", bytes.len());
    out
}
