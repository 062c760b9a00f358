//! Capture file reader
//!
//! Reads the merged capture back so post-merge invariants (frame count, one
//! annotation per frame, order) are checked against the file itself rather
//! than trusted. Handles pcapng in either byte order and classic pcap, which
//! carries no annotations.

use crate::error::{EngineError, EngineResult};
use std::path::Path;

const SHB_TYPE: u32 = 0x0A0D_0D0A;
const IDB_TYPE: u32 = 0x0000_0001;
const SPB_TYPE: u32 = 0x0000_0003;
const EPB_TYPE: u32 = 0x0000_0006;
const BYTE_ORDER_MAGIC: u32 = 0x1A2B_3C4D;

const OPT_END: u16 = 0;
const OPT_COMMENT: u16 = 1;

const PCAP_MAGIC_USEC: u32 = 0xA1B2_C3D4;
const PCAP_MAGIC_NSEC: u32 = 0xA1B2_3C4D;

/// One packet record as stored in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// 1-based position in the file
    pub number: usize,
    /// First comment attached to the packet
    pub annotation: Option<String>,
    /// Link type of the interface the packet belongs to
    pub link_type: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            Self::Little => u16::from_le_bytes(a),
            Self::Big => u16::from_be_bytes(a),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            Self::Little => u32::from_le_bytes(a),
            Self::Big => u32::from_be_bytes(a),
        }
    }
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

fn slice<'a>(bytes: &'a [u8], start: usize, len: usize, what: &str) -> EngineResult<&'a [u8]> {
    start
        .checked_add(len)
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| EngineError::malformed_capture(format!("truncated {what} at offset {start}")))
}

/// Read a capture file from disk
pub fn read_capture(path: &Path) -> EngineResult<Vec<CapturedFrame>> {
    let bytes = std::fs::read(path)?;
    parse_capture(&bytes)
}

/// Parse pcapng or classic pcap bytes
pub fn parse_capture(bytes: &[u8]) -> EngineResult<Vec<CapturedFrame>> {
    let head = slice(bytes, 0, 4, "file header")?;
    let le = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    if le == SHB_TYPE {
        return parse_pcapng(bytes);
    }
    for magic in [PCAP_MAGIC_USEC, PCAP_MAGIC_NSEC] {
        if le == magic {
            return parse_pcap(bytes, Endian::Little);
        }
        if le == magic.swap_bytes() {
            return parse_pcap(bytes, Endian::Big);
        }
    }
    Err(EngineError::malformed_capture(format!(
        "unrecognized file magic {le:#010x}"
    )))
}

fn parse_options(body: &[u8], endian: Endian) -> EngineResult<Option<String>> {
    let mut offset = 0;
    let mut comment = None;
    while offset + 4 <= body.len() {
        let code = endian.u16(&body[offset..]);
        let len = usize::from(endian.u16(&body[offset + 2..]));
        if code == OPT_END {
            break;
        }
        let value = slice(body, offset + 4, len, "option")?;
        if code == OPT_COMMENT && comment.is_none() {
            comment = Some(String::from_utf8_lossy(value).to_string());
        }
        offset += 4 + pad4(len);
    }
    Ok(comment)
}

fn parse_pcapng(bytes: &[u8]) -> EngineResult<Vec<CapturedFrame>> {
    let mut frames = Vec::new();
    let mut endian = Endian::Little;
    // Interface link types of the current section; each SHB starts a new list.
    let mut interfaces: Vec<(u16, u32)> = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let block_type_raw = slice(bytes, offset, 4, "block type")?;
        if u32::from_le_bytes([
            block_type_raw[0],
            block_type_raw[1],
            block_type_raw[2],
            block_type_raw[3],
        ]) == SHB_TYPE
        {
            let magic = slice(bytes, offset + 8, 4, "byte-order magic")?;
            endian = match u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]) {
                BYTE_ORDER_MAGIC => Endian::Little,
                m if m == BYTE_ORDER_MAGIC.swap_bytes() => Endian::Big,
                m => {
                    return Err(EngineError::malformed_capture(format!(
                        "bad byte-order magic {m:#010x}"
                    )))
                }
            };
            interfaces.clear();
        }

        let header = slice(bytes, offset, 8, "block header")?;
        let block_type = endian.u32(&header[0..]);
        let block_len = endian.u32(&header[4..]) as usize;
        if block_len < 12 || block_len % 4 != 0 {
            return Err(EngineError::malformed_capture(format!(
                "invalid block length {block_len} at offset {offset}"
            )));
        }
        let body = slice(bytes, offset + 8, block_len - 12, "block body")?;
        let trailer = slice(bytes, offset + block_len - 4, 4, "block trailer")?;
        if endian.u32(trailer) as usize != block_len {
            return Err(EngineError::malformed_capture(format!(
                "block length mismatch at offset {offset}"
            )));
        }

        match block_type {
            IDB_TYPE => {
                let fixed = slice(body, 0, 8, "interface description")?;
                interfaces.push((endian.u16(fixed), endian.u32(&fixed[4..])));
            }
            EPB_TYPE => {
                let fixed = slice(body, 0, 20, "enhanced packet header")?;
                let interface = endian.u32(fixed) as usize;
                let captured = endian.u32(&fixed[12..]) as usize;
                let data = slice(body, 20, captured, "packet data")?.to_vec();
                let options = body.get(20 + pad4(captured)..).unwrap_or(&[]);
                let link_type = interfaces.get(interface).map(|i| i.0).ok_or_else(|| {
                    EngineError::malformed_capture(format!("packet references unknown interface {interface}"))
                })?;
                frames.push(CapturedFrame {
                    number: frames.len() + 1,
                    annotation: parse_options(options, endian)?,
                    link_type,
                    data,
                });
            }
            SPB_TYPE => {
                let fixed = slice(body, 0, 4, "simple packet header")?;
                let original = endian.u32(fixed) as usize;
                let (link_type, snaplen) = interfaces.first().copied().ok_or_else(|| {
                    EngineError::malformed_capture("simple packet without interface")
                })?;
                let mut captured = original.min(body.len() - 4);
                if snaplen > 0 {
                    captured = captured.min(snaplen as usize);
                }
                frames.push(CapturedFrame {
                    number: frames.len() + 1,
                    annotation: None,
                    link_type,
                    data: body[4..4 + captured].to_vec(),
                });
            }
            _ => {}
        }

        offset += block_len;
    }

    Ok(frames)
}

fn parse_pcap(bytes: &[u8], endian: Endian) -> EngineResult<Vec<CapturedFrame>> {
    let header = slice(bytes, 0, 24, "pcap header")?;
    let link_type = (endian.u32(&header[20..]) & 0xffff) as u16;
    let mut frames = Vec::new();
    let mut offset = 24;
    while offset < bytes.len() {
        let record = slice(bytes, offset, 16, "record header")?;
        let captured = endian.u32(&record[8..]) as usize;
        let data = slice(bytes, offset + 16, captured, "record data")?.to_vec();
        frames.push(CapturedFrame {
            number: frames.len() + 1,
            annotation: None,
            link_type,
            data,
        });
        offset += 16 + captured;
    }
    Ok(frames)
}

#[cfg(test)]
fn block(block_type: u32, body: &[u8], big: bool) -> Vec<u8> {
    let w = |v: u32| if big { v.to_be_bytes() } else { v.to_le_bytes() };
    let len = (12 + body.len()) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(&w(block_type));
    out.extend_from_slice(&w(len));
    out.extend_from_slice(body);
    out.extend_from_slice(&w(len));
    out
}

/// Test-only pcapng encoder: one section, one link-type-252 interface.
#[cfg(test)]
pub(crate) fn build_pcapng(frames: &[(&[u8], Option<&str>)], big: bool) -> Vec<u8> {
    let w32 = |v: u32| if big { v.to_be_bytes() } else { v.to_le_bytes() };
    let w16 = |v: u16| if big { v.to_be_bytes() } else { v.to_le_bytes() };
    let mut shb = Vec::new();
    shb.extend_from_slice(&w32(BYTE_ORDER_MAGIC));
    shb.extend_from_slice(&w16(1));
    shb.extend_from_slice(&w16(0));
    shb.extend_from_slice(&[0xff; 8]);
    let mut out = block(SHB_TYPE, &shb, big);

    let mut idb = Vec::new();
    idb.extend_from_slice(&w16(252));
    idb.extend_from_slice(&w16(0));
    idb.extend_from_slice(&w32(0));
    out.extend(block(IDB_TYPE, &idb, big));

    for (data, comment) in frames {
        let mut epb = Vec::new();
        epb.extend_from_slice(&w32(0));
        epb.extend_from_slice(&w32(0));
        epb.extend_from_slice(&w32(0));
        epb.extend_from_slice(&w32(data.len() as u32));
        epb.extend_from_slice(&w32(data.len() as u32));
        epb.extend_from_slice(data);
        epb.resize(pad4(epb.len()), 0);
        if let Some(c) = comment {
            epb.extend_from_slice(&w16(OPT_COMMENT));
            epb.extend_from_slice(&w16(c.len() as u16));
            epb.extend_from_slice(c.as_bytes());
            epb.resize(pad4(epb.len()), 0);
            epb.extend_from_slice(&[0; 4]);
        }
        out.extend(block(EPB_TYPE, &epb, big));
    }
    out
}
