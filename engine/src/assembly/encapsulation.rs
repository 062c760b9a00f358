//! Encapsulation rule table
//!
//! A layer dump holds one protocol layer. The dissector is pointed at that
//! layer through an export-PDU capture (`-l 252 -P <dissector>`), but several
//! dissectors only find their payload boundary when the bytes the header
//! announces are actually there, and a few want surrounding layers. Each rule
//! pairs the text2pcap arguments with the frame synthesis for one protocol.

use thiserror::Error;

const ETHER_HEADER_LEN: usize = 14;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const VXLAN_HEADER_LEN: usize = 8;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_ICMP: u8 = 1;

/// Why synthesis of surrounding layers failed for a dump
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncapsulationError {
    #[error("{layer} header needs {needed} bytes, dump has {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{layer} {field} = {value} is smaller than the {minimum} header bytes it must cover")]
    InvalidLength {
        layer: &'static str,
        field: &'static str,
        value: usize,
        minimum: usize,
    },
}

/// Frame synthesis strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encapsulation {
    /// Ethernet header followed by a default IPv4/ICMP echo request
    EthernetWithIcmp,
    /// IPv4 header followed by `total_length - ihl*4` payload bytes
    Ipv4Payload,
    /// IPv6 header followed by `payload_length` payload bytes
    Ipv6Payload,
    /// VXLAN header followed by a default Ethernet/IPv4/ICMP inner frame
    VxlanWithInnerFrame,
    /// TCP header followed by `data_offset*4` payload bytes
    TcpPayload,
    /// UDP header followed by `length - 8` payload bytes
    UdpPayload,
    /// Bytes used unchanged
    Identity,
}

impl Encapsulation {
    /// Build the full frame for one layer dump
    pub fn apply(self, layer: &[u8]) -> Result<Vec<u8>, EncapsulationError> {
        match self {
            Self::Identity => Ok(layer.to_vec()),
            Self::EthernetWithIcmp => {
                require(layer, "Ethernet", ETHER_HEADER_LEN)?;
                let mut frame = layer.to_vec();
                frame.extend_from_slice(&default_ipv4_icmp());
                Ok(frame)
            }
            Self::Ipv4Payload => {
                require(layer, "IPv4", IPV4_MIN_HEADER_LEN)?;
                let header_len = usize::from(layer[0] & 0x0f) * 4;
                let total_len = usize::from(be16(layer, 2));
                if total_len < header_len {
                    return Err(EncapsulationError::InvalidLength {
                        layer: "IPv4",
                        field: "total length",
                        value: total_len,
                        minimum: header_len,
                    });
                }
                Ok(with_zero_payload(layer, total_len - header_len))
            }
            Self::Ipv6Payload => {
                require(layer, "IPv6", IPV6_HEADER_LEN)?;
                let payload_len = usize::from(be16(layer, 4));
                Ok(with_zero_payload(layer, payload_len))
            }
            Self::VxlanWithInnerFrame => {
                require(layer, "VXLAN", VXLAN_HEADER_LEN)?;
                let mut frame = layer.to_vec();
                frame.extend_from_slice(&default_ether_header());
                frame.extend_from_slice(&default_ipv4_icmp());
                Ok(frame)
            }
            Self::TcpPayload => {
                require(layer, "TCP", TCP_MIN_HEADER_LEN)?;
                let data_offset = usize::from(layer[12] >> 4);
                Ok(with_zero_payload(layer, data_offset * 4))
            }
            Self::UdpPayload => {
                require(layer, "UDP", UDP_HEADER_LEN)?;
                let length = usize::from(be16(layer, 4));
                if length < UDP_HEADER_LEN {
                    return Err(EncapsulationError::InvalidLength {
                        layer: "UDP",
                        field: "length",
                        value: length,
                        minimum: UDP_HEADER_LEN,
                    });
                }
                Ok(with_zero_payload(layer, length - UDP_HEADER_LEN))
            }
        }
    }
}

/// One row of the rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRule {
    /// Lowercase protocol name
    pub protocol: String,
    /// text2pcap arguments placing the frame in front of the dissector
    pub capture_args: String,
    pub encapsulation: Encapsulation,
}

impl ExportRule {
    /// text2pcap arguments split into argv form
    pub fn capture_argv(&self) -> Vec<String> {
        shlex::split(&self.capture_args).unwrap_or_else(|| {
            self.capture_args
                .split_whitespace()
                .map(String::from)
                .collect()
        })
    }

    /// Whether the protocol has a dedicated row in the table
    pub fn is_known(&self) -> bool {
        RULES.iter().any(|(name, _, _)| *name == self.protocol)
    }
}

const EXPORT_PDU: &str = "-F pcap -l 252 -P";

static RULES: &[(&str, &str, Encapsulation)] = &[
    ("eth", "-F pcap", Encapsulation::EthernetWithIcmp),
    ("ipv4", "-F pcap -l 252 -P ip", Encapsulation::Ipv4Payload),
    ("ipv6", "-F pcap -l 252 -P ipv6", Encapsulation::Ipv6Payload),
    ("vxlan", "-F pcap -l 252 -P vxlan", Encapsulation::VxlanWithInnerFrame),
    ("tcp", "-F pcap -l 252 -P tcp", Encapsulation::TcpPayload),
    ("udp", "-F pcap -l 252 -P udp", Encapsulation::UdpPayload),
    ("icmp", "-F pcap -l 252 -P icmp", Encapsulation::Identity),
    ("tpkt", "-F pcap -l 252 -P tpkt", Encapsulation::Identity),
    ("arp", "-F pcap -l 252 -P arp", Encapsulation::Identity),
    ("igmp", "-F pcap -l 252 -P igmp", Encapsulation::Identity),
    ("ntp", "-F pcap -l 252 -P ntp", Encapsulation::Identity),
    ("ppp", "-F pcap -l 252 -P ppp", Encapsulation::Identity),
    ("sip", "-F pcap -l 252 -P sip", Encapsulation::Identity),
    ("rtp", "-F pcap -l 252 -P rtp", Encapsulation::Identity),
    ("gre", "-F pcap -l 252 -P gre", Encapsulation::Identity),
    ("bgp", "-F pcap -l 252 -P bgp", Encapsulation::Identity),
    ("dhcp", "-F pcap -l 252 -P dhcp", Encapsulation::Identity),
    ("dccp", "-F pcap -l 252 -P dccp", Encapsulation::Identity),
    ("nbns", "-F pcap -l 252 -P nbns", Encapsulation::Identity),
    ("rip", "-F pcap -l 252 -P rip", Encapsulation::Identity),
    ("ospf", "-F pcap -l 252 -P ospf", Encapsulation::Identity),
    ("eap", "-F pcap -l 252 -P eap", Encapsulation::Identity),
    ("snmp", "-F pcap -l 252 -P snmp", Encapsulation::Identity),
    ("tftp", "-u 69,69", Encapsulation::Identity),
];

/// Rule for a protocol (case-insensitive). Unknown protocols keep their bytes
/// and are exported to the dissector of the same name.
pub fn rule_for(protocol: &str) -> ExportRule {
    let protocol = protocol.to_lowercase();
    match RULES.iter().find(|(name, _, _)| *name == protocol) {
        Some((name, args, encapsulation)) => ExportRule {
            protocol: name.to_string(),
            capture_args: args.to_string(),
            encapsulation: *encapsulation,
        },
        None => ExportRule {
            capture_args: format!("{EXPORT_PDU} {protocol}"),
            protocol,
            encapsulation: Encapsulation::Identity,
        },
    }
}

/// Protocols with a dedicated rule
pub fn known_protocols() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|(name, _, _)| *name)
}

fn require(layer: &[u8], name: &'static str, needed: usize) -> Result<(), EncapsulationError> {
    if layer.len() < needed {
        return Err(EncapsulationError::Truncated {
            layer: name,
            needed,
            available: layer.len(),
        });
    }
    Ok(())
}

fn be16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn with_zero_payload(layer: &[u8], payload_len: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(layer.len() + payload_len);
    frame.extend_from_slice(layer);
    frame.resize(layer.len() + payload_len, 0);
    frame
}

/// RFC 1071 internet checksum
fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = bytes
        .chunks(2)
        .map(|c| u32::from(u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Broadcast destination, zero source, IPv4 ethertype
fn default_ether_header() -> [u8; ETHER_HEADER_LEN] {
    let mut header = [0u8; ETHER_HEADER_LEN];
    header[..6].copy_from_slice(&[0xff; 6]);
    header[12..].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    header
}

/// Loopback IPv4 header carrying an ICMP echo request with id and seq 0
fn default_ipv4_icmp() -> Vec<u8> {
    let mut icmp = vec![8u8, 0, 0, 0, 0, 0, 0, 0];
    let icmp_sum = internet_checksum(&icmp);
    icmp[2..4].copy_from_slice(&icmp_sum.to_be_bytes());

    let total_len = (IPV4_MIN_HEADER_LEN + icmp.len()) as u16;
    let mut ip = vec![0u8; IPV4_MIN_HEADER_LEN];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[4..6].copy_from_slice(&1u16.to_be_bytes());
    ip[8] = 64;
    ip[9] = IPPROTO_ICMP;
    ip[12..16].copy_from_slice(&[127, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[127, 0, 0, 1]);
    let ip_sum = internet_checksum(&ip);
    ip[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    ip.extend_from_slice(&icmp);
    ip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(rule_for("UDP").encapsulation, Encapsulation::UdpPayload);
        assert_eq!(rule_for("Ipv4").capture_args, "-F pcap -l 252 -P ip");
        assert!(rule_for("tftp").is_known());
    }

    #[test]
    fn test_unknown_protocol_is_identity_export() {
        let rule = rule_for("Quic");
        assert_eq!(rule.protocol, "quic");
        assert_eq!(rule.encapsulation, Encapsulation::Identity);
        assert_eq!(rule.capture_argv(), vec!["-F", "pcap", "-l", "252", "-P", "quic"]);
        assert!(!rule.is_known());
    }

    #[test]
    fn test_tftp_uses_udp_ports() {
        assert_eq!(rule_for("tftp").capture_argv(), vec!["-u", "69,69"]);
    }

    #[test]
    fn test_udp_payload_follows_length_field() {
        let header = [0x04, 0xd2, 0x16, 0x2e, 0x00, 0x0c, 0x00, 0x00];
        let frame = Encapsulation::UdpPayload.apply(&header).unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[..8], &header);
        assert!(frame[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_udp_length_below_header_fails() {
        let header = [0, 1, 0, 2, 0x00, 0x04, 0, 0];
        let err = Encapsulation::UdpPayload.apply(&header).unwrap_err();
        assert!(matches!(err, EncapsulationError::InvalidLength { value: 4, .. }));
    }

    #[test]
    fn test_truncated_header_fails() {
        let err = Encapsulation::UdpPayload.apply(&[0, 1, 2]).unwrap_err();
        assert_eq!(
            err,
            EncapsulationError::Truncated {
                layer: "UDP",
                needed: 8,
                available: 3
            }
        );
        assert!(Encapsulation::Ipv6Payload.apply(&[0u8; 39]).is_err());
        assert!(Encapsulation::EthernetWithIcmp.apply(&[0u8; 13]).is_err());
    }

    #[test]
    fn test_ipv4_payload_excludes_header_and_options() {
        let mut header = vec![0u8; 24];
        header[0] = 0x46;
        header[2..4].copy_from_slice(&40u16.to_be_bytes());
        let frame = Encapsulation::Ipv4Payload.apply(&header).unwrap();
        assert_eq!(frame.len(), 24 + 16);
    }

    #[test]
    fn test_ipv4_total_length_below_header_fails() {
        let mut header = vec![0u8; 20];
        header[0] = 0x45;
        header[2..4].copy_from_slice(&10u16.to_be_bytes());
        assert!(Encapsulation::Ipv4Payload.apply(&header).is_err());
    }

    #[test]
    fn test_ipv6_and_tcp_payloads() {
        let mut v6 = vec![0u8; 40];
        v6[0] = 0x60;
        v6[4..6].copy_from_slice(&5u16.to_be_bytes());
        assert_eq!(Encapsulation::Ipv6Payload.apply(&v6).unwrap().len(), 45);

        let mut tcp = vec![0u8; 20];
        tcp[12] = 0x50;
        assert_eq!(Encapsulation::TcpPayload.apply(&tcp).unwrap().len(), 40);
    }

    #[test]
    fn test_default_ipv4_icmp_is_well_formed() {
        let packet = default_ipv4_icmp();
        assert_eq!(packet.len(), 28);
        assert_eq!(internet_checksum(&packet[..20]), 0);
        assert_eq!(internet_checksum(&packet[20..]), 0);
        assert_eq!(&packet[20..24], &[8, 0, 0xf7, 0xff]);
    }

    #[test]
    fn test_vxlan_wraps_inner_frame() {
        let vxlan = [0x08, 0, 0, 0, 0, 0, 0x01, 0];
        let frame = Encapsulation::VxlanWithInnerFrame.apply(&vxlan).unwrap();
        assert_eq!(frame.len(), 8 + 14 + 28);
        assert_eq!(&frame[8..14], &[0xff; 6]);
        assert_eq!(&frame[20..22], &[0x08, 0x00]);
    }

    #[test]
    fn test_identity_keeps_bytes() {
        assert_eq!(Encapsulation::Identity.apply(&[9, 9]).unwrap(), vec![9, 9]);
        assert_eq!(Encapsulation::Identity.apply(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_known_protocols_are_lowercase_and_unique() {
        let names: Vec<&str> = known_protocols().collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
        assert!(names.iter().all(|n| n.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())));
    }
}
