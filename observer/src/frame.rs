//! Edge decode of captured frames into addressing + payload. Only
//! Ethernet (with up to two VLAN tags) carrying IPv4/UDP is of interest;
//! anything else returns None and is ignored upstream.

use std::net::Ipv4Addr;

use bytes::Bytes;
use pathwatch_core::{FlowKey, ObservedDatagram};

const ETHER_HDR_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const IPPROTO_UDP: u8 = 17;
const UDP_HDR_LEN: usize = 8;

pub fn decode(frame: &[u8], ts_micros: u64) -> Option<ObservedDatagram> {
    if frame.len() < ETHER_HDR_LEN {
        return None;
    }
    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    let mut offset = ETHER_HDR_LEN;
    let mut tags = 0;
    while (ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ) && tags < 2 {
        if frame.len() < offset + 4 {
            return None;
        }
        ethertype = u16::from_be_bytes([frame[offset + 2], frame[offset + 3]]);
        offset += 4;
        tags += 1;
    }
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    decode_ipv4(&frame[offset..], ts_micros)
}

fn decode_ipv4(packet: &[u8], ts_micros: u64) -> Option<ObservedDatagram> {
    if packet.len() < 20 || packet[0] >> 4 != 4 {
        return None;
    }
    let ihl = ((packet[0] & 0x0f) as usize) * 4;
    if ihl < 20 || packet.len() < ihl {
        return None;
    }
    if packet[9] != IPPROTO_UDP {
        return None;
    }
    // Non-first fragments carry no UDP header.
    let frag = u16::from_be_bytes([packet[6], packet[7]]);
    if frag & 0x1fff != 0 {
        return None;
    }

    let src_addr = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst_addr = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

    let udp = &packet[ihl..];
    if udp.len() < UDP_HDR_LEN {
        return None;
    }
    let src_port = u16::from_be_bytes([udp[0], udp[1]]);
    let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len < UDP_HDR_LEN {
        return None;
    }
    // Snaplen may have truncated the capture; take what is there.
    let payload_end = udp_len.min(udp.len());
    let payload = Bytes::copy_from_slice(&udp[UDP_HDR_LEN..payload_end]);

    Some(ObservedDatagram {
        key: FlowKey::new(src_addr, dst_addr, src_port, dst_port),
        payload,
        ts_micros,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_frame(vlan: bool, proto: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; ETHER_HDR_LEN];
        if vlan {
            frame[12..14].copy_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
            frame.extend_from_slice(&[0x00, 0x64]); // VLAN 100
            frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        } else {
            frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        }

        let udp_len = UDP_HDR_LEN + payload.len();
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        let total_len = (20 + udp_len) as u16;
        ip[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip[8] = 64;
        ip[9] = proto;
        ip[12..16].copy_from_slice(&[203, 0, 113, 5]);
        ip[16..20].copy_from_slice(&[198, 51, 100, 7]);
        frame.extend_from_slice(&ip);

        frame.extend_from_slice(&40_000u16.to_be_bytes());
        frame.extend_from_slice(&443u16.to_be_bytes());
        frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0]); // checksum left to the kernel
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn decodes_plain_udp_frame() {
        let frame = udp_frame(false, IPPROTO_UDP, b"payload-bytes");
        let datagram = decode(&frame, 42).expect("decodable frame");
        assert_eq!(datagram.key.to_string(), "203.0.113.5:40000-198.51.100.7:443");
        assert_eq!(datagram.payload.as_ref(), b"payload-bytes");
        assert_eq!(datagram.ts_micros, 42);
    }

    #[test]
    fn decodes_vlan_tagged_frame() {
        let frame = udp_frame(true, IPPROTO_UDP, b"x");
        let datagram = decode(&frame, 0).expect("vlan frame");
        assert_eq!(datagram.payload.as_ref(), b"x");
    }

    #[test]
    fn ignores_non_udp_protocols() {
        let frame = udp_frame(false, 6, b"tcp-ish");
        assert!(decode(&frame, 0).is_none());
    }

    #[test]
    fn ignores_non_ipv4_ethertype() {
        let mut frame = udp_frame(false, IPPROTO_UDP, b"x");
        frame[12..14].copy_from_slice(&0x86dd_u16.to_be_bytes()); // IPv6
        assert!(decode(&frame, 0).is_none());
    }

    #[test]
    fn ignores_trailing_fragments() {
        let mut frame = udp_frame(false, IPPROTO_UDP, b"x");
        // fragment offset 8 within the IP header
        frame[ETHER_HDR_LEN + 6..ETHER_HDR_LEN + 8].copy_from_slice(&0x0001_u16.to_be_bytes());
        assert!(decode(&frame, 0).is_none());
    }

    #[test]
    fn ignores_truncated_frames() {
        let frame = udp_frame(false, IPPROTO_UDP, b"payload");
        for cut in [4, ETHER_HDR_LEN, ETHER_HDR_LEN + 10, ETHER_HDR_LEN + 22] {
            assert!(decode(&frame[..cut], 0).is_none(), "cut at {cut} must not decode");
        }
    }

    #[test]
    fn truncated_payload_is_clamped_to_capture() {
        let mut frame = udp_frame(false, IPPROTO_UDP, b"full-payload");
        frame.truncate(frame.len() - 4);
        let datagram = decode(&frame, 0).expect("still decodable");
        assert_eq!(datagram.payload.as_ref(), b"full-pay");
    }

    #[test]
    fn empty_udp_payload_decodes() {
        let frame = udp_frame(false, IPPROTO_UDP, b"");
        let datagram = decode(&frame, 0).expect("header-only datagram");
        assert!(datagram.payload.is_empty());
    }
}
