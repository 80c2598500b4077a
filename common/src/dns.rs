//! Captive DNS: every name resolves to the access point.
//!
//! Only the wire handling lives here; the back-ends own the UDP socket and
//! call [`CaptiveDns::respond`] once per datagram.

use std::net::Ipv4Addr;

use log::debug;

pub const DNS_PORT: u16 = 53;
pub const MAX_DNS_PACKET: usize = 512;

const HEADER_LEN: usize = 12;
const ANSWER_LEN: usize = 16;
const FLAG_QR: u8 = 0x80;
const FLAG_AA: u8 = 0x04;
const FLAG_RD: u8 = 0x01;
const OPCODE_MASK: u8 = 0x78;
const TYPE_A: [u8; 2] = [0x00, 0x01];
const CLASS_IN: [u8; 2] = [0x00, 0x01];
// Compression pointer to the question name at offset 12.
const NAME_POINTER: [u8; 2] = [0xC0, 0x0C];

#[derive(Debug, Clone)]
pub struct CaptiveDns {
    answer: Ipv4Addr,
    ttl_secs: u32,
}

impl CaptiveDns {
    pub fn new(answer: Ipv4Addr, ttl_secs: u32) -> Self {
        Self { answer, ttl_secs }
    }

    /// Builds the reply datagram, or `None` when the packet should be dropped
    /// (truncated, a response, or not a standard query).
    pub fn respond(&self, query: &[u8]) -> Option<Vec<u8>> {
        if query.len() < HEADER_LEN || query.len() > MAX_DNS_PACKET {
            return None;
        }

        let flags = query[2];
        if flags & FLAG_QR != 0 || flags & OPCODE_MASK != 0 {
            return None;
        }

        let question_count = u16::from_be_bytes([query[4], query[5]]);
        if question_count == 0 {
            return None;
        }

        let question_end = question_end(query)?;

        let mut reply = Vec::with_capacity(question_end + ANSWER_LEN);
        reply.extend_from_slice(&query[0..2]);
        reply.push(FLAG_QR | FLAG_AA | (flags & FLAG_RD));
        reply.push(0x00);
        reply.extend_from_slice(&1_u16.to_be_bytes()); // QDCOUNT
        reply.extend_from_slice(&1_u16.to_be_bytes()); // ANCOUNT
        reply.extend_from_slice(&0_u16.to_be_bytes()); // NSCOUNT
        reply.extend_from_slice(&0_u16.to_be_bytes()); // ARCOUNT
        reply.extend_from_slice(&query[HEADER_LEN..question_end]);

        reply.extend_from_slice(&NAME_POINTER);
        reply.extend_from_slice(&TYPE_A);
        reply.extend_from_slice(&CLASS_IN);
        reply.extend_from_slice(&self.ttl_secs.to_be_bytes());
        reply.extend_from_slice(&4_u16.to_be_bytes());
        reply.extend_from_slice(&self.answer.octets());

        debug!("dns query answered with {}", self.answer);
        Some(reply)
    }
}

/// Offset just past the first question (name, type, class).
fn question_end(packet: &[u8]) -> Option<usize> {
    let mut pos = HEADER_LEN;
    loop {
        let label_len = usize::from(*packet.get(pos)?);
        if label_len == 0 {
            pos += 1;
            break;
        }
        // Questions never use compression; treat a pointer as malformed.
        if label_len & 0xC0 != 0 {
            return None;
        }
        pos += 1 + label_len;
    }

    let end = pos + 4;
    (end <= packet.len()).then_some(end)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn query(name: &str, qtype: u16) -> Vec<u8> {
        let mut packet = vec![0xBE, 0xEF, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        for label in name.split('.') {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.push(0);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&CLASS_IN);
        packet
    }

    #[test]
    fn answers_any_name_with_access_point() {
        let dns = CaptiveDns::new(Ipv4Addr::new(192, 168, 4, 1), 3_600);
        let request = query("connectivitycheck.gstatic.com", 1);

        let reply = dns.respond(&request).unwrap();

        assert_eq!(&reply[0..2], &[0xBE, 0xEF]);
        assert_eq!(reply[2], 0x85);
        assert_eq!(&reply[4..12], &[0, 1, 0, 1, 0, 0, 0, 0]);
        assert_eq!(&reply[12..request.len()], &request[12..]);

        let answer = &reply[request.len()..];
        assert_eq!(
            answer,
            &[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0x0E, 0x10, 0, 4, 192, 168, 4, 1]
        );
    }

    #[test]
    fn extra_trailing_sections_are_dropped() {
        let dns = CaptiveDns::new(Ipv4Addr::new(10, 0, 0, 1), 60);
        let mut request = query("example.com", 28);
        request[11] = 1; // ARCOUNT, e.g. an EDNS OPT record
        request.extend_from_slice(&[0, 0, 41, 16, 0, 0, 0, 0, 0, 0, 0]);

        let reply = dns.respond(&request).unwrap();

        assert_eq!(&reply[10..12], &[0, 0]);
        assert_eq!(reply.len(), request.len() - 11 + ANSWER_LEN);
    }

    #[test]
    fn ignores_responses_and_other_opcodes() {
        let dns = CaptiveDns::new(Ipv4Addr::new(192, 168, 4, 1), 60);

        let mut response = query("example.com", 1);
        response[2] |= FLAG_QR;
        assert!(dns.respond(&response).is_none());

        let mut status = query("example.com", 1);
        status[2] = 0x10; // opcode 2
        assert!(dns.respond(&status).is_none());
    }

    #[test]
    fn ignores_truncated_packets() {
        let dns = CaptiveDns::new(Ipv4Addr::new(192, 168, 4, 1), 60);
        let request = query("example.com", 1);

        assert!(dns.respond(&request[..8]).is_none());
        assert!(dns.respond(&request[..request.len() - 2]).is_none());
    }
}
