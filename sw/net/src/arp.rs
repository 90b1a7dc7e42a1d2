//! ARP validation and message building (IPv4 over Ethernet only).

use crate::{
    be16, ETH_DST_OFFSET, ETH_FRAME_TOTAL_LEN, ETH_FRAME_TYPE_OFFSET, ETH_MIN_FRAME_LEN,
    ETH_SRC_OFFSET,
};

pub const ARP_FRAME_BASE: usize = ETH_FRAME_TOTAL_LEN;
pub const ARP_HW_TYPE_OFFSET: usize = 0;
pub const ARP_PROTO_TYPE_OFFSET: usize = 2;
pub const ARP_HW_ADDR_LENGTH_OFFSET: usize = 4;
pub const ARP_PROTO_ADDR_LENGTH_OFFSET: usize = 5;
pub const ARP_OPCODE_OFFSET: usize = 6;
pub const ARP_SRC_HW_ADDR_OFFSET: usize = 8;
pub const ARP_SRC_PROTO_ADDR_OFFSET: usize = 14;
pub const ARP_TGT_HW_ADDR_OFFSET: usize = 18;
pub const ARP_TGT_PROTO_ADDR_OFFSET: usize = 24;
pub const ARP_FRAME_TOTAL_LEN: usize = 28;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ArpOutcome {
    Reply,
    Request,
    Conflict,
    Invalid,
    Ignore,
    Fail,
}

#[derive(Copy, Clone, PartialEq)]
pub enum ArpMessage {
    Request = 1,
    Reply = 2,
}

/// Apply the validation rules in order; the first mismatch decides.
/// A target address other than ours is `Ignore`, not `Invalid`.
pub fn validate(frame: &[u8], our_ip: &[u8; 4]) -> ArpOutcome {
    if frame.len() < ARP_FRAME_BASE + ARP_FRAME_TOTAL_LEN {
        return ArpOutcome::Invalid;
    }
    let arp = &frame[ARP_FRAME_BASE..];
    if &arp[ARP_HW_TYPE_OFFSET..ARP_HW_TYPE_OFFSET + 2] != &[0x00, 0x01] {
        return ArpOutcome::Invalid;
    }
    if &arp[ARP_PROTO_TYPE_OFFSET..ARP_PROTO_TYPE_OFFSET + 2] != &[0x08, 0x00] {
        return ArpOutcome::Invalid;
    }
    if arp[ARP_HW_ADDR_LENGTH_OFFSET] != 6 {
        return ArpOutcome::Invalid;
    }
    if arp[ARP_PROTO_ADDR_LENGTH_OFFSET] != 4 {
        return ArpOutcome::Invalid;
    }
    if &arp[ARP_TGT_PROTO_ADDR_OFFSET..ARP_TGT_PROTO_ADDR_OFFSET + 4] != our_ip {
        return ArpOutcome::Ignore;
    }
    match be16(arp, ARP_OPCODE_OFFSET) {
        2 => {
            // a reply claiming our own address is another host conflicting
            if &arp[ARP_SRC_PROTO_ADDR_OFFSET..ARP_SRC_PROTO_ADDR_OFFSET + 4] == our_ip {
                ArpOutcome::Conflict
            } else {
                ArpOutcome::Reply
            }
        }
        1 => ArpOutcome::Request,
        _ => ArpOutcome::Ignore,
    }
}

/// Build a reply (unicast, addresses taken from the received frame) or a
/// request (broadcast, for `target_ip`) in `tx`. Returns the frame length,
/// padded to the Ethernet minimum.
pub fn build_message(
    tx: &mut [u8],
    rx: &[u8],
    mac: &[u8; 6],
    our_ip: &[u8; 4],
    msg_type: ArpMessage,
    target_ip: u32,
) -> Option<usize> {
    if tx.len() < ETH_MIN_FRAME_LEN {
        return None;
    }
    if msg_type == ArpMessage::Reply && rx.len() < ARP_FRAME_BASE + ARP_FRAME_TOTAL_LEN {
        return None;
    }
    // zeroing up front saves explicit stores for every zero-valued field
    for b in tx[..ETH_MIN_FRAME_LEN].iter_mut() {
        *b = 0;
    }

    match msg_type {
        ArpMessage::Reply => {
            tx[ETH_DST_OFFSET..ETH_DST_OFFSET + 6]
                .copy_from_slice(&rx[ETH_SRC_OFFSET..ETH_SRC_OFFSET + 6]);
        }
        ArpMessage::Request => {
            for b in tx[ETH_DST_OFFSET..ETH_DST_OFFSET + 6].iter_mut() {
                *b = 0xff;
            }
        }
    }
    tx[ETH_SRC_OFFSET..ETH_SRC_OFFSET + 6].copy_from_slice(mac);
    tx[ETH_FRAME_TYPE_OFFSET] = 0x08;
    tx[ETH_FRAME_TYPE_OFFSET + 1] = 0x06;

    let arp = &mut tx[ARP_FRAME_BASE..];
    arp[ARP_HW_TYPE_OFFSET + 1] = 0x01;
    arp[ARP_PROTO_TYPE_OFFSET] = 0x08;
    arp[ARP_HW_ADDR_LENGTH_OFFSET] = 6;
    arp[ARP_PROTO_ADDR_LENGTH_OFFSET] = 4;
    arp[ARP_OPCODE_OFFSET + 1] = msg_type as u8;
    arp[ARP_SRC_HW_ADDR_OFFSET..ARP_SRC_HW_ADDR_OFFSET + 6].copy_from_slice(mac);
    arp[ARP_SRC_PROTO_ADDR_OFFSET..ARP_SRC_PROTO_ADDR_OFFSET + 4].copy_from_slice(our_ip);

    match msg_type {
        ArpMessage::Reply => {
            arp[ARP_TGT_HW_ADDR_OFFSET..ARP_TGT_HW_ADDR_OFFSET + 6].copy_from_slice(
                &rx[ARP_FRAME_BASE + ARP_SRC_HW_ADDR_OFFSET
                    ..ARP_FRAME_BASE + ARP_SRC_HW_ADDR_OFFSET + 6],
            );
            arp[ARP_TGT_PROTO_ADDR_OFFSET..ARP_TGT_PROTO_ADDR_OFFSET + 4].copy_from_slice(
                &rx[ARP_FRAME_BASE + ARP_SRC_PROTO_ADDR_OFFSET
                    ..ARP_FRAME_BASE + ARP_SRC_PROTO_ADDR_OFFSET + 4],
            );
        }
        ArpMessage::Request => {
            // THA stays zero for a request
            arp[ARP_TGT_PROTO_ADDR_OFFSET..ARP_TGT_PROTO_ADDR_OFFSET + 4]
                .copy_from_slice(&target_ip.to_be_bytes());
        }
    }

    Some(ETH_MIN_FRAME_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUR_IP: [u8; 4] = [10, 0, 7, 2];
    const OUR_MAC: [u8; 6] = [0x06, 0x01, 0x02, 0x03, 0x04, 0x05];

    fn request_frame() -> [u8; 60] {
        let mut f = [0u8; 60];
        for b in f[ETH_DST_OFFSET..ETH_DST_OFFSET + 6].iter_mut() {
            *b = 0xff;
        }
        f[ETH_SRC_OFFSET..ETH_SRC_OFFSET + 6]
            .copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        f[ETH_FRAME_TYPE_OFFSET] = 0x08;
        f[ETH_FRAME_TYPE_OFFSET + 1] = 0x06;
        let arp = &mut f[ARP_FRAME_BASE..];
        arp[1] = 0x01; // ethernet
        arp[ARP_PROTO_TYPE_OFFSET] = 0x08;
        arp[ARP_HW_ADDR_LENGTH_OFFSET] = 6;
        arp[ARP_PROTO_ADDR_LENGTH_OFFSET] = 4;
        arp[ARP_OPCODE_OFFSET + 1] = 1;
        arp[ARP_SRC_HW_ADDR_OFFSET..ARP_SRC_HW_ADDR_OFFSET + 6]
            .copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        arp[ARP_SRC_PROTO_ADDR_OFFSET..ARP_SRC_PROTO_ADDR_OFFSET + 4]
            .copy_from_slice(&[10, 0, 7, 1]);
        arp[ARP_TGT_PROTO_ADDR_OFFSET..ARP_TGT_PROTO_ADDR_OFFSET + 4]
            .copy_from_slice(&OUR_IP);
        f
    }

    #[test]
    fn validation_rule_order() {
        let f = request_frame();
        assert_eq!(validate(&f, &OUR_IP), ArpOutcome::Request);

        let mut bad = f;
        bad[ARP_FRAME_BASE + 1] = 2; // not ethernet
        assert_eq!(validate(&bad, &OUR_IP), ArpOutcome::Invalid);

        let mut bad = f;
        bad[ARP_FRAME_BASE + ARP_HW_ADDR_LENGTH_OFFSET] = 8;
        assert_eq!(validate(&bad, &OUR_IP), ArpOutcome::Invalid);

        // addressed to someone else: ignored, not invalid
        let mut other = f;
        other[ARP_FRAME_BASE + ARP_TGT_PROTO_ADDR_OFFSET + 3] = 9;
        assert_eq!(validate(&other, &OUR_IP), ArpOutcome::Ignore);
    }

    #[test]
    fn reply_claiming_our_ip_is_a_conflict() {
        let mut f = request_frame();
        f[ARP_FRAME_BASE + ARP_OPCODE_OFFSET + 1] = 2;
        f[ARP_FRAME_BASE + ARP_SRC_PROTO_ADDR_OFFSET..ARP_FRAME_BASE + ARP_SRC_PROTO_ADDR_OFFSET + 4]
            .copy_from_slice(&OUR_IP);
        assert_eq!(validate(&f, &OUR_IP), ArpOutcome::Conflict);

        f[ARP_FRAME_BASE + ARP_SRC_PROTO_ADDR_OFFSET + 3] = 1;
        assert_eq!(validate(&f, &OUR_IP), ArpOutcome::Reply);
    }

    #[test]
    fn reply_frame_bytes_are_exact() {
        // end-to-end scenario: 60-byte request in, 64-byte reply out
        let rx = request_frame();
        let mut tx = [0u8; 2048];
        let size = build_message(&mut tx, &rx, &OUR_MAC, &OUR_IP, ArpMessage::Reply, 0).unwrap();
        assert_eq!(size, 64);
        assert_eq!(&tx[ETH_DST_OFFSET..6], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&tx[ETH_SRC_OFFSET..ETH_SRC_OFFSET + 6], &OUR_MAC);
        assert_eq!(&tx[ETH_FRAME_TYPE_OFFSET..ETH_FRAME_TYPE_OFFSET + 2], &[0x08, 0x06]);
        let arp = &tx[ARP_FRAME_BASE..];
        assert_eq!(&arp[..8], &[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x02]);
        assert_eq!(&arp[ARP_SRC_HW_ADDR_OFFSET..ARP_SRC_HW_ADDR_OFFSET + 6], &OUR_MAC);
        assert_eq!(&arp[ARP_SRC_PROTO_ADDR_OFFSET..ARP_SRC_PROTO_ADDR_OFFSET + 4], &OUR_IP);
        assert_eq!(
            &arp[ARP_TGT_HW_ADDR_OFFSET..ARP_TGT_HW_ADDR_OFFSET + 6],
            &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]
        );
        assert_eq!(
            &arp[ARP_TGT_PROTO_ADDR_OFFSET..ARP_TGT_PROTO_ADDR_OFFSET + 4],
            &[10, 0, 7, 1]
        );
        // padding region stays zero
        assert!(tx[ARP_FRAME_BASE + ARP_FRAME_TOTAL_LEN..64].iter().all(|b| *b == 0));
    }

    #[test]
    fn request_is_broadcast_with_zero_tha() {
        let rx = [0u8; 60];
        let mut tx = [0u8; 2048];
        let size = build_message(
            &mut tx,
            &rx,
            &OUR_MAC,
            &OUR_IP,
            ArpMessage::Request,
            0x0A00_0764,
        )
        .unwrap();
        assert_eq!(size, 64);
        assert!(tx[..6].iter().all(|b| *b == 0xff));
        let arp = &tx[ARP_FRAME_BASE..];
        assert_eq!(arp[ARP_OPCODE_OFFSET + 1], 1);
        assert!(arp[ARP_TGT_HW_ADDR_OFFSET..ARP_TGT_HW_ADDR_OFFSET + 6]
            .iter()
            .all(|b| *b == 0));
        assert_eq!(
            &arp[ARP_TGT_PROTO_ADDR_OFFSET..ARP_TGT_PROTO_ADDR_OFFSET + 4],
            &[10, 0, 7, 0x64]
        );
    }
}
