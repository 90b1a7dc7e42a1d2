//! LLDP advertisement builder (transmit only; received LLDP is dropped by
//! the packet filter). Carries the mandatory Chassis-ID/Port-ID/TTL TLVs
//! plus a port description, with the IPv4 address as text in the Port-ID.

use crate::{ipv4_ntoa, ETH_FRAME_TYPE_OFFSET, ETH_MIN_FRAME_LEN, ETH_SRC_OFFSET};

const LLDP_MULTICAST_MAC: [u8; 6] = [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e];

// TLV lead bytes (type in the upper 7 bits; our lengths never need bit 8)
const TLV_END: u8 = 0 << 1;
const TLV_CHASSIS_ID: u8 = 1 << 1;
const TLV_PORT_ID: u8 = 2 << 1;
const TLV_TTL: u8 = 3 << 1;
const TLV_PORT_DESCR: u8 = 4 << 1;

const CHASSIS_ID_SUBTYPE_MAC: u8 = 4;
const PORT_ID_SUBTYPE_NETWORK_ADDRESS: u8 = 4;

const LLDP_TTL_SECONDS: u16 = 120;

/// Build the advertisement into `tx`; returns the padded frame length
pub fn build_message(tx: &mut [u8], mac: &[u8; 6], ip: u32, eth_id: u8) -> Option<usize> {
    if tx.len() < 128 {
        return None;
    }
    for b in tx[..128].iter_mut() {
        *b = 0;
    }

    tx[..6].copy_from_slice(&LLDP_MULTICAST_MAC);
    tx[ETH_SRC_OFFSET..ETH_SRC_OFFSET + 6].copy_from_slice(mac);
    tx[ETH_FRAME_TYPE_OFFSET] = 0x88;
    tx[ETH_FRAME_TYPE_OFFSET + 1] = 0xcc;

    let mut at = 14;

    // chassis id: our MAC address
    tx[at] = TLV_CHASSIS_ID;
    tx[at + 1] = 7;
    tx[at + 2] = CHASSIS_ID_SUBTYPE_MAC;
    tx[at + 3..at + 9].copy_from_slice(mac);
    at += 9;

    // port id: the interface address as text
    let mut ip_str = [0u8; 16];
    let ip_len = ipv4_ntoa(&mut ip_str, ip);
    tx[at] = TLV_PORT_ID;
    tx[at + 1] = 1 + ip_len as u8;
    tx[at + 2] = PORT_ID_SUBTYPE_NETWORK_ADDRESS;
    tx[at + 3..at + 3 + ip_len].copy_from_slice(&ip_str[..ip_len]);
    at += 3 + ip_len;

    tx[at] = TLV_TTL;
    tx[at + 1] = 2;
    tx[at + 2..at + 4].copy_from_slice(&LLDP_TTL_SECONDS.to_be_bytes());
    at += 4;

    // port description, e.g. "skarab-eth-03"
    let mut descr = *b"skarab-eth-00";
    descr[11] = b'0' + (eth_id / 10);
    descr[12] = b'0' + (eth_id % 10);
    tx[at] = TLV_PORT_DESCR;
    tx[at + 1] = descr.len() as u8;
    tx[at + 2..at + 2 + descr.len()].copy_from_slice(&descr);
    at += 2 + descr.len();

    // end of LLDPDU
    tx[at] = TLV_END;
    tx[at + 1] = 0;
    at += 2;

    Some(core::cmp::max(at, ETH_MIN_FRAME_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertisement_carries_all_four_tlvs() {
        let mut tx = [0u8; 2048];
        let mac = [0x06, 0x01, 0x02, 0x03, 0x04, 0x05];
        let size = build_message(&mut tx, &mac, 0x0A00_0702, 3).unwrap();
        assert!(size >= ETH_MIN_FRAME_LEN);
        assert_eq!(&tx[..6], &LLDP_MULTICAST_MAC);
        assert_eq!(&tx[12..14], &[0x88, 0xcc]);

        // chassis id = MAC subtype 4
        assert_eq!(&tx[14..16], &[TLV_CHASSIS_ID, 7]);
        assert_eq!(tx[16], CHASSIS_ID_SUBTYPE_MAC);
        assert_eq!(&tx[17..23], &mac);

        // port id carries the dotted-quad address
        assert_eq!(tx[23], TLV_PORT_ID);
        let port_len = tx[24] as usize;
        assert_eq!(tx[25], PORT_ID_SUBTYPE_NETWORK_ADDRESS);
        assert_eq!(&tx[26..25 + port_len], b"10.0.7.2");

        // ttl then port description then end
        let at = 25 + port_len;
        assert_eq!(&tx[at..at + 4], &[TLV_TTL, 2, 0, 120]);
        let at = at + 4;
        assert_eq!(tx[at], TLV_PORT_DESCR);
        assert_eq!(&tx[at + 2..at + 2 + 13], b"skarab-eth-03");
    }
}
