#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
//! Polled, zero-copy IP stack for the board control plane.
//!
//! One [`Interface`] per physical ethernet link, each with caller-owned
//! receive and transmit buffers. The main loop fills the receive buffer from
//! the MAC core, runs [`Interface::recv_packet_filter`] to classify the
//! frame, and invokes the matching builder; builders stage their response in
//! the transmit buffer and record its size in `msg_size`.
//!
//! Protocols handled: ARP, IPv4, ICMP echo, UDP, a DHCP client, IGMPv2
//! reports/leaves, LLDP transmit, and the UDP control protocol demux.
//! All multi-byte fields on the wire are network byte order.

#[macro_use]
extern crate static_assertions;

pub mod arp;
pub mod dhcp;
pub mod filter;
pub mod hostname;
pub mod icmp;
pub mod igmp;
pub mod lldp;
pub mod prng;
pub mod timers;

use dhcp::{DhcpClient, DhcpRx};
use filter::{Counter, Counters, PacketFilter};
use hostname::Hostname;

/// Interface object magic; installed by `Interface::new`, checked by builders
pub const IF_MAGIC: u32 = 0xAABB_CCDD;

pub const IF_RX_MIN_BUFFER_SIZE: usize = 1500;
pub const IF_TX_MIN_BUFFER_SIZE: usize = 1024;

// Ethernet II frame offsets
pub const ETH_DST_OFFSET: usize = 0;
pub const ETH_SRC_OFFSET: usize = 6;
pub const ETH_FRAME_TYPE_OFFSET: usize = 12;
pub const ETH_FRAME_TOTAL_LEN: usize = 14;

/// Shortest frame we will hand to hardware; zero padding supplied by builders
pub const ETH_MIN_FRAME_LEN: usize = 64;

// IPv4 header offsets (minimum 20-byte header assumed on receive)
pub const IP_FRAME_BASE: usize = ETH_FRAME_TOTAL_LEN;
pub const IP_V_HIL_OFFSET: usize = 0;
pub const IP_TOS_OFFSET: usize = 1;
pub const IP_TLEN_OFFSET: usize = 2;
pub const IP_ID_OFFSET: usize = 4;
pub const IP_FLAG_FRAG_OFFSET: usize = 6;
pub const IP_TTL_OFFSET: usize = 8;
pub const IP_PROT_OFFSET: usize = 9;
pub const IP_CHKSM_OFFSET: usize = 10;
pub const IP_SRC_OFFSET: usize = 12;
pub const IP_DST_OFFSET: usize = 16;
pub const IP_FRAME_TOTAL_LEN: usize = 20;

// UDP header offsets relative to the UDP frame base
pub const UDP_FRAME_BASE: usize = IP_FRAME_BASE + IP_FRAME_TOTAL_LEN;
pub const UDP_SRC_PORT_OFFSET: usize = 0;
pub const UDP_DST_PORT_OFFSET: usize = 2;
pub const UDP_ULEN_OFFSET: usize = 4;
pub const UDP_CHKSM_OFFSET: usize = 6;
pub const UDP_FRAME_TOTAL_LEN: usize = 8;
pub const UDP_PAYLOAD_BASE: usize = UDP_FRAME_BASE + UDP_FRAME_TOTAL_LEN;

pub const ETHER_TYPE_ARP: u16 = 0x0806;
pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_LLDP: u16 = 0x88cc;

pub const IPV4_TYPE_ICMP: u8 = 0x01;
pub const IPV4_TYPE_IGMP: u8 = 0x02;
pub const IPV4_TYPE_TCP: u8 = 0x06;
pub const IPV4_TYPE_UDP: u8 = 0x11;
pub const IPV4_TYPE_PIM: u8 = 0x67;

pub const UDP_CONTROL_PORT: u16 = 0x7778;
pub const BOOTP_CLIENT_PORT: u16 = 68;
pub const BOOTP_SERVER_PORT: u16 = 67;

// a control response never outgrows the transmit buffer minimum
const_assert!(dhcp::DHCP_FRAME_LEN <= IF_TX_MIN_BUFFER_SIZE);
const_assert!(ETH_MIN_FRAME_LEN <= IF_TX_MIN_BUFFER_SIZE);

/// Shared result vocabulary for stack operations
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Outcome {
    Ok,
    Fail,
    Invalid,
    Ignore,
    Conflict,
}

/// RFC 1071 one's-complement accumulation over `data`, starting from `seed`.
/// Odd trailing bytes are padded with a zero low byte. Callers fold with
/// [`checksum_fold`].
pub fn checksum_sum(seed: u32, data: &[u8]) -> u32 {
    let mut sum = seed;
    let mut chunks = data.chunks_exact(2);
    for c in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([c[0], c[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Fold carries and complement; 0x0000 result means a valid verification sum
pub fn checksum_fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// IPv4 header checksum over an outbound frame, skipping the checksum field
pub fn ipv4_header_checksum(frame: &[u8]) -> u16 {
    let ihl = (frame[IP_FRAME_BASE] & 0x0f) as usize * 4;
    let pre = &frame[IP_FRAME_BASE..IP_FRAME_BASE + IP_CHKSM_OFFSET];
    let post = &frame[IP_FRAME_BASE + IP_CHKSM_OFFSET + 2..IP_FRAME_BASE + ihl];
    checksum_fold(checksum_sum(checksum_sum(0, pre), post))
}

/// UDP checksum over the pseudo header and datagram of an outbound frame.
/// Assumes the minimum IP header and a zeroed checksum field.
pub fn ipv4_udp_checksum(frame: &[u8]) -> u16 {
    let udp_len = u16::from_be_bytes([
        frame[UDP_FRAME_BASE + UDP_ULEN_OFFSET],
        frame[UDP_FRAME_BASE + UDP_ULEN_OFFSET + 1],
    ]) as usize;
    let pseudo = &frame[IP_FRAME_BASE + IP_SRC_OFFSET..IP_FRAME_BASE + IP_DST_OFFSET + 4];
    let mut sum = checksum_sum(IPV4_TYPE_UDP as u32 + udp_len as u32, pseudo);
    sum = checksum_sum(sum, &frame[UDP_FRAME_BASE..UDP_FRAME_BASE + UDP_CHKSM_OFFSET]);
    sum = checksum_sum(sum, &frame[UDP_FRAME_BASE + UDP_CHKSM_OFFSET + 2..UDP_FRAME_BASE + udp_len]);
    checksum_fold(sum)
}

/// Write dotted-decimal `ip` into `buf`, returning the string length
pub fn ipv4_ntoa(buf: &mut [u8; 16], ip: u32) -> usize {
    let mut at = 0;
    for (i, octet) in ip.to_be_bytes().iter().enumerate() {
        if i > 0 {
            buf[at] = b'.';
            at += 1;
        }
        let mut digits = [0u8; 3];
        let mut n = *octet;
        let mut count = 0;
        loop {
            digits[count] = b'0' + (n % 10);
            n /= 10;
            count += 1;
            if n == 0 {
                break;
            }
        }
        while count > 0 {
            count -= 1;
            buf[at] = digits[count];
            at += 1;
        }
    }
    at
}

pub fn be16(frame: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}

pub fn be32(frame: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        frame[offset],
        frame[offset + 1],
        frame[offset + 2],
        frame[offset + 3],
    ])
}

/// One physical ethernet link: addresses, buffers, counters and the embedded
/// DHCP client. Created once at boot and never destroyed.
pub struct Interface<'a> {
    magic: u32,
    pub rx_buf: &'a mut [u8],
    pub tx_buf: &'a mut [u8],
    /// bytes staged in the transmit buffer, 0 when nothing is pending
    pub msg_size: usize,
    /// 32-bit words most recently read into the receive buffer
    pub num_words_read: usize,

    pub link_up: bool,
    pub rx_active: bool,

    pub mac: [u8; 6],
    pub hostname: Hostname,

    pub ip_addr: [u8; 4],
    pub ip: u32,
    pub netmask_addr: [u8; 4],
    pub netmask: u32,
    pub gateway: u32,

    pub eth_id: u8,
    pub subnet: u32,

    pub multicast_ip: u32,
    pub multicast_mask: u32,

    /// rolling IP identification for outbound datagrams
    pub ip_id: u16,

    pub dhcp: DhcpClient,

    pub arp_requests_enabled: bool,
    pub arp_processing_enabled: bool,
    /// cycles through the subnet hosts for gratuitous ARP requests
    pub current_arp_target: u8,

    pub counters: Counters,
}

impl<'a> Interface<'a> {
    /// Bind an interface to its buffers and MAC address. Fails when a buffer
    /// is under the protocol minimums.
    pub fn new(
        eth_id: u8,
        rx_buf: &'a mut [u8],
        tx_buf: &'a mut [u8],
        mac: [u8; 6],
    ) -> Result<Interface<'a>, Outcome> {
        if rx_buf.len() < IF_RX_MIN_BUFFER_SIZE {
            return Err(Outcome::Fail);
        }
        if tx_buf.len() < IF_TX_MIN_BUFFER_SIZE {
            return Err(Outcome::Fail);
        }
        for b in rx_buf.iter_mut() {
            *b = 0;
        }
        for b in tx_buf.iter_mut() {
            *b = 0;
        }
        let mut dhcp = DhcpClient::new();
        if dhcp.init(&mac) != Outcome::Ok {
            return Err(Outcome::Fail);
        }
        Ok(Interface {
            magic: IF_MAGIC,
            rx_buf,
            tx_buf,
            msg_size: 0,
            num_words_read: 0,
            link_up: false,
            rx_active: false,
            mac,
            hostname: Hostname::new_blank(),
            ip_addr: [0; 4],
            ip: 0,
            netmask_addr: [0; 4],
            netmask: 0,
            gateway: 0,
            eth_id,
            subnet: 0,
            multicast_ip: 0,
            multicast_mask: 0,
            ip_id: 1,
            dhcp,
            arp_requests_enabled: true,
            arp_processing_enabled: true,
            current_arp_target: 0,
            counters: Counters::new_all_zero(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.magic == IF_MAGIC
    }

    /// Adopt an address/mask pair (manual configuration or a DHCP lease)
    pub fn configure(&mut self, ip: u32, mask: u32) {
        self.ip = ip;
        self.ip_addr = ip.to_be_bytes();
        self.netmask = mask;
        self.netmask_addr = mask.to_be_bytes();
        self.subnet = ip & mask;
    }

    pub fn set_hostname(&mut self, hostname: Hostname) {
        self.hostname = hostname;
        self.dhcp.set_hostname(&self.hostname);
    }

    /// Project the link bit for this interface out of a status register value
    pub fn update_link_status(&mut self, link_reg: u32) {
        self.link_up = (link_reg >> (self.eth_id * 4)) & 0x1 != 0;
    }

    /// Length in bytes of the frame currently in the receive buffer
    pub fn rx_frame_len(&self) -> usize {
        core::cmp::min(self.num_words_read * 4, self.rx_buf.len())
    }

    /// Classify the frame in the receive buffer. The only side effects are
    /// counter increments and DHCP client message capture.
    pub fn recv_packet_filter(&mut self) -> PacketFilter {
        self.counters.incr(Counter::RxTotal);
        let len = self.rx_frame_len();
        if len < ETH_FRAME_TOTAL_LEN {
            self.counters.incr(Counter::RxEthUnknown);
            return PacketFilter::Noise;
        }
        match be16(self.rx_buf, ETH_FRAME_TYPE_OFFSET) {
            ETHER_TYPE_ARP => self.filter_arp(len),
            ETHER_TYPE_IPV4 => self.filter_ipv4(len),
            ETHER_TYPE_LLDP => {
                // we only emit LLDP
                self.counters.incr(Counter::RxEthLldp);
                self.counters.incr(Counter::RxEthLldpDropped);
                PacketFilter::LldpUnhandled
            }
            _ => {
                self.counters.incr(Counter::RxEthUnknown);
                PacketFilter::EthUnknown
            }
        }
    }

    fn filter_arp(&mut self, len: usize) -> PacketFilter {
        self.counters.incr(Counter::RxEthArp);
        match arp::validate(&self.rx_buf[..len], &self.ip_addr) {
            arp::ArpOutcome::Reply => {
                self.counters.incr(Counter::RxArpReply);
                PacketFilter::ArpReply
            }
            arp::ArpOutcome::Request => {
                self.counters.incr(Counter::RxArpRequest);
                PacketFilter::ArpRequest
            }
            arp::ArpOutcome::Conflict => {
                self.counters.incr(Counter::RxArpConflict);
                PacketFilter::ArpConflict
            }
            arp::ArpOutcome::Invalid | arp::ArpOutcome::Ignore | arp::ArpOutcome::Fail => {
                self.counters.incr(Counter::RxArpInvalid);
                PacketFilter::ArpInvalid
            }
        }
    }

    fn filter_ipv4(&mut self, len: usize) -> PacketFilter {
        self.counters.incr(Counter::RxEthIp);
        match self.check_ipv4_header(len) {
            Outcome::Ok => (),
            Outcome::Conflict => {
                // header arithmetic fine, checksum mismatch
                self.counters.incr(Counter::RxIpChecksumErrors);
                return PacketFilter::IpChecksumError;
            }
            _ => {
                self.counters.incr(Counter::RxIpUnknown);
                return PacketFilter::IpUnknown;
            }
        }
        match self.rx_buf[IP_FRAME_BASE + IP_PROT_OFFSET] {
            IPV4_TYPE_ICMP => {
                self.counters.incr(Counter::RxIpIcmp);
                match icmp::validate_echo_request(&self.rx_buf[..len], self.ip) {
                    Outcome::Ok => PacketFilter::Icmp,
                    _ => {
                        self.counters.incr(Counter::RxIcmpInvalid);
                        PacketFilter::IcmpInvalid
                    }
                }
            }
            IPV4_TYPE_IGMP => {
                // report/leave transmitter only; queries are not processed
                self.counters.incr(Counter::RxIpIgmp);
                self.counters.incr(Counter::RxIpIgmpDropped);
                PacketFilter::IgmpUnhandled
            }
            IPV4_TYPE_TCP => {
                self.counters.incr(Counter::RxIpTcp);
                self.counters.incr(Counter::RxIpTcpDropped);
                PacketFilter::TcpUnhandled
            }
            IPV4_TYPE_PIM => {
                self.counters.incr(Counter::RxIpPim);
                self.counters.incr(Counter::RxIpPimDropped);
                PacketFilter::PimUnhandled
            }
            IPV4_TYPE_UDP => self.filter_udp(len),
            _ => {
                self.counters.incr(Counter::RxIpUnknown);
                PacketFilter::IpUnknown
            }
        }
    }

    fn filter_udp(&mut self, len: usize) -> PacketFilter {
        self.counters.incr(Counter::RxIpUdp);
        match check_udp_header(&self.rx_buf[..len]) {
            Outcome::Ok => (),
            Outcome::Conflict => {
                self.counters.incr(Counter::RxUdpChecksumErrors);
                return PacketFilter::UdpChecksumError;
            }
            _ => {
                self.counters.incr(Counter::RxUdpUnknown);
                return PacketFilter::UdpUnknown;
            }
        }
        let src_port = be16(self.rx_buf, UDP_FRAME_BASE + UDP_SRC_PORT_OFFSET);
        let dst_port = be16(self.rx_buf, UDP_FRAME_BASE + UDP_DST_PORT_OFFSET);
        if dst_port == BOOTP_CLIENT_PORT && src_port == BOOTP_SERVER_PORT {
            self.counters.incr(Counter::RxUdpDhcp);
            return match self.dhcp.handle_frame(&self.rx_buf[..len]) {
                DhcpRx::Handled => PacketFilter::Dhcp,
                DhcpRx::Invalid => {
                    self.counters.incr(Counter::RxDhcpInvalid);
                    PacketFilter::DhcpInvalid
                }
                DhcpRx::Ignore => {
                    // likely another node's broadcast exchange with the server
                    self.counters.incr(Counter::RxDhcpUnknown);
                    PacketFilter::DhcpUnknown
                }
            };
        }
        if dst_port == UDP_CONTROL_PORT {
            self.counters.incr(Counter::RxUdpCtrl);
            return PacketFilter::Control;
        }
        self.counters.incr(Counter::RxUdpUnknown);
        PacketFilter::UdpUnknown
    }

    /// Outcome::Ok for a well-formed minimum header addressed to us,
    /// Outcome::Conflict for a checksum mismatch, Outcome::Invalid otherwise
    fn check_ipv4_header(&self, len: usize) -> Outcome {
        if len < IP_FRAME_BASE + IP_FRAME_TOTAL_LEN {
            return Outcome::Invalid;
        }
        // minimum header only; frames with IP options are not processed
        if self.rx_buf[IP_FRAME_BASE + IP_V_HIL_OFFSET] != 0x45 {
            return Outcome::Invalid;
        }
        let total_len = be16(self.rx_buf, IP_FRAME_BASE + IP_TLEN_OFFSET) as usize;
        if total_len < IP_FRAME_TOTAL_LEN || total_len > len - ETH_FRAME_TOTAL_LEN {
            return Outcome::Invalid;
        }
        let hdr = &self.rx_buf[IP_FRAME_BASE..IP_FRAME_BASE + IP_FRAME_TOTAL_LEN];
        if checksum_fold(checksum_sum(0, hdr)) != 0 {
            return Outcome::Conflict;
        }
        let dst = be32(self.rx_buf, IP_FRAME_BASE + IP_DST_OFFSET);
        if self.ip == 0 {
            // unconfigured link: let the DHCP client sort out addressing
            return Outcome::Ok;
        }
        if dst == self.ip || dst == 0xffff_ffff || dst == (self.ip | !self.netmask) {
            return Outcome::Ok;
        }
        if self.multicast_mask != 0
            && (dst & self.multicast_mask) == (self.multicast_ip & self.multicast_mask)
        {
            return Outcome::Ok;
        }
        Outcome::Ignore
    }

    /// Stage an ARP message in the transmit buffer (§ARP build rules)
    pub fn arp_build_message(&mut self, msg_type: arp::ArpMessage, target_ip: u32) -> Outcome {
        if self.magic != IF_MAGIC {
            return Outcome::Fail;
        }
        let size = arp::build_message(
            self.tx_buf,
            self.rx_buf,
            &self.mac,
            &self.ip_addr,
            msg_type,
            target_ip,
        );
        match size {
            Some(size) => {
                self.msg_size = size;
                Outcome::Ok
            }
            None => Outcome::Fail,
        }
    }

    /// Stage the echo reply for the echo request in the receive buffer
    pub fn icmp_build_reply(&mut self) -> Outcome {
        if self.magic != IF_MAGIC {
            return Outcome::Fail;
        }
        let len = self.rx_frame_len();
        match icmp::build_echo_reply(self.tx_buf, &self.rx_buf[..len]) {
            Some(size) => {
                self.msg_size = size;
                Outcome::Ok
            }
            None => Outcome::Fail,
        }
    }

    /// Stage an IGMP membership or leave report for `group`
    pub fn igmp_build_message(&mut self, msg: igmp::IgmpMessage, group: u32) -> Outcome {
        if self.magic != IF_MAGIC {
            return Outcome::Fail;
        }
        let size = igmp::build_message(self.tx_buf, &self.mac, self.ip, self.ip_id, msg, group);
        self.ip_id = self.ip_id.wrapping_add(1);
        match size {
            Some(size) => {
                self.msg_size = size;
                Outcome::Ok
            }
            None => Outcome::Fail,
        }
    }

    /// Stage the periodic LLDP advertisement
    pub fn lldp_build_message(&mut self) -> Outcome {
        if self.magic != IF_MAGIC {
            return Outcome::Fail;
        }
        match lldp::build_message(self.tx_buf, &self.mac, self.ip, self.eth_id) {
            Some(size) => {
                self.msg_size = size;
                Outcome::Ok
            }
            None => Outcome::Fail,
        }
    }

    /// Advance the DHCP machine one tick and stage whatever frame it needs
    pub fn dhcp_run_tick(&mut self) -> Outcome {
        let needed = self.dhcp.cycle();
        let built = match needed {
            dhcp::PacketNeeded::None => return Outcome::Ok,
            dhcp::PacketNeeded::Discover => self.dhcp.build_message(
                self.tx_buf,
                dhcp::DhcpMessage::Discover,
                dhcp::MsgFlags::DHCP_REQPARAM | dhcp::MsgFlags::DHCP_VENDID
                    | dhcp::MsgFlags::DHCP_RESET_SEC,
                self.ip_id,
            ),
            dhcp::PacketNeeded::Request => self.dhcp.build_message(
                self.tx_buf,
                dhcp::DhcpMessage::Request,
                dhcp::MsgFlags::DHCP_REQIP | dhcp::MsgFlags::DHCP_SVRID
                    | dhcp::MsgFlags::DHCP_REQPARAM | dhcp::MsgFlags::DHCP_VENDID,
                self.ip_id,
            ),
            dhcp::PacketNeeded::Renew => self.dhcp.build_message(
                self.tx_buf,
                dhcp::DhcpMessage::Request,
                dhcp::MsgFlags::UNICAST | dhcp::MsgFlags::BOOTP_CIADDR,
                self.ip_id,
            ),
            dhcp::PacketNeeded::Rebind => self.dhcp.build_message(
                self.tx_buf,
                dhcp::DhcpMessage::Request,
                dhcp::MsgFlags::BOOTP_CIADDR,
                self.ip_id,
            ),
        };
        self.ip_id = self.ip_id.wrapping_add(1);
        match built {
            Ok(size) => {
                self.msg_size = size;
                Outcome::Ok
            }
            Err(_) => Outcome::Fail,
        }
    }
}

/// Validate UDP length and, when the checksum field is non-zero, the
/// pseudo-header checksum. Conflict marks a checksum mismatch.
fn check_udp_header(frame: &[u8]) -> Outcome {
    if frame.len() < UDP_PAYLOAD_BASE {
        return Outcome::Invalid;
    }
    let udp_len = be16(frame, UDP_FRAME_BASE + UDP_ULEN_OFFSET) as usize;
    if udp_len < UDP_FRAME_TOTAL_LEN || UDP_FRAME_BASE + udp_len > frame.len() {
        return Outcome::Invalid;
    }
    let checksum = be16(frame, UDP_FRAME_BASE + UDP_CHKSM_OFFSET);
    if checksum != 0 {
        let pseudo = &frame[IP_FRAME_BASE + IP_SRC_OFFSET..IP_FRAME_BASE + IP_DST_OFFSET + 4];
        let mut sum = checksum_sum(IPV4_TYPE_UDP as u32 + udp_len as u32, pseudo);
        sum = checksum_sum(sum, &frame[UDP_FRAME_BASE..UDP_FRAME_BASE + udp_len]);
        if checksum_fold(sum) != 0 {
            return Outcome::Conflict;
        }
    }
    Outcome::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_iface<'a>(rx: &'a mut [u8], tx: &'a mut [u8]) -> Interface<'a> {
        let mut iface =
            Interface::new(0, rx, tx, [0x06, 0x01, 0x02, 0x03, 0x04, 0x05]).unwrap();
        iface.configure(0x0A00_0702, 0xFFFF_FF00); // 10.0.7.2/24
        iface
    }

    fn load_frame(iface: &mut Interface, frame: &[u8]) {
        iface.rx_buf[..frame.len()].copy_from_slice(frame);
        iface.num_words_read = (frame.len() + 3) / 4;
    }

    fn ipv4_frame(proto: u8, payload_len: usize) -> [u8; 1500] {
        let mut f = [0u8; 1500];
        f[ETH_FRAME_TYPE_OFFSET] = 0x08;
        f[ETH_FRAME_TYPE_OFFSET + 1] = 0x00;
        f[IP_FRAME_BASE] = 0x45;
        let total = (IP_FRAME_TOTAL_LEN + payload_len) as u16;
        f[IP_FRAME_BASE + IP_TLEN_OFFSET..IP_FRAME_BASE + IP_TLEN_OFFSET + 2]
            .copy_from_slice(&total.to_be_bytes());
        f[IP_FRAME_BASE + IP_TTL_OFFSET] = 64;
        f[IP_FRAME_BASE + IP_PROT_OFFSET] = proto;
        f[IP_FRAME_BASE + IP_SRC_OFFSET..IP_FRAME_BASE + IP_SRC_OFFSET + 4]
            .copy_from_slice(&0x0A00_0701u32.to_be_bytes());
        f[IP_FRAME_BASE + IP_DST_OFFSET..IP_FRAME_BASE + IP_DST_OFFSET + 4]
            .copy_from_slice(&0x0A00_0702u32.to_be_bytes());
        let csum = ipv4_header_checksum(&f);
        f[IP_FRAME_BASE + IP_CHKSM_OFFSET..IP_FRAME_BASE + IP_CHKSM_OFFSET + 2]
            .copy_from_slice(&csum.to_be_bytes());
        f
    }

    #[test]
    fn buffer_minimums_are_enforced() {
        let mut rx = [0u8; 100];
        let mut tx = [0u8; 2048];
        assert!(Interface::new(0, &mut rx, &mut tx, [0; 6]).is_err());
        let mut rx = [0u8; 2048];
        let mut tx = [0u8; 100];
        assert!(Interface::new(0, &mut rx, &mut tx, [0; 6]).is_err());
    }

    #[test]
    fn unknown_ethertype_counts_one_leaf() {
        let mut rx = [0u8; 2048];
        let mut tx = [0u8; 2048];
        let mut iface = test_iface(&mut rx, &mut tx);
        let mut frame = [0u8; 64];
        frame[ETH_FRAME_TYPE_OFFSET] = 0x86; // IPv6
        frame[ETH_FRAME_TYPE_OFFSET + 1] = 0xDD;
        load_frame(&mut iface, &frame);
        assert_eq!(iface.recv_packet_filter(), PacketFilter::EthUnknown);
        assert_eq!(iface.counters.rx_total, 1);
        assert_eq!(iface.counters.rx_eth_unknown, 1);
    }

    #[test]
    fn ip_checksum_error_is_counted_and_dropped() {
        let mut rx = [0u8; 2048];
        let mut tx = [0u8; 2048];
        let mut iface = test_iface(&mut rx, &mut tx);
        let mut frame = ipv4_frame(IPV4_TYPE_UDP, 20);
        frame[IP_FRAME_BASE + IP_CHKSM_OFFSET] ^= 0xff;
        load_frame(&mut iface, &frame[..256]);
        assert_eq!(iface.recv_packet_filter(), PacketFilter::IpChecksumError);
        assert_eq!(iface.counters.rx_eth_ip, 1);
        assert_eq!(iface.counters.rx_ip_checksum_errors, 1);
    }

    #[test]
    fn tcp_and_igmp_and_lldp_are_counted_and_dropped() {
        let mut rx = [0u8; 2048];
        let mut tx = [0u8; 2048];
        let mut iface = test_iface(&mut rx, &mut tx);

        let frame = ipv4_frame(IPV4_TYPE_TCP, 20);
        load_frame(&mut iface, &frame[..256]);
        assert_eq!(iface.recv_packet_filter(), PacketFilter::TcpUnhandled);
        assert_eq!(iface.counters.rx_ip_tcp_dropped, 1);

        let frame = ipv4_frame(IPV4_TYPE_IGMP, 8);
        load_frame(&mut iface, &frame[..256]);
        assert_eq!(iface.recv_packet_filter(), PacketFilter::IgmpUnhandled);
        assert_eq!(iface.counters.rx_ip_igmp_dropped, 1);

        let mut frame = [0u8; 64];
        frame[ETH_FRAME_TYPE_OFFSET] = 0x88;
        frame[ETH_FRAME_TYPE_OFFSET + 1] = 0xcc;
        load_frame(&mut iface, &frame);
        assert_eq!(iface.recv_packet_filter(), PacketFilter::LldpUnhandled);
        assert_eq!(iface.counters.rx_eth_lldp_dropped, 1);

        assert_eq!(iface.counters.rx_total, 3);
    }

    #[test]
    fn udp_demux_sorts_control_dhcp_and_unknown() {
        let mut rx = [0u8; 2048];
        let mut tx = [0u8; 2048];
        let mut iface = test_iface(&mut rx, &mut tx);

        // control port
        let mut frame = ipv4_frame(IPV4_TYPE_UDP, UDP_FRAME_TOTAL_LEN + 8);
        frame[UDP_FRAME_BASE + UDP_DST_PORT_OFFSET..UDP_FRAME_BASE + UDP_DST_PORT_OFFSET + 2]
            .copy_from_slice(&UDP_CONTROL_PORT.to_be_bytes());
        frame[UDP_FRAME_BASE + UDP_ULEN_OFFSET + 1] = (UDP_FRAME_TOTAL_LEN + 8) as u8;
        load_frame(&mut iface, &frame[..256]);
        assert_eq!(iface.recv_packet_filter(), PacketFilter::Control);
        assert_eq!(iface.counters.rx_udp_ctrl, 1);

        // something else entirely
        let mut frame = ipv4_frame(IPV4_TYPE_UDP, UDP_FRAME_TOTAL_LEN + 8);
        frame[UDP_FRAME_BASE + UDP_DST_PORT_OFFSET + 1] = 99;
        frame[UDP_FRAME_BASE + UDP_ULEN_OFFSET + 1] = (UDP_FRAME_TOTAL_LEN + 8) as u8;
        load_frame(&mut iface, &frame[..256]);
        assert_eq!(iface.recv_packet_filter(), PacketFilter::UdpUnknown);
        assert_eq!(iface.counters.rx_udp_unknown, 1);
    }

    #[test]
    fn rx_total_matches_frame_count_across_mixed_traffic() {
        let mut rx = [0u8; 2048];
        let mut tx = [0u8; 2048];
        let mut iface = test_iface(&mut rx, &mut tx);
        for proto in [IPV4_TYPE_TCP, IPV4_TYPE_IGMP, IPV4_TYPE_PIM, 0x2Fu8].iter() {
            let frame = ipv4_frame(*proto, 20);
            load_frame(&mut iface, &frame[..256]);
            iface.recv_packet_filter();
        }
        assert_eq!(iface.counters.rx_total, 4);
        assert_eq!(iface.counters.rx_eth_ip, 4);
        let leaves = iface.counters.rx_ip_tcp_dropped
            + iface.counters.rx_ip_igmp_dropped
            + iface.counters.rx_ip_pim_dropped
            + iface.counters.rx_ip_unknown;
        assert_eq!(leaves, 4);
    }

    #[test]
    fn ntoa_formats_extremes() {
        let mut buf = [0u8; 16];
        let n = ipv4_ntoa(&mut buf, 0x0A00_0702);
        assert_eq!(&buf[..n], b"10.0.7.2");
        let n = ipv4_ntoa(&mut buf, 0xFFFF_FFFF);
        assert_eq!(&buf[..n], b"255.255.255.255");
        let n = ipv4_ntoa(&mut buf, 0);
        assert_eq!(&buf[..n], b"0.0.0.0");
    }
}
