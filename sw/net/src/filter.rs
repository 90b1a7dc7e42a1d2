//! Classification outcomes for received frames and the per-interface packet
//! counters. A received frame lands in exactly one leaf outcome; every leaf
//! bumps `rx_total` plus its own counter.

/// Where the receive packet filter sorted a frame
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PacketFilter {
    // protocols we handle
    ArpReply,
    ArpRequest,
    ArpConflict,
    ArpInvalid,
    Icmp,
    IcmpInvalid,
    Dhcp,
    DhcpInvalid,
    DhcpUnknown,
    Control,
    // known but unhandled, counted and dropped
    IgmpUnhandled,
    PimUnhandled,
    TcpUnhandled,
    LldpUnhandled,
    // errors and everything else
    IpChecksumError,
    UdpChecksumError,
    UdpUnknown,
    IpUnknown,
    EthUnknown,
    /// Frame too short to classify at all
    Noise,
}

/// Counter selector for [`Counters::incr`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Counter {
    RxTotal,
    RxEthArp,
    RxArpReply,
    RxArpRequest,
    RxArpConflict,
    RxArpInvalid,
    RxEthIp,
    RxIpChecksumErrors,
    RxIpIcmp,
    RxIcmpInvalid,
    RxIpUdp,
    RxUdpChecksumErrors,
    RxUdpCtrl,
    RxUdpDhcp,
    RxDhcpInvalid,
    RxDhcpUnknown,
    RxUdpUnknown,
    RxIpUnknown,
    RxIpPim,
    RxIpPimDropped,
    RxIpIgmp,
    RxIpIgmpDropped,
    RxIpTcp,
    RxIpTcpDropped,
    RxEthLldp,
    RxEthLldpDropped,
    RxEthUnknown,
    TxTotal,
    TxEthArpRequestOk,
    TxEthArpReplyOk,
    TxEthArpErr,
    TxEthLldpOk,
    TxEthLldpErr,
    TxIpIcmpReplyOk,
    TxIpIcmpReplyErr,
    TxIpIgmpOk,
    TxIpIgmpErr,
    TxUdpDhcpOk,
    TxUdpDhcpErr,
    TxUdpCtrlOk,
    TxUdpCtrlAck,
    TxUdpCtrlNack,
}

/// Per-interface packet counters, monotonically non-decreasing between resets
#[derive(Copy, Clone, Default)]
pub struct Counters {
    pub rx_total: u32,
    pub rx_eth_arp: u32,
    pub rx_arp_reply: u32,
    pub rx_arp_request: u32,
    pub rx_arp_conflict: u32,
    pub rx_arp_invalid: u32,
    pub rx_eth_ip: u32,
    pub rx_ip_checksum_errors: u32,
    pub rx_ip_icmp: u32,
    pub rx_icmp_invalid: u32,
    pub rx_ip_udp: u32,
    pub rx_udp_checksum_errors: u32,
    pub rx_udp_ctrl: u32,
    pub rx_udp_dhcp: u32,
    pub rx_dhcp_invalid: u32,
    pub rx_dhcp_unknown: u32,
    pub rx_udp_unknown: u32,
    pub rx_ip_unknown: u32,
    pub rx_ip_pim: u32,
    pub rx_ip_pim_dropped: u32,
    pub rx_ip_igmp: u32,
    pub rx_ip_igmp_dropped: u32,
    pub rx_ip_tcp: u32,
    pub rx_ip_tcp_dropped: u32,
    pub rx_eth_lldp: u32,
    pub rx_eth_lldp_dropped: u32,
    pub rx_eth_unknown: u32,

    pub tx_total: u32,
    pub tx_eth_arp_request_ok: u32,
    pub tx_eth_arp_reply_ok: u32,
    pub tx_eth_arp_err: u32,
    pub tx_eth_lldp_ok: u32,
    pub tx_eth_lldp_err: u32,
    pub tx_ip_icmp_reply_ok: u32,
    pub tx_ip_icmp_reply_err: u32,
    pub tx_ip_igmp_ok: u32,
    pub tx_ip_igmp_err: u32,
    pub tx_udp_dhcp_ok: u32,
    pub tx_udp_dhcp_err: u32,
    pub tx_udp_ctrl_ok: u32,
    pub tx_udp_ctrl_ack: u32,
    pub tx_udp_ctrl_nack: u32,
}

impl Counters {
    pub const fn new_all_zero() -> Counters {
        Counters {
            rx_total: 0,
            rx_eth_arp: 0,
            rx_arp_reply: 0,
            rx_arp_request: 0,
            rx_arp_conflict: 0,
            rx_arp_invalid: 0,
            rx_eth_ip: 0,
            rx_ip_checksum_errors: 0,
            rx_ip_icmp: 0,
            rx_icmp_invalid: 0,
            rx_ip_udp: 0,
            rx_udp_checksum_errors: 0,
            rx_udp_ctrl: 0,
            rx_udp_dhcp: 0,
            rx_dhcp_invalid: 0,
            rx_dhcp_unknown: 0,
            rx_udp_unknown: 0,
            rx_ip_unknown: 0,
            rx_ip_pim: 0,
            rx_ip_pim_dropped: 0,
            rx_ip_igmp: 0,
            rx_ip_igmp_dropped: 0,
            rx_ip_tcp: 0,
            rx_ip_tcp_dropped: 0,
            rx_eth_lldp: 0,
            rx_eth_lldp_dropped: 0,
            rx_eth_unknown: 0,
            tx_total: 0,
            tx_eth_arp_request_ok: 0,
            tx_eth_arp_reply_ok: 0,
            tx_eth_arp_err: 0,
            tx_eth_lldp_ok: 0,
            tx_eth_lldp_err: 0,
            tx_ip_icmp_reply_ok: 0,
            tx_ip_icmp_reply_err: 0,
            tx_ip_igmp_ok: 0,
            tx_ip_igmp_err: 0,
            tx_udp_dhcp_ok: 0,
            tx_udp_dhcp_err: 0,
            tx_udp_ctrl_ok: 0,
            tx_udp_ctrl_ack: 0,
            tx_udp_ctrl_nack: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new_all_zero();
    }

    pub fn incr(&mut self, c: Counter) {
        let field = match c {
            Counter::RxTotal => &mut self.rx_total,
            Counter::RxEthArp => &mut self.rx_eth_arp,
            Counter::RxArpReply => &mut self.rx_arp_reply,
            Counter::RxArpRequest => &mut self.rx_arp_request,
            Counter::RxArpConflict => &mut self.rx_arp_conflict,
            Counter::RxArpInvalid => &mut self.rx_arp_invalid,
            Counter::RxEthIp => &mut self.rx_eth_ip,
            Counter::RxIpChecksumErrors => &mut self.rx_ip_checksum_errors,
            Counter::RxIpIcmp => &mut self.rx_ip_icmp,
            Counter::RxIcmpInvalid => &mut self.rx_icmp_invalid,
            Counter::RxIpUdp => &mut self.rx_ip_udp,
            Counter::RxUdpChecksumErrors => &mut self.rx_udp_checksum_errors,
            Counter::RxUdpCtrl => &mut self.rx_udp_ctrl,
            Counter::RxUdpDhcp => &mut self.rx_udp_dhcp,
            Counter::RxDhcpInvalid => &mut self.rx_dhcp_invalid,
            Counter::RxDhcpUnknown => &mut self.rx_dhcp_unknown,
            Counter::RxUdpUnknown => &mut self.rx_udp_unknown,
            Counter::RxIpUnknown => &mut self.rx_ip_unknown,
            Counter::RxIpPim => &mut self.rx_ip_pim,
            Counter::RxIpPimDropped => &mut self.rx_ip_pim_dropped,
            Counter::RxIpIgmp => &mut self.rx_ip_igmp,
            Counter::RxIpIgmpDropped => &mut self.rx_ip_igmp_dropped,
            Counter::RxIpTcp => &mut self.rx_ip_tcp,
            Counter::RxIpTcpDropped => &mut self.rx_ip_tcp_dropped,
            Counter::RxEthLldp => &mut self.rx_eth_lldp,
            Counter::RxEthLldpDropped => &mut self.rx_eth_lldp_dropped,
            Counter::RxEthUnknown => &mut self.rx_eth_unknown,
            Counter::TxTotal => &mut self.tx_total,
            Counter::TxEthArpRequestOk => &mut self.tx_eth_arp_request_ok,
            Counter::TxEthArpReplyOk => &mut self.tx_eth_arp_reply_ok,
            Counter::TxEthArpErr => &mut self.tx_eth_arp_err,
            Counter::TxEthLldpOk => &mut self.tx_eth_lldp_ok,
            Counter::TxEthLldpErr => &mut self.tx_eth_lldp_err,
            Counter::TxIpIcmpReplyOk => &mut self.tx_ip_icmp_reply_ok,
            Counter::TxIpIcmpReplyErr => &mut self.tx_ip_icmp_reply_err,
            Counter::TxIpIgmpOk => &mut self.tx_ip_igmp_ok,
            Counter::TxIpIgmpErr => &mut self.tx_ip_igmp_err,
            Counter::TxUdpDhcpOk => &mut self.tx_udp_dhcp_ok,
            Counter::TxUdpDhcpErr => &mut self.tx_udp_dhcp_err,
            Counter::TxUdpCtrlOk => &mut self.tx_udp_ctrl_ok,
            Counter::TxUdpCtrlAck => &mut self.tx_udp_ctrl_ack,
            Counter::TxUdpCtrlNack => &mut self.tx_udp_ctrl_nack,
        };
        *field = field.saturating_add(1);
    }

    /// Sum of every receive leaf counter; equals `rx_total` when each frame
    /// landed in exactly one leaf
    pub fn rx_leaf_sum(&self) -> u32 {
        self.rx_arp_reply
            + self.rx_arp_request
            + self.rx_arp_conflict
            + self.rx_arp_invalid
            + self.rx_ip_checksum_errors
            + self.rx_icmp_invalid
            + self.rx_udp_checksum_errors
            + self.rx_udp_ctrl
            + self.rx_dhcp_invalid
            + self.rx_dhcp_unknown
            + self.rx_udp_unknown
            + self.rx_ip_unknown
            + self.rx_ip_pim_dropped
            + self.rx_ip_igmp_dropped
            + self.rx_ip_tcp_dropped
            + self.rx_eth_lldp_dropped
            + self.rx_eth_unknown
            + self.rx_ip_icmp.saturating_sub(self.rx_icmp_invalid) // valid echo requests
            + self.rx_udp_dhcp
                .saturating_sub(self.rx_dhcp_invalid + self.rx_dhcp_unknown)
    }
}
