mod common;

use byteorder::{BigEndian, ByteOrder};

use common::*;
use toy_transport::buf::{BufFlags, PacketBuf};
use toy_transport::config::StackConfig;
use toy_transport::error::{Discard, NetError};
use toy_transport::iface::Dispatch;
use toy_transport::network::icmp::ICMP_TYPE_DEST_UNREACHABLE;
use toy_transport::network::ipv4::protocol;
use toy_transport::transport::{TxOptions, UdpRx, UdpUtils};
use toy_transport::IpAddr;

fn udp_bytes(src_port: u16, dst_port: u16, payload: &[u8], checksum: bool) -> Vec<u8> {
    let udp = UdpUtils::build_datagram(
        &IpAddr::V4(PEER),
        &IpAddr::V4(LOCAL),
        src_port,
        dst_port,
        payload,
        checksum,
    );
    ipv4_datagram(protocol::UDP, PEER, LOCAL, &udp, 0)
}

fn udp_buf(src_port: u16, dst_port: u16, payload: &[u8]) -> PacketBuf {
    rx_buf(&udp_bytes(src_port, dst_port, payload, true), BufFlags::empty(), BLOCK_SIZE)
}

#[test]
fn datagram_reaches_bound_socket() {
    let h = harness();
    h.stack.sockets().bind(7).unwrap();
    let outcome = h.stack.input(udp_buf(4000, 7, b"hello"));
    assert_eq!(outcome, Dispatch::Udp(UdpRx::Delivered));

    let mut out = [0u8; 32];
    let meta = h.stack.sockets().recv_from(7, &mut out, false).unwrap().unwrap();
    assert_eq!(&out[..meta.len], b"hello");
    assert_eq!(meta.src, IpAddr::V4(PEER));
    assert_eq!(meta.src_port, 4000);
    assert!(h.drain().is_empty());
}

#[test]
fn chained_datagram_is_reassembled_for_the_app() {
    let h = harness();
    h.stack.sockets().bind(7).unwrap();
    let payload: Vec<u8> = (0..150u8).collect();
    let bytes = udp_bytes(4000, 7, &payload, true);
    let outcome = h.stack.input(rx_buf(&bytes, BufFlags::empty(), 64));
    assert_eq!(outcome, Dispatch::Udp(UdpRx::Delivered));

    let mut out = [0u8; 256];
    let meta = h.stack.sockets().recv_from(7, &mut out, false).unwrap().unwrap();
    assert_eq!(&out[..meta.len], &payload[..]);
}

#[test]
fn length_mismatch_never_reaches_sockets() {
    let h = harness();
    h.stack.sockets().bind(7).unwrap();
    let mut udp = UdpUtils::build_datagram(&IpAddr::V4(PEER), &IpAddr::V4(LOCAL), 4000, 7, b"hello", false);
    BigEndian::write_u16(&mut udp[4..6], 12);
    let bytes = ipv4_datagram(protocol::UDP, PEER, LOCAL, &udp, 0);

    let outcome = h.stack.input(rx_buf(&bytes, BufFlags::empty(), BLOCK_SIZE));
    assert_eq!(
        outcome,
        Dispatch::Udp(UdpRx::Discarded(Discard::InvalidLength { len: 12 }))
    );
    assert_eq!(h.stack.sockets().queued(7), 0);
    assert!(h.drain().is_empty());
    assert_eq!(h.stack.udp().stats().snapshot().rx_inv_len, 1);
}

#[test]
fn zero_port_is_discarded() {
    let h = harness();
    let outcome = h.stack.input(udp_buf(0, 7, b"x"));
    assert_eq!(outcome, Dispatch::Udp(UdpRx::Discarded(Discard::InvalidPort)));
}

#[test]
fn unclaimed_port_sends_one_port_unreachable() {
    let h = harness();
    let bytes = udp_bytes(4000, 9999, b"anyone there?", true);
    let outcome = h.stack.input(rx_buf(&bytes, BufFlags::empty(), BLOCK_SIZE));
    assert_eq!(outcome, Dispatch::Udp(UdpRx::Unclaimed));

    let sent = h.drain();
    assert_eq!(sent.len(), 1);
    let err = &sent[0];
    assert_eq!(err.protocol, protocol::ICMP);
    assert_eq!(err.dst, IpAddr::V4(PEER));
    assert_eq!(err.message[0], ICMP_TYPE_DEST_UNREACHABLE);
    assert_eq!(err.message[1], 3);
    // original IP header plus the first 8 octets (the UDP header)
    assert_eq!(&err.message[8..], &bytes[..28]);
    assert_eq!(h.pool.outstanding(), 0);
}

#[test]
fn port_unreachable_can_be_disabled() {
    let mut config = StackConfig::default();
    config.udp.port_unreachable = false;
    let h = harness_with(config, 1480);
    assert_eq!(h.stack.input(udp_buf(4000, 9999, b"x")), Dispatch::Udp(UdpRx::Unclaimed));
    assert!(h.drain().is_empty());
}

#[test]
fn no_port_unreachable_for_broadcast() {
    let h = harness();
    let bytes = udp_bytes(4000, 9999, b"x", false);
    let outcome = h.stack.input(rx_buf(&bytes, BufFlags::RX_BROADCAST, BLOCK_SIZE));
    assert_eq!(outcome, Dispatch::Udp(UdpRx::Unclaimed));
    assert!(h.drain().is_empty());
}

#[test]
fn no_port_unreachable_for_non_initial_fragment() {
    let h = harness();
    let udp = UdpUtils::build_datagram(&IpAddr::V4(PEER), &IpAddr::V4(LOCAL), 4000, 9999, b"x", true);
    let bytes = ipv4_datagram(protocol::UDP, PEER, LOCAL, &udp, 64);
    let outcome = h.stack.input(rx_buf(&bytes, BufFlags::empty(), BLOCK_SIZE));
    assert_eq!(outcome, Dispatch::Udp(UdpRx::Unclaimed));
    assert!(h.drain().is_empty());
}

#[cfg(not(feature = "udp-checksum-offload"))]
#[test]
fn bad_checksum_is_discarded() {
    let h = harness();
    h.stack.sockets().bind(7).unwrap();
    let mut bytes = udp_bytes(4000, 7, b"hello", true);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let outcome = h.stack.input(rx_buf(&bytes, BufFlags::empty(), BLOCK_SIZE));
    assert_eq!(outcome, Dispatch::Udp(UdpRx::Discarded(Discard::InvalidChecksum)));
    assert_eq!(h.stack.sockets().queued(7), 0);
}

#[test]
fn zero_checksum_follows_config() {
    let h = harness();
    h.stack.sockets().bind(7).unwrap();
    let bytes = udp_bytes(4000, 7, b"hello", false);
    assert_eq!(
        h.stack.input(rx_buf(&bytes, BufFlags::empty(), BLOCK_SIZE)),
        Dispatch::Udp(UdpRx::Delivered)
    );

    let mut config = StackConfig::default();
    config.udp.rx_accept_no_checksum = false;
    let strict = harness_with(config, 1480);
    strict.stack.sockets().bind(7).unwrap();
    assert_eq!(
        strict.stack.input(rx_buf(&bytes, BufFlags::empty(), BLOCK_SIZE)),
        Dispatch::Udp(UdpRx::Discarded(Discard::MissingChecksum))
    );

    let accepted = h.stack.udp().stats().snapshot();
    assert_eq!((accepted.rx_no_checksum, accepted.rx_inv_no_checksum), (1, 0));
    let refused = strict.stack.udp().stats().snapshot();
    assert_eq!((refused.rx_no_checksum, refused.rx_inv_no_checksum), (0, 1));
}

#[test]
fn ipv6_requires_checksum() {
    let h = harness();
    h.stack.sockets().bind(7).unwrap();
    let src = IpAddr::V6(PEER_V6);
    let dst = IpAddr::V6(LOCAL_V6);

    let bare = UdpUtils::build_datagram(&src, &dst, 4000, 7, b"v6", false);
    let bytes = ipv6_datagram(protocol::UDP, PEER_V6, LOCAL_V6, &bare);
    let buf = PacketBuf::from_ipv6_datagram(&bytes, BLOCK_SIZE, 0, BufFlags::empty()).unwrap();
    assert_eq!(
        h.stack.input(buf),
        Dispatch::Udp(UdpRx::Discarded(Discard::MissingChecksum))
    );

    let summed = UdpUtils::build_datagram(&src, &dst, 4000, 7, b"v6", true);
    let bytes = ipv6_datagram(protocol::UDP, PEER_V6, LOCAL_V6, &summed);
    let buf = PacketBuf::from_ipv6_datagram(&bytes, BLOCK_SIZE, 0, BufFlags::empty()).unwrap();
    assert_eq!(h.stack.input(buf), Dispatch::Udp(UdpRx::Delivered));
}

#[test]
fn unclaimed_ipv6_gets_no_icmpv4_error() {
    let h = harness();
    let udp = UdpUtils::build_datagram(&IpAddr::V6(PEER_V6), &IpAddr::V6(LOCAL_V6), 4000, 9, b"x", true);
    let bytes = ipv6_datagram(protocol::UDP, PEER_V6, LOCAL_V6, &udp);
    let buf = PacketBuf::from_ipv6_datagram(&bytes, BLOCK_SIZE, 0, BufFlags::empty()).unwrap();
    assert_eq!(h.stack.input(buf), Dispatch::Udp(UdpRx::Unclaimed));
    assert!(h.drain().is_empty());
}

#[test]
fn send_builds_checksummed_datagram() {
    let h = harness();
    h.stack.sockets().bind(5000).unwrap();
    h.stack.send_to(5000, IpAddr::V4(PEER), 53, b"query").unwrap();

    let sent = h.drain();
    assert_eq!(sent.len(), 1);
    let expected = UdpUtils::build_datagram(&IpAddr::V4(LOCAL), &IpAddr::V4(PEER), 5000, 53, b"query", true);
    assert_eq!(sent[0].message, expected);
    assert_eq!(sent[0].protocol, protocol::UDP);
    assert_eq!(sent[0].ttl, 64);
    assert_eq!(h.stack.udp().stats().snapshot().tx_datagrams, 1);
}

#[test]
fn send_from_unbound_port_is_refused() {
    let h = harness();
    assert!(matches!(
        h.stack.send_to(5000, IpAddr::V4(PEER), 53, b"x"),
        Err(NetError::InvalidArgument(_))
    ));
}

#[test]
fn oversized_payload_is_rejected() {
    let h = harness_with(StackConfig::default(), 100);
    let udp = h.stack.udp();
    udp.send_v4(5000, PEER, 53, &[0u8; 92], TxOptions::default()).unwrap();
    let err = udp
        .send_v4(5000, PEER, 53, &[0u8; 93], TxOptions::default())
        .unwrap_err();
    assert!(matches!(err, NetError::MtuExceeded { len: 93, max: 92 }));
    assert_eq!(h.drain().len(), 1);
    assert_eq!(h.pool.outstanding(), 0);
}

#[cfg(not(feature = "udp-checksum-offload"))]
#[test]
fn computed_zero_checksum_is_sent_as_all_ones() {
    let h = harness();
    let udp = h.stack.udp();
    // pick the two payload octets that make the one's-complement sum all ones
    let probe = UdpUtils::build_datagram(&IpAddr::V4(LOCAL), &IpAddr::V4(PEER), 5000, 53, &[0, 0], true);
    let payload = [probe[6], probe[7]];

    udp.send_v4(5000, PEER, 53, &payload, TxOptions::default()).unwrap();
    let sent = h.drain();
    assert_eq!(BigEndian::read_u16(&sent[0].message[6..8]), 0xFFFF);
}

#[cfg(not(feature = "udp-checksum-offload"))]
#[test]
fn checksum_opt_out_is_ipv4_only() {
    let h = harness();
    let udp = h.stack.udp();
    let opts = TxOptions {
        no_checksum: true,
        ..TxOptions::default()
    };
    udp.send_v4(5000, PEER, 53, b"abc", opts).unwrap();
    udp.send_v6(5000, PEER_V6, 53, b"abc", opts).unwrap();

    let sent = h.drain();
    assert_eq!(BigEndian::read_u16(&sent[0].message[6..8]), 0);
    assert_eq!(sent[1].src, IpAddr::V6(LOCAL_V6));
    assert_ne!(BigEndian::read_u16(&sent[1].message[6..8]), 0);
}

#[test]
fn transmit_failure_is_reported() {
    let h = harness();
    h.ip.set_fail(true);
    let err = h
        .stack
        .udp()
        .send_v4(5000, PEER, 53, b"x", TxOptions::default())
        .unwrap_err();
    assert!(matches!(err, NetError::Transmit(_)));
    let stats = h.stack.udp().stats().snapshot();
    assert_eq!(stats.tx_failed, 1);
    assert_eq!(stats.tx_datagrams, 0);
    assert_eq!(h.pool.outstanding(), 0);
}

#[test]
fn flooded_socket_queue_stays_bounded() {
    let mut config = StackConfig::default();
    config.udp.socket_queue_len = 3;
    let h = harness_with(config, 1480);
    h.stack.sockets().bind(7).unwrap();

    for _ in 0..10 {
        assert_eq!(h.stack.input(udp_buf(4000, 7, b"flood")), Dispatch::Udp(UdpRx::Delivered));
    }
    assert_eq!(h.stack.sockets().queued(7), 3);
    assert_eq!(h.stack.sockets().queue_drops(), 7);
    // a full queue is not an unreachable port
    assert!(h.drain().is_empty());
}
