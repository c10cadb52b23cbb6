mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::*;
use toy_transport::buf::BufFlags;
use toy_transport::error::{Discard, NetError};
use toy_transport::iface::Dispatch;
use toy_transport::network::icmp::{IcmpHeader, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
use toy_transport::network::icmpv4::IcmpRx;
use toy_transport::network::ipv4::protocol;
use toy_transport::{EchoReply, Result};

/// Start a ping from another thread and return the request it transmitted
fn start_ping(
    h: &Harness,
    data: &'static [u8],
    timeout: Duration,
) -> (IcmpHeader, Vec<u8>, thread::JoinHandle<Result<EchoReply>>) {
    let stack = h.stack.clone();
    let handle = thread::spawn(move || stack.ping(PEER, 7, data, timeout));
    let sent = h.sent.recv_timeout(Duration::from_secs(2)).expect("echo request sent");
    let hdr = IcmpHeader::from_bytes(&sent.message).unwrap();
    (hdr, sent.message[8..].to_vec(), handle)
}

fn reply(h: &Harness, id: u16, seq: u16, data: &[u8]) -> Dispatch {
    let msg = icmp_message(ICMP_TYPE_ECHO_REPLY, 0, id_seq(id, seq), data);
    let bytes = ipv4_datagram(protocol::ICMP, PEER, LOCAL, &msg, 0);
    h.stack.input(rx_buf(&bytes, BufFlags::empty(), BLOCK_SIZE))
}

#[test]
fn ping_matched() {
    let h = harness();
    let (hdr, data, handle) = start_ping(&h, b"ping", Duration::from_millis(500));
    assert_eq!(hdr.msg_type, ICMP_TYPE_ECHO_REQUEST);
    assert_eq!(hdr.identifier(), 7);
    assert_eq!(data, b"ping");

    thread::sleep(Duration::from_millis(50));
    reply(&h, 7, hdr.sequence(), b"ping");

    let result = handle.join().unwrap().unwrap();
    assert!(result.matched);
    assert_eq!(result.sequence, hdr.sequence());
    assert_eq!(h.stack.icmp().tracker().pending(), 0);
}

#[test]
fn ping_mismatched_payload() {
    let h = harness();
    let (hdr, _, handle) = start_ping(&h, b"ping", Duration::from_millis(500));
    reply(&h, 7, hdr.sequence(), b"pong");

    let result = handle.join().unwrap().unwrap();
    assert!(!result.matched);
    assert_eq!(h.stack.icmp().tracker().pending(), 0);
}

#[test]
fn ping_times_out() {
    let h = harness();
    let start = Instant::now();
    let (hdr, _, handle) = start_ping(&h, b"ping", Duration::from_millis(500));

    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err, NetError::EchoTimeout { sequence } if sequence == hdr.sequence()));
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(h.stack.icmp().tracker().pending(), 0);
}

#[test]
fn foreign_reply_wakes_nobody() {
    let h = harness();
    let (hdr, _, handle) = start_ping(&h, b"ping", Duration::from_millis(200));

    let outcome = reply(&h, 8, hdr.sequence(), b"ping");
    assert_eq!(outcome, Dispatch::Icmp(IcmpRx::Discarded(Discard::ReplyUnmatched)));
    assert_eq!(h.stack.icmp().tracker().pending(), 1);

    assert!(matches!(
        handle.join().unwrap(),
        Err(NetError::EchoTimeout { .. })
    ));
    assert_eq!(h.stack.icmp().stats().snapshot().rx_inv_echo_reply, 1);
}

#[test]
fn concurrent_pings_are_independent() {
    let h = harness();
    let (first, _, first_handle) = start_ping(&h, b"one", Duration::from_millis(800));
    let (second, _, second_handle) = start_ping(&h, b"two", Duration::from_millis(800));
    assert_ne!(first.sequence(), second.sequence());

    // answered out of order
    reply(&h, 7, second.sequence(), b"two");
    reply(&h, 7, first.sequence(), b"one");

    assert!(first_handle.join().unwrap().unwrap().matched);
    assert!(second_handle.join().unwrap().unwrap().matched);
    assert_eq!(h.stack.icmp().tracker().pending(), 0);
}

#[test]
fn ping_fails_when_link_is_down() {
    let h = harness();
    h.ip.set_fail(true);
    let err = h
        .stack
        .ping(PEER, 1, b"x", Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, NetError::Transmit(_)));
    assert_eq!(h.stack.icmp().tracker().pending(), 0);
}
