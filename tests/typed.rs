// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed envelope and typed bus wrappers. Payloads here are hand-rolled
// byte spans (the typed layer is a thin convention over the transport), so
// no schema compiler is involved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use shmkit::{Builder, Message, Mode, MsgBuf, TypedChannel, TypedRoute};

/// Marker root type for tests that only exercise byte flow.
struct RawMsg;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_typed_{n}_{}", std::process::id())
}

/// Minimal framed payload: a little-endian root offset followed by a tag.
fn frame(tag: u32) -> Vec<u8> {
    let mut v = Vec::with_capacity(8);
    v.extend_from_slice(&4u32.to_le_bytes());
    v.extend_from_slice(&tag.to_le_bytes());
    v
}

fn read_tag(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[4..8].try_into().unwrap())
}

#[test]
fn empty_message_has_no_data() {
    let msg: Message<RawMsg> = Message::empty();
    assert!(msg.is_empty());
    assert_eq!(msg.size(), 0);
    assert_eq!(msg.data(), &[] as &[u8]);
}

#[test]
fn message_wraps_received_bytes() {
    let msg: Message<RawMsg> = Message::new(MsgBuf::copy_from(&frame(42)));
    assert!(!msg.is_empty());
    assert_eq!(msg.size(), 8);
    assert_eq!(read_tag(msg.data()), 42);
}

#[test]
fn unfinished_builder_yields_no_bytes() {
    let b = Builder::new(256);
    assert_eq!(b.size(), 0);
    assert!(b.data().is_empty());
}

#[test]
fn builder_produces_flatbuffer_bytes() {
    let mut b = Builder::new(256);
    let s = b.fbb().create_string("payload");
    b.finish(s);
    assert!(b.size() > 0);

    b.clear();
    assert_eq!(b.size(), 0);
}

#[test]
fn typed_channel_roundtrip() {
    let name = unique_name("chan");
    let mut rx: TypedChannel<RawMsg> = TypedChannel::connect(&name, Mode::Receiver).expect("rx");
    let tx: TypedChannel<RawMsg> = TypedChannel::connect(&name, Mode::Sender).expect("tx");

    assert!(tx.send_bytes(&frame(7), 1_000).expect("send"));
    let msg = rx.recv(Some(1_000)).expect("recv");
    assert!(!msg.is_empty());
    assert_eq!(read_tag(msg.data()), 7);
}

#[test]
fn typed_channel_recv_timeout_is_empty() {
    let name = unique_name("chan_empty");
    let mut rx: TypedChannel<RawMsg> = TypedChannel::connect(&name, Mode::Receiver).expect("rx");
    let msg = rx.recv(Some(50)).expect("recv");
    assert!(msg.is_empty());
}

#[test]
fn typed_route_roundtrip_across_threads() {
    let name = unique_name("route");
    let mut rx: TypedRoute<RawMsg> = TypedRoute::connect(&name, Mode::Receiver).expect("rx");

    let name2 = name.clone();
    let sender = thread::spawn(move || {
        let tx: TypedRoute<RawMsg> = TypedRoute::connect(&name2, Mode::Sender).expect("tx");
        for tag in 0..20u32 {
            assert!(tx.send_bytes(&frame(tag), 5_000).expect("send"));
        }
    });

    for tag in 0..20u32 {
        let msg = rx.recv(Some(5_000)).expect("recv");
        assert_eq!(read_tag(msg.data()), tag);
    }
    sender.join().unwrap();
}

#[test]
fn builder_bytes_flow_through_channel() {
    let name = unique_name("builder_flow");
    let mut rx: TypedChannel<RawMsg> = TypedChannel::connect(&name, Mode::Receiver).expect("rx");
    let tx: TypedChannel<RawMsg> = TypedChannel::connect(&name, Mode::Sender).expect("tx");

    let mut b = Builder::new(128);
    let s = b.fbb().create_string("over the bus");
    b.finish(s);
    let sent = b.data().to_vec();

    assert!(tx.send(&b, 1_000).expect("send"));
    let msg = rx.recv(Some(1_000)).expect("recv");
    assert_eq!(msg.data(), &sent[..]);
}
