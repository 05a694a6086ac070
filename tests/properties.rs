#![allow(clippy::unwrap_used)]

// Property-based tests for the wire format and lazy reader.

use std::time::Duration;

use bytes::Bytes;
use muxwire::protocol::{
    finishes_call, CallReqBuilder, ChecksumType, Frame, FrameBuffer, LazyCallReq, MessageType,
};
use proptest::prelude::*;

fn checksum_strategy() -> impl Strategy<Value = ChecksumType> {
    prop_oneof![
        Just(ChecksumType::None),
        Just(ChecksumType::Crc32),
        Just(ChecksumType::Farmhash),
        Just(ChecksumType::Crc32C),
    ]
}

fn headers_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z]{0,12}", "[ -~]{0,40}"), 0..8)
}

fn request(
    service: &str,
    method: &str,
    headers: &[(String, String)],
    checksum: ChecksumType,
    value: u32,
) -> Frame {
    let mut builder = CallReqBuilder::new(service, method).checksum(checksum, value);
    for (key, val) in headers {
        builder = builder.header(key, val);
    }
    builder.build(1).unwrap()
}

proptest! {
    /// Property: headers and checksum never change where service and method are read.
    #[test]
    fn service_and_method_independent_of_headers(
        service in "[a-zA-Z0-9_.-]{1,64}",
        method in "[a-zA-Z0-9_:]{0,64}",
        headers in headers_strategy(),
        checksum in checksum_strategy(),
        value in any::<u32>(),
    ) {
        let frame = request(&service, &method, &headers, checksum, value);
        let call = LazyCallReq::new(&frame);

        prop_assert_eq!(call.service().unwrap(), service.as_bytes());
        prop_assert_eq!(call.method().unwrap(), method.as_bytes());
        prop_assert_eq!(call.checksum_type().unwrap(), checksum);
        prop_assert_eq!(call.headers().unwrap().len(), headers.len());
    }

    /// Property: TTL is read back with millisecond precision.
    #[test]
    fn ttl_round_trip(ms in any::<u32>()) {
        let frame = CallReqBuilder::new("svc", "m")
            .ttl(Duration::from_millis(u64::from(ms)))
            .build(1)
            .unwrap();

        prop_assert_eq!(
            LazyCallReq::new(&frame).ttl().unwrap(),
            Duration::from_millis(u64::from(ms))
        );
    }

    /// Property: a truncated request errors instead of panicking, and never
    /// returns a wrong field.
    #[test]
    fn truncated_requests_never_panic(
        service in "[a-z]{1,32}",
        method in "[a-z]{1,32}",
        headers in headers_strategy(),
        cut in any::<prop::sample::Index>(),
    ) {
        let frame = request(&service, &method, &headers, ChecksumType::Crc32, 7);
        let len = cut.index(frame.payload_len());
        let truncated = Frame::new(
            MessageType::CallReq,
            1,
            Bytes::copy_from_slice(&frame.payload()[..len]),
        )
        .unwrap();
        let call = LazyCallReq::new(&truncated);

        if let Ok(found) = call.service() {
            prop_assert_eq!(found, service.as_bytes());
        }
        if let Ok(found) = call.method() {
            prop_assert_eq!(found, method.as_bytes());
        }
        let _ = call.headers();
        let _ = call.ttl();
        let _ = call.flags();
    }

    /// Property: frames survive any split of the byte stream.
    #[test]
    fn frame_buffer_split_invariance(
        methods in prop::collection::vec("[a-z]{0,20}", 1..6),
        split in any::<prop::sample::Index>(),
    ) {
        let frames: Vec<Frame> = methods
            .iter()
            .enumerate()
            .map(|(i, m)| CallReqBuilder::new("svc", m).build(i as u32).unwrap())
            .collect();
        let wire: Vec<u8> = frames.iter().flat_map(Frame::encode).collect();
        let at = split.index(wire.len() + 1);

        let mut buffer = FrameBuffer::new();
        let mut decoded = buffer.push(&wire[..at]).unwrap();
        decoded.extend(buffer.push(&wire[at..]).unwrap());

        prop_assert_eq!(decoded, frames);
        prop_assert!(buffer.is_empty());
    }

    /// Property: arbitrary bytes never panic the frame buffer.
    #[test]
    fn frame_buffer_tolerates_garbage(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = FrameBuffer::new().push(&bytes);
    }

    /// Property: a response finishes the call exactly when bit 0 is clear.
    #[test]
    fn completion_follows_fragment_bit(flags in any::<u8>(), rest in prop::collection::vec(any::<u8>(), 0..16)) {
        let mut payload = vec![flags];
        payload.extend(rest);
        for ty in [MessageType::CallRes, MessageType::CallResContinue] {
            let frame = Frame::new(ty, 1, Bytes::from(payload.clone())).unwrap();
            prop_assert_eq!(finishes_call(&frame).unwrap(), flags & 0x01 == 0);
        }
    }
}
