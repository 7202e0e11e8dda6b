//! Fuzz target for protocol frame decoding.
//!
//! Feeds arbitrary bytes to every frame decoder. Decoding must never panic,
//! and whatever decodes must survive an encode/decode round trip unchanged.
//! Decoded requests and notifications are then applied to a live server and
//! client, which must answer or ignore them without panicking.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use windowed_sync::{
    ArraySyncClient, ArraySyncQueue, ArraySyncServer, ChatMessage, LocalRemote, NoopDelegate,
    Notification, Request, Response, SyncConfig, WireItem,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = Request::<Bytes>::decode_frame(data) {
        let encoded = request.encode_to_bytes();
        assert_eq!(encoded.len(), request.encoded_len());
        assert_eq!(Request::<Bytes>::decode_frame(&encoded).ok(), Some(request.clone()));

        if let Ok(mut server) = ArraySyncServer::<Bytes>::with_config(SyncConfig::new().with_block_size(4)) {
            let seeded = server.add((0..6u8).map(|i| Bytes::from(vec![i])).collect());
            if seeded.is_ok() {
                let before = server.len();
                let response = server.handle(request);
                let encoded = response.encode_to_bytes();
                assert_eq!(Response::<Bytes>::decode_frame(&encoded).ok(), Some(response));
                assert!(server.len() >= before || server.is_empty());
            }
        }
    }

    let frame = Bytes::copy_from_slice(data);
    if let Ok(response) = Response::<u64>::decode_frame(&frame) {
        let encoded = response.encode_to_bytes();
        assert_eq!(Response::<u64>::decode_frame(&encoded).ok(), Some(response));
    }

    if let Some(notification) = Notification::<ChatMessage<String>>::decode_from_slice(data) {
        let encoded = notification.encode_to_bytes();
        assert_eq!(encoded.len(), notification.encoded_len());

        if let Ok(server) = ArraySyncServer::<ChatMessage<String>>::with_config(SyncConfig::default()) {
            let mut client = ArraySyncClient::new(LocalRemote::new(server.into_shared()), NoopDelegate);
            let _ = client.handle_notification(notification);
        }
    }

    // Persisted queues come from disk and may be truncated.
    let _ = ArraySyncQueue::<u64>::load(data);
});
