//! Shared test utilities for windowed-sync integration tests.
//!
//! Provides a hashed test item, server constructors and log setup.

#![allow(dead_code)]

use bytes::{Buf, BufMut};
use windowed_sync::{ArraySyncServer, HashedItem, SharedServer, SyncConfig, WireItem};

/// Install a log subscriber honoring `RUST_LOG`; later calls are no-ops.
pub fn setup_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small item with a write queue hash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Note {
    pub hash: u64,
    pub text: String,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            hash: 0,
            text: text.into(),
        }
    }
}

impl HashedItem for Note {
    fn sync_hash(&self) -> u64 {
        self.hash
    }

    fn set_sync_hash(&mut self, hash: u64) {
        self.hash = hash;
    }
}

impl WireItem for Note {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.hash);
        self.text.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Some(Self {
            hash: u64::decode(buf)?,
            text: String::decode(buf)?,
        })
    }

    fn encoded_len(&self) -> usize {
        8 + self.text.encoded_len()
    }
}

/// Notes with the given texts and no hash.
pub fn notes(texts: &[&str]) -> Vec<Note> {
    texts.iter().map(|&t| Note::new(t)).collect()
}

/// An empty shared server with the given page size.
pub fn server<T>(block_size: usize) -> SharedServer<T>
where
    T: Clone + Send + 'static,
{
    ArraySyncServer::with_config(SyncConfig::new().with_block_size(block_size))
        .expect("valid config")
        .into_shared()
}

/// A shared server pre-filled with `0..len`.
pub fn numbers_server(len: u64, block_size: usize) -> SharedServer<u64> {
    let server = server(block_size);
    if len > 0 {
        server
            .lock()
            .add((0..len).collect())
            .expect("append accepted");
    }
    server
}
