//! # windowed-sync
//!
//! Incremental partial replication of append-mostly sequences.
//!
//! A server owns a versioned sequence of items plus a log of edited
//! positions. Clients hold only the windows they have loaded: they page
//! forward with `load_new`, page backward with `load_previous`, catch up on
//! edits through the edit log, and apply pushed notifications in between.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Application                              │
//! │           (SyncDelegate / QueueDelegate / ChatSession)          │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ on_added() / on_updated() / on_reset()
//! ┌────────────────────────────▼────────────────────────────────────┐
//! │          QueuedClient (optimistic appends, echo matching)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          ArraySyncClient (PartialSet of loaded windows)         │
//! ├──────────────────────────────┬──────────────────────────────────┤
//! │   LocalRemote (in process)   │   RpcRemote ── Transport ──┐     │
//! └──────────────┬───────────────┴────────────────────────────┼─────┘
//!                │                                ServerRunner│
//! ┌──────────────▼────────────────────────────────────────────▼─────┐
//! │        ArraySyncServer (items, edit log, version, policy)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use windowed_sync::{ArraySyncClient, ArraySyncServer, LocalRemote, NoopDelegate, SyncConfig};
//!
//! let server = ArraySyncServer::<String>::with_config(SyncConfig::default())?.into_shared();
//! let mut client = ArraySyncClient::new(LocalRemote::new(server.clone()), NoopDelegate);
//!
//! client.add(vec!["hello".into()]).await?;
//! client.load_new().await?;
//! assert_eq!(client.items().get(0).map(String::as_str), Some("hello"));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]

mod chat;
mod client;
mod config;
mod error;
mod message;
mod queue;
mod queued_client;
mod remote;
mod runner;
mod server;
mod transport;

pub mod collections;
pub mod testing;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

// Collections
pub use collections::{ChangedPair, Indexed, InsertResult, PartialSet};

// Configuration and errors
pub use config::SyncConfig;
pub use error::{Error, Result};

// Protocol messages
pub use message::{
    Cleared, CommandTag, Header, ItemsAdded, ItemsUpdated, LoadNewRequest, LoadNewResponse,
    LoadPreviousRequest, LoadPreviousResponse, Notification, NotificationTag, Request, Response,
    WireItem, WriteAck,
};

// Server side
pub use runner::{connect_in_process, ServerRunner};
pub use server::{ArraySyncServer, ItemPolicy, LastWriteWins, MergeWith, SharedServer};

// Client side
pub use client::{ArraySyncClient, ClientChanges, NoopDelegate, SyncDelegate};
pub use queue::{ArraySyncQueue, HashedItem};
pub use queued_client::{QueueDelegate, QueueRouter, QueuedClient, RetryTicket, SendOutcome};
pub use remote::{LocalRemote, RpcRemote, SyncRemote};

// Transport
pub use transport::{ChannelTransport, ChannelTransportError, Transport};

// Chat
pub use chat::{
    count_unread, ChatMessage, ChatSession, NotFromReader, Participant, ReadEvent, UnreadPolicy,
    UnreadSummary,
};
