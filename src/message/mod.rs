//! Message types and encoding for the sync protocol.
//!
//! This module contains:
//! - [`WireItem`] - Binary encoding shared by items and messages
//! - [`Header`] and the load/notification shapes
//! - [`Request`] / [`Response`] - RPC envelopes with their command tags

mod codec;
mod frame;
mod types;

pub use codec::WireItem;
pub use frame::{CommandTag, Request, Response, WriteAck};
pub use types::{
    Cleared, Header, ItemsAdded, ItemsUpdated, LoadNewRequest, LoadNewResponse,
    LoadPreviousRequest, LoadPreviousResponse, Notification, NotificationTag,
};
