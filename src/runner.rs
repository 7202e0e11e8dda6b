//! Per-connection server task.
//!
//! A [`ServerRunner`] serves one client connection: it answers request
//! frames on the RPC transport and forwards every server notification as an
//! encoded frame on the notification transport.
//!
//! # Example
//!
//! ```ignore
//! use windowed_sync::{connect_in_process, ArraySyncClient};
//!
//! let (runner, remote, notifications) = connect_in_process(&server, 64);
//! tokio::spawn(runner.run());
//!
//! let mut client = ArraySyncClient::new(remote, delegate);
//! client.load_new().await?;
//! while let Ok(frame) = notifications.recv().await {
//!     client.handle_notification_frame(&frame)?;
//! }
//! ```

use async_channel::Receiver;
use std::pin::pin;

use crate::{
    message::{Notification, Request, WireItem},
    remote::RpcRemote,
    server::{ItemPolicy, SharedServer},
    transport::{ChannelTransport, Transport},
};

/// Serves one client connection.
pub struct ServerRunner<T, P, Tr> {
    server: SharedServer<T, P>,
    rpc: Tr,
    notifications: Tr,
    subscription: Receiver<Notification<T>>,
}

impl<T, P, Tr> ServerRunner<T, P, Tr>
where
    T: WireItem + Clone + Send + Sync + 'static,
    P: ItemPolicy<T>,
    Tr: Transport,
{
    /// Create a runner and subscribe it to the server right away, so no
    /// write between now and [`run`](Self::run) is missed.
    pub fn new(server: SharedServer<T, P>, rpc: Tr, notifications: Tr) -> Self {
        let subscription = server.lock().subscribe();
        Self {
            server,
            rpc,
            notifications,
            subscription,
        }
    }

    /// Serve until either transport fails.
    pub async fn run(self) {
        let rpc = pin!(self.run_rpc());
        let notifications = pin!(self.run_notifications());
        futures::future::select(rpc, notifications).await;
        tracing::debug!("connection closed");
    }

    /// Answer request frames until the RPC transport fails.
    ///
    /// A frame that does not decode closes the connection, since the client
    /// would otherwise wait for a response that never comes.
    pub async fn run_rpc(&self) {
        loop {
            let frame = match self.rpc.recv().await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("rpc transport closed: {}", e);
                    return;
                }
            };

            let request = match Request::<T>::decode_frame(&frame) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("closing connection after malformed request: {}", e);
                    return;
                }
            };

            let tag = request.tag();
            tracing::trace!(?tag, "serving request");
            let response = self.server.lock().handle(request);

            if let Err(e) = self.rpc.send(response.encode_to_bytes()).await {
                tracing::warn!("failed to send {:?} response: {}", tag, e);
                return;
            }
        }
    }

    /// Forward notifications until the notification transport fails.
    pub async fn run_notifications(&self) {
        while let Ok(notification) = self.subscription.recv().await {
            let kind = notification.type_name();
            if let Err(e) = self.notifications.send(notification.encode_to_bytes()).await {
                tracing::warn!("failed to forward {} notification: {}", kind, e);
                return;
            }
        }
    }

    /// The served server.
    pub fn server(&self) -> &SharedServer<T, P> {
        &self.server
    }
}

/// Wire a server to a new in-process connection.
///
/// Returns:
/// - the runner to spawn
/// - the client's remote
/// - the client end of the notification transport
pub fn connect_in_process<T, P>(
    server: &SharedServer<T, P>,
    capacity: usize,
) -> (
    ServerRunner<T, P, ChannelTransport>,
    RpcRemote<T, ChannelTransport>,
    ChannelTransport,
)
where
    T: WireItem + Clone + Send + Sync + 'static,
    P: ItemPolicy<T>,
{
    let (rpc_client, rpc_server) = ChannelTransport::pair(capacity);
    let (notify_client, notify_server) = ChannelTransport::pair(capacity);
    let runner = ServerRunner::new(server.clone(), rpc_server, notify_server);
    (runner, RpcRemote::new(rpc_client), notify_client)
}
