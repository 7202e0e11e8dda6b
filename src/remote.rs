//! The client's view of the server.
//!
//! [`SyncRemote`] is the network layer a client reconciler talks to. Write
//! results are delivery acknowledgements only: local state changes when the
//! matching notification (or a later load) arrives.

use async_channel::Receiver;
use async_lock::Mutex;
use std::future::Future;
use std::marker::PhantomData;

use crate::{
    collections::Indexed,
    error::{Error, Result},
    message::{
        LoadNewRequest, LoadNewResponse, LoadPreviousRequest, LoadPreviousResponse, Notification,
        Request, Response, WireItem,
    },
    server::{ItemPolicy, SharedServer},
    transport::Transport,
};

/// Requests a client can issue against the server.
#[auto_impl::auto_impl(Box, Arc)]
pub trait SyncRemote<T>: Send + Sync + 'static {
    /// Load items appended and edited since the request header.
    fn load_new(
        &self,
        request: LoadNewRequest,
    ) -> impl Future<Output = Result<LoadNewResponse<T>>> + Send;

    /// Load a page of history.
    fn load_previous(
        &self,
        request: LoadPreviousRequest,
    ) -> impl Future<Output = Result<LoadPreviousResponse<T>>> + Send;

    /// Append items, resolving to the position of the first one.
    fn add(&self, items: Vec<T>) -> impl Future<Output = Result<u64>> + Send;

    /// Edit items in place.
    fn update(&self, edit: Indexed<Vec<T>>) -> impl Future<Output = Result<()>> + Send;

    /// Wipe the server sequence.
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Remote that calls an in-process server directly.
pub struct LocalRemote<T, P> {
    server: SharedServer<T, P>,
}

impl<T, P> LocalRemote<T, P> {
    /// Wrap a shared server.
    pub fn new(server: SharedServer<T, P>) -> Self {
        Self { server }
    }

    /// The wrapped server.
    pub fn server(&self) -> &SharedServer<T, P> {
        &self.server
    }
}

impl<T, P> LocalRemote<T, P>
where
    T: Clone + Send + 'static,
    P: ItemPolicy<T>,
{
    /// Subscribe to the server's notifications.
    pub fn subscribe(&self) -> Receiver<Notification<T>> {
        self.server.lock().subscribe()
    }
}

impl<T, P> Clone for LocalRemote<T, P> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
        }
    }
}

impl<T, P> SyncRemote<T> for LocalRemote<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: ItemPolicy<T>,
{
    async fn load_new(&self, request: LoadNewRequest) -> Result<LoadNewResponse<T>> {
        Ok(self.server.lock().load_new(&request))
    }

    async fn load_previous(&self, request: LoadPreviousRequest) -> Result<LoadPreviousResponse<T>> {
        Ok(self.server.lock().load_previous(&request))
    }

    async fn add(&self, items: Vec<T>) -> Result<u64> {
        self.server.lock().add(items)
    }

    async fn update(&self, edit: Indexed<Vec<T>>) -> Result<()> {
        self.server.lock().update(edit)
    }

    async fn clear(&self) -> Result<()> {
        self.server.lock().clear();
        Ok(())
    }
}

/// Remote that exchanges encoded frames over a [`Transport`].
///
/// Calls are serialized: each request waits for the previous response. A
/// call dropped between send and receive leaves its response on the
/// transport; the next call then fails with a tag mismatch or reads a stale
/// answer, so callers should let calls run to completion.
pub struct RpcRemote<T, Tr> {
    transport: Tr,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, Tr> RpcRemote<T, Tr> {
    /// Create a remote speaking over `transport`.
    pub fn new(transport: Tr) -> Self {
        Self {
            transport,
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Tr {
        &self.transport
    }
}

impl<T, Tr> RpcRemote<T, Tr>
where
    T: WireItem + Send + 'static,
    Tr: Transport,
{
    async fn call(&self, request: Request<T>) -> Result<Response<T>> {
        let tag = request.tag();
        let frame = request.encode_to_bytes();

        let _guard = self.lock.lock().await;
        self.transport
            .send(frame)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let reply = self
            .transport
            .recv()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let response = Response::decode_frame(&reply)?;
        if response.tag() != tag {
            return Err(Error::Decode(format!(
                "expected {:?} response, got {:?}",
                tag,
                response.tag()
            )));
        }
        Ok(response)
    }
}

fn unexpected<T>(response: &Response<T>) -> Error {
    Error::Decode(format!("unexpected {:?} response", response.tag()))
}

impl<T, Tr> SyncRemote<T> for RpcRemote<T, Tr>
where
    T: WireItem + Send + Sync + 'static,
    Tr: Transport,
{
    async fn load_new(&self, request: LoadNewRequest) -> Result<LoadNewResponse<T>> {
        match self.call(Request::LoadNewItems(request)).await? {
            Response::LoadNewItems(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn load_previous(&self, request: LoadPreviousRequest) -> Result<LoadPreviousResponse<T>> {
        match self.call(Request::LoadPreviousItems(request)).await? {
            Response::LoadPreviousItems(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn add(&self, items: Vec<T>) -> Result<u64> {
        match self.call(Request::Add(items)).await? {
            Response::Add(ack) => ack.into_result(),
            other => Err(unexpected(&other)),
        }
    }

    async fn update(&self, edit: Indexed<Vec<T>>) -> Result<()> {
        match self.call(Request::Edit(edit)).await? {
            Response::Edit(ack) => ack.into_result(),
            other => Err(unexpected(&other)),
        }
    }

    async fn clear(&self) -> Result<()> {
        match self.call(Request::Clear).await? {
            Response::Clear(ack) => ack.into_result(),
            other => Err(unexpected(&other)),
        }
    }
}
