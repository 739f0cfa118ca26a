use {
    crate::{
        error::Error,
        jsonrpc::{RpcCall, RpcRequest, RpcResponse},
    },
    std::sync::Arc,
    tokio_util::sync::CancellationToken,
};

/// Something that can deliver one RPC call to a node and hand back the raw
/// response.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Human readable description of where calls go.
    fn source(&self) -> String;

    async fn send(&self, call: RpcCall) -> Result<RpcResponse, Error>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn source(&self) -> String {
        (**self).source()
    }

    async fn send(&self, call: RpcCall) -> Result<RpcResponse, Error> {
        (**self).send(call).await
    }
}

/// Typed request helpers available on every [`Transport`].
#[async_trait::async_trait]
pub trait TransportExt: Transport {
    /// Sends the request and decodes its response.
    async fn fetch<T: Send + 'static>(&self, request: RpcRequest<T>) -> Result<T, Error>;

    /// Like [`TransportExt::fetch`] but resolves to [`Error::Cancelled`] as
    /// soon as `token` fires. The in-flight call is dropped, which removes it
    /// from the transport's bookkeeping.
    async fn fetch_cancellable<T: Send + 'static>(
        &self,
        request: RpcRequest<T>,
        token: CancellationToken,
    ) -> Result<T, Error>;
}

#[async_trait::async_trait]
impl<S: Transport + ?Sized> TransportExt for S {
    async fn fetch<T: Send + 'static>(&self, request: RpcRequest<T>) -> Result<T, Error> {
        let response = self.send(request.call().clone()).await?;
        request.parse_response(response)
    }

    async fn fetch_cancellable<T: Send + 'static>(
        &self,
        request: RpcRequest<T>,
        token: CancellationToken,
    ) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.fetch(request) => result,
        }
    }
}
