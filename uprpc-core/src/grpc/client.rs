//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to handle serialization.
//! It does not need to know the structure of the data it is sending; it simply ensures
//! the connection is ready and passes the `DynamicMessage`s and the `MethodDescriptor`
//! to the codec.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Full Responses**: Every call returns the whole `tonic::Response`, so callers can read
//!   response metadata, and streaming calls hand back the raw `Streaming` so trailers stay
//!   reachable after the last message.
//! * **Deadlines**: An optional per-call timeout is sent as `grpc-timeout`.
use super::codec::DynamicCodec;
use crate::BoxError;
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::time::Duration;
use tonic::{
    Response, Status, Streaming, client::GrpcService, metadata::MetadataMap, transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid gRPC path '{path}': '{source}'")]
    InvalidPath {
        path: String,
        source: http::uri::InvalidUri,
    },
}

/// Per-call settings shared by the four call shapes.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub metadata: MetadataMap,
    pub timeout: Option<Duration>,
}

/// A generic client able to call any method described by a `MethodDescriptor`.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(Response))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        message: DynamicMessage,
        options: CallOptions,
    ) -> Result<Result<Response<DynamicMessage>, Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(message, options);

        Ok(self.client.unary(request, path, codec).await)
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Response))` - The call was accepted, messages follow on the stream.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        message: DynamicMessage,
        options: CallOptions,
    ) -> Result<Result<Response<Streaming<DynamicMessage>>, Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(message, options);

        Ok(self.client.server_streaming(request, path, codec).await)
    }

    /// Performs a Client Streaming gRPC call (Stream of Requests -> Single Response).
    ///
    /// The response resolves once the request stream ends and the server replies.
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Response))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn client_streaming(
        &mut self,
        method: &MethodDescriptor,
        messages: impl Stream<Item = DynamicMessage> + Send + 'static,
        options: CallOptions,
    ) -> Result<Result<Response<DynamicMessage>, Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(messages, options);

        Ok(self.client.client_streaming(request, path, codec).await)
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Response))` - The call was accepted, messages follow on the stream.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send request or connect.
    pub async fn bidirectional_streaming(
        &mut self,
        method: &MethodDescriptor,
        messages: impl Stream<Item = DynamicMessage> + Send + 'static,
        options: CallOptions,
    ) -> Result<Result<Response<Streaming<DynamicMessage>>, Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(messages, options);

        Ok(self.client.streaming(request, path, codec).await)
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::try_from(path.as_str())
        .map_err(|source| GrpcRequestError::InvalidPath { path, source })
}

fn build_request<T>(payload: T, options: CallOptions) -> tonic::Request<T> {
    let mut request = tonic::Request::new(payload);
    *request.metadata_mut() = options.metadata;
    if let Some(timeout) = options.timeout {
        request.set_timeout(timeout);
    }
    request
}
