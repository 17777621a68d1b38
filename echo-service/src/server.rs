//! Fixture implementations of the compiled services, served on an ephemeral port.
use crate::greeter::greeter_server::{Greeter, GreeterServer};
use crate::greeter::{HelloReply, HelloRequest};
use crate::pb::echo_service_server::{EchoService, EchoServiceServer};
use crate::pb::{EchoRequest, EchoResponse};
use futures_util::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tonic::metadata::MetadataMap;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status, Streaming};

pub struct EchoServiceImpl;

#[tonic::async_trait]
impl EchoService for EchoServiceImpl {
    type BidirectionalEchoStream = Pin<Box<dyn Stream<Item = Result<EchoResponse, Status>> + Send>>;
    type ServerStreamingEchoStream = ReceiverStream<Result<EchoResponse, Status>>;
    type EndlessEchoStream = ReceiverStream<Result<EchoResponse, Status>>;
    type StubbornEchoStream = ReceiverStream<Result<EchoResponse, Status>>;

    async fn unary_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        let echoed = request.metadata().clone();
        let mut response = Response::new(EchoResponse {
            message: request.into_inner().message,
        });

        // Hand the caller's metadata back so tests can check both directions.
        if let Some(user) = echoed.get("x-user") {
            response.metadata_mut().insert("x-user", user.clone());
        }
        if let Some(trace) = echoed.get_bin("trace-bin") {
            response.metadata_mut().insert_bin("trace-bin", trace.clone());
        }
        response
            .metadata_mut()
            .insert("x-served-by", "echo".parse().unwrap());

        Ok(response)
    }

    async fn failing_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        let mut metadata = MetadataMap::new();
        metadata.insert("x-error-detail", "echo refused".parse().unwrap());

        Err(Status::with_metadata(
            Code::InvalidArgument,
            format!("refusing '{}'", request.into_inner().message),
            metadata,
        ))
    }

    async fn server_streaming_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::ServerStreamingEchoStream>, Status> {
        let msg = request.into_inner().message;
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            for i in 0..3 {
                let response = EchoResponse {
                    message: format!("{} - seq {}", msg, i),
                };
                tx.send(Ok(response)).await.ok();
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn endless_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::EndlessEchoStream>, Status> {
        let msg = request.into_inner().message;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut tick = 0u64;
            loop {
                let response = EchoResponse {
                    message: format!("{msg} - tick {tick}"),
                };
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
                tick += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn client_streaming_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<EchoResponse>, Status> {
        let mut stream = request.into_inner();
        let mut full_msg = String::new();

        while let Some(req) = stream.next().await {
            let req = req?;
            full_msg.push_str(&req.message);
        }

        Ok(Response::new(EchoResponse { message: full_msg }))
    }

    async fn bidirectional_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::BidirectionalEchoStream>, Status> {
        let mut in_stream = request.into_inner();
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            while let Some(result) = in_stream.next().await {
                match result {
                    Ok(req) => {
                        let resp = EchoResponse {
                            message: format!("echo: {}", req.message),
                        };
                        if tx.send(Ok(resp)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn stubborn_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::StubbornEchoStream>, Status> {
        let mut in_stream = request.into_inner();
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            while let Some(Ok(req)) = in_stream.next().await {
                let resp = EchoResponse {
                    message: format!("echo: {}", req.message),
                };
                if tx.send(Ok(resp)).await.is_err() {
                    return;
                }
            }
            // Holding `tx` keeps the response stream open until the caller goes away.
            tx.closed().await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

pub struct GreeterImpl;

#[tonic::async_trait]
impl Greeter for GreeterImpl {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        Ok(Response::new(HelloReply {
            message: format!("Hello {}", request.into_inner().name),
        }))
    }
}

/// Serves both fixture services on `127.0.0.1` on an ephemeral port and returns `host:port`.
pub async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();

    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(EchoServiceServer::new(EchoServiceImpl))
            .add_service(GreeterServer::new(GreeterImpl))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    addr.to_string()
}
