//! # uprpc Core
//!
//! `uprpc-core` is a schema-less gRPC invocation engine. Given nothing but a `.proto` source
//! file, it resolves a service method at runtime, builds request messages from JSON, dials
//! an arbitrary host and drives any of the four RPC shapes, translating responses back to
//! JSON for an external consumer.
//!
//! ## Key Components
//!
//! * **[`engine::Engine`]:** The main entry point. It accepts [`envelope::RequestEnvelope`]s,
//!   manages one session per correlation id and reports `data`/`end` events to an
//!   [`engine::EventSink`]. Open streams are fed with [`engine::Engine::push`] and wound down
//!   with [`engine::Engine::stop`].
//! * **[`descriptor`]:** Parses `.proto` files (and their imports) into a
//!   [`descriptor::ServiceCatalog`] using `protox`, no compiled stubs needed.
//! * **[`codec`]:** JSON to `DynamicMessage` conversion, sample request bodies and metadata
//!   conversion.
//! * **[`session`]:** The registry of in-flight calls, with idempotent close.
//!
//! ## Internal clients
//!
//! We expose the dynamic gRPC client the engine uses internally, for callers that want to
//! drive a single call by hand.
//!
//! * **[`grpc::client::GrpcClient`]:** A gRPC client over `DynamicMessage` using a custom
//!   codec.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod codec;
pub mod descriptor;
pub mod engine;
pub mod envelope;
pub mod grpc;
pub mod session;

pub use engine::{ChannelSink, Engine, EngineConfig, Event, EventSink};
pub use envelope::{RequestEnvelope, ResponseEnvelope};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
