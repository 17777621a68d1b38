//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide gRPC server bindings,
//! fixture implementations and `.proto` sources for integration testing `uprpc`.
//! It is not intended for production use.
use std::path::PathBuf;

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

/// `greeter.proto` declares no package, so prost writes it to `_.rs`.
pub mod greeter {
    include!(concat!(env!("OUT_DIR"), "/_.rs"));
}

mod server;

pub use greeter::greeter_server::{Greeter, GreeterServer};
pub use pb::echo_service_server::{EchoService, EchoServiceServer};
pub use server::{EchoServiceImpl, GreeterImpl, spawn_server};

/// Directory holding the `.proto` sources compiled into this crate.
pub const PROTO_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/proto");

pub fn echo_proto() -> PathBuf {
    PathBuf::from(PROTO_DIR).join("echo.proto")
}

pub fn greeter_proto() -> PathBuf {
    PathBuf::from(PROTO_DIR).join("greeter.proto")
}
