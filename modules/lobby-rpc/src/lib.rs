//! Binary RPC server and backend-adapter client (C7, C8, §4.4-§4.5).

pub mod client;
pub mod errors;
pub mod server;

pub use client::{RpcBackend, dial_unix};
pub use server::{EndpointServiceImpl, RegistryServiceImpl};
