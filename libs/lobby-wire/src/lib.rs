//! Generated binary RPC types and service stubs (§6 wire protocol).
//!
//! `lobby.proto` defines the field set from spec §6 verbatim: `NewItem`,
//! `Key`, `Page`, `NewMessage`, `EndpointRef`/`EndpointInfo`/
//! `EndpointStatus`, `NewEndpoint`. Grounded on `tonic`/`prost` being the
//! root workspace's actual gRPC stack and cross-checked against
//! `original_source/rpc/server.go`'s `TopicService`/`RegistryService`
//! method set (`Put`/`Get`/`Delete`/`Send`/`List`, `Create`/`Status`).

#![allow(clippy::missing_errors_doc, clippy::doc_markdown)]

tonic::include_proto!("lobby");
