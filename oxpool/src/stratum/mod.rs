//! Per-connection Stratum client engine.
//!
//! The pool speaks a Stratum-style protocol: JSON-RPC-ish objects, one per
//! newline-terminated line. Miners send `mining.authorize`,
//! `mining.subscribe` and `mining.submit` requests; the pool answers each
//! and pushes `mining.set_difficulty` and `mining.notify` notifications.
//!
//! # Architecture
//!
//! One [`Client`] owns one TCP connection and runs four cooperating tasks:
//!
//! - **reader**: frames and decodes inbound lines under a rolling read
//!   deadline and hands them to the processor,
//! - **processor**: the protocol state machine; dispatches requests,
//!   validates submitted work against the pool and network targets, and
//!   queues outgoing messages,
//! - **sender**: serializes outgoing messages, rewriting work
//!   notifications to suit the connected hardware,
//! - **hash monitor**: periodically folds the submission count into an
//!   exponentially averaged hash-rate estimate.
//!
//! A single cancellation token is shared by all four; any task cancels it
//! on a fatal error and [`Client::run`] joins the rest before telling the
//! pool to forget the client.

mod client;
mod connection;
mod error;
pub mod messages;

pub use client::{Client, ClientConfig, LimiterClass, PoolHandle, READ_DEADLINE};
pub use connection::{MessageReader, MessageWriter};
pub use error::{ClientError, ClientResult};
