#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::uninlined_format_args
)]

//! Synchronous request/response calls over an asynchronous message broker.
//!
//! One call publishes one message to a queue and, when the caller expects a
//! reply, blocks for a bounded time until a delivery carrying the expected
//! correlation token arrives on a separate response queue. Everything a call
//! acquires (session, subscription) is torn down before it returns, on every
//! exit path, and every failure surfaces as a single `Error` outcome.

pub mod broker;
pub mod call;
pub mod config;

pub use call::{execute, CallError, CapturedResponse, Header, Outcome};
pub use config::{
    AppProperty, CallRequest, ConnectionParams, OutgoingMessage, ResponseExpectation,
};
