//! The resolution pipeline for a recursive DNS forwarder.
//!
//! Mirrors the teacher crate's split (`shelter` owns protocol handlers,
//! `runner` owns wire encoding): this crate owns the chain of resolvers and
//! their shared data model; the `forwarder` binary crate owns the CLI,
//! process wiring, and the `hickory_server` listener plumbing around it.

pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod resolvers;
pub mod util;

pub use chain::{chain, get_from_chain, name, ChainLink, ChainResolver};
pub use error::{CoreError, Result};
pub use events::{Event, EventBus, ListType};
pub use model::{canonical_name, Protocol, QuestionFingerprint, Request, Response, ResponseType};
