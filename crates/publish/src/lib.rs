//! TekServer publish pipeline.
//!
//! Wires policy lookup, certificate verification, transformation, the store
//! transaction and token minting into the one operation the HTTP surface
//! exposes.

#![warn(clippy::all)]

pub mod processor;
pub mod response;

pub use processor::{ProcessorConfig, PublishOutcome, PublishProcessor};
pub use response::{random_padding, PublishResponse};
