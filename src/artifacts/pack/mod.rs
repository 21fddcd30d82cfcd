//! Packfile decoding
//!
//! - `source`: byte sources with explicit seek capability
//! - `scanner`: record-level stream decoder
//! - `parser`: two-phase delta-graph builder and resolver
//! - `delta`: delta payload application
//! - `observer`: parse event sinks
//! - `storage`: object persistence sinks

pub mod delta;
pub mod observer;
pub mod parser;
pub mod scanner;
pub mod source;
pub mod storage;
