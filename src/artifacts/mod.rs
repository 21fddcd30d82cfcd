//! Repository data structures and algorithms
//!
//! - `objects`: object identity and kinds
//! - `refs`: reference names and values
//! - `pack`: packfile decoding and delta resolution

pub mod objects;
pub mod pack;
pub mod refs;
