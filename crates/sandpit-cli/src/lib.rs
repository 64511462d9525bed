//! Command-line surface over the sandbox core
//!
//! The binary runs one snippet per invocation and prints its transcript.
//! Formatting lives here so it can be tested without spawning the binary.

pub mod render;
