//! Describer Module
//!
//! The external vision-language endpoint that turns an image into a text
//! description. Workers consume it through the `Describe` trait so the pool
//! and the queue runtime can be exercised against scripted describers in
//! tests.

pub mod client;

pub use client::{Describe, OllamaClient};
