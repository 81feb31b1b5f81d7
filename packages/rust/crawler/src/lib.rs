//! Bounded-concurrency page fetching.
//!
//! This crate provides:
//! - [`Fetcher`] — the seam between the stage's scheduling and HTTP
//! - [`HttpFetcher`] — the reqwest-backed fetcher used in production
//! - [`BoundedFetch`] — the stage fetching every incoming URL under a worker limit

pub mod engine;
pub mod fetch;

pub use engine::BoundedFetch;
pub use fetch::{Fetcher, HttpFetcher, USER_AGENT};
