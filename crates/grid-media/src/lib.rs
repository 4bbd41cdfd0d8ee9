//! HTTP client for the Grid media and leases APIs.

/// `reqwest`-backed implementation of [`grid_core::MediaApi`].
pub mod client;

pub use client::MediaApiClient;
