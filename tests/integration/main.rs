//! End-to-end tests against a local HTTP server.

mod client;
mod pooled;
