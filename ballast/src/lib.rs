//! The ballast load-generation and measurement engine.
//!
//! Ballast drives OTLP-speaking distributed tracing backends: it
//! synthesizes realistic traces on demand, transmits them under a byte-rate
//! budget, executes a weighted query workload with adaptive backoff, and
//! emits metrics through the `metrics` facade for the driving harness to
//! aggregate. The harness schedules workers; every operation here is safe
//! to invoke from many workers concurrently.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod auth;
pub mod config;
pub mod engine;
pub mod exporter;
pub mod ingest;
pub mod limit;
pub mod query;
pub(crate) mod telemetry;
pub mod workload;

pub use engine::Engine;

#[inline]
pub(crate) fn full<T: Into<bytes::Bytes>>(
    chunk: T,
) -> http_body_util::combinators::BoxBody<bytes::Bytes, hyper::Error> {
    use http_body_util::BodyExt;
    http_body_util::Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
