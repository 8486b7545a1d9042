//! OTLP trace exporters.
//!
//! Two variants behind one surface: protobuf-over-HTTP and the gRPC
//! streaming transport. Both expose single and batch export; batches merge
//! the resource groups of the input traces into one export request before
//! sending.

use ballast_payload::Trace;
use std::time::Duration;

pub mod grpc;
pub mod http;

/// Errors produced by exporters.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Request construction failed.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),
    /// The HTTP request could not be completed.
    #[error("request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    /// The server answered outside 2xx; the body is diagnostic text.
    #[error("HTTP error {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// gRPC transport error.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The remote RPC endpoint returned an error.
    #[error("RPC endpoint error: {0}")]
    Rpc(#[from] tonic::Status),
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The configured endpoint could not be interpreted.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    Endpoint {
        /// The configured endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// An OTLP exporter, one of the two transport variants.
#[derive(Debug, Clone)]
pub enum Exporter {
    /// Protobuf-over-HTTP.
    Http(http::HttpExporter),
    /// gRPC streaming transport.
    Grpc(grpc::GrpcExporter),
}

impl Exporter {
    /// Export a single trace.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn export_one(&self, trace: &Trace) -> Result<(), Error> {
        match self {
            Exporter::Http(inner) => inner.export(trace.to_export_request()).await,
            Exporter::Grpc(inner) => inner.export(trace.to_export_request()).await,
        }
    }

    /// Export many traces as one request, their resource groups merged.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn export_many(&self, traces: &[Trace]) -> Result<(), Error> {
        let request = Trace::merge(traces.iter().cloned());
        match self {
            Exporter::Http(inner) => inner.export(request).await,
            Exporter::Grpc(inner) => inner.export(request).await,
        }
    }

    /// Release transport resources. Safe to call more than once; dropping
    /// without calling it leaves cleanup to process exit.
    pub async fn shutdown(&self) {
        match self {
            Exporter::Http(_) => {}
            Exporter::Grpc(inner) => inner.shutdown(),
        }
    }
}
