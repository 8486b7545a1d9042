//! The ingest client.
//!
//! Pairs an exporter with exact size measurement and metric emission. Sizes
//! are the canonical protobuf encoding of each trace, measured before
//! export so failed pushes still cost nothing on the metric side.

use crate::config::IngestConfig;
use crate::exporter::{Exporter, grpc::GrpcExporter, http::HttpExporter};
use crate::limit::ByteRateLimiter;
use crate::telemetry;
use crate::{exporter, limit};
use ballast_payload::Trace;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors produced by [`IngestClient`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Export failed.
    #[error(transparent)]
    Export(#[from] exporter::Error),
    /// The rate-limit wait failed or was cancelled.
    #[error("rate limiter wait failed: {0}")]
    RateLimit(#[from] limit::Error),
}

/// Pushes traces to the ingest API and records ingestion metrics.
#[derive(Debug)]
pub struct IngestClient {
    exporter: Exporter,
    labels: Vec<(String, String)>,
}

impl IngestClient {
    /// Build a client for the configured protocol. The transport is opened
    /// eagerly; a gRPC endpoint that cannot be reached fails construction.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is invalid or the connection
    /// cannot be established.
    pub async fn new(config: &IngestConfig) -> Result<Self, Error> {
        let exporter = match config.protocol {
            crate::config::Protocol::OtlpHttp => Exporter::Http(HttpExporter::new(
                &config.endpoint,
                &config.tenant,
                config.timeout(),
            )?),
            crate::config::Protocol::OtlpGrpc => Exporter::Grpc(
                GrpcExporter::connect(&config.endpoint, &config.tenant, config.timeout()).await?,
            ),
        };

        Ok(Self {
            exporter,
            labels: config.test_labels(),
        })
    }

    /// Push a single trace. On success, ingestion metrics are emitted with
    /// the trace's exact serialized size; on failure the exporter error is
    /// returned and nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns the exporter error unchanged.
    pub async fn push(&self, trace: &Trace) -> Result<(), Error> {
        let size = trace.encoded_len() as u64;
        let started = Instant::now();
        self.exporter.export_one(trace).await?;
        telemetry::record_ingestion(&self.labels, size, 1, started.elapsed());
        Ok(())
    }

    /// Push a batch of traces as one export request, optionally paced by a
    /// byte rate limiter over the batch's summed serialized size.
    ///
    /// # Errors
    ///
    /// Returns the limiter error when the wait fails or is cancelled, and
    /// the exporter error unchanged otherwise. No success metric is
    /// recorded on either failure path.
    pub async fn push_batch(
        &self,
        traces: &[Trace],
        limiter: Option<&ByteRateLimiter>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let total_size: usize = traces.iter().map(Trace::encoded_len).sum();

        if let Some(limiter) = limiter {
            limiter.wait(total_size, cancel).await?;
        }

        let started = Instant::now();
        self.exporter.export_many(traces).await?;
        telemetry::record_ingestion(
            &self.labels,
            total_size as u64,
            traces.len() as u64,
            started.elapsed(),
        );
        Ok(())
    }

    /// Close the underlying transport.
    pub async fn shutdown(&self) {
        info!("ingest client shutting down");
        self.exporter.shutdown().await;
    }
}
