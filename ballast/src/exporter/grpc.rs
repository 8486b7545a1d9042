//! The gRPC streaming exporter.

use super::Error;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use std::time::Duration;
use tonic::Request;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Default OTLP gRPC port, appended when the endpoint names none.
const DEFAULT_GRPC_PORT: u16 = 4317;

const TENANT_METADATA_KEY: &str = "x-scope-orgid";

/// Exports traces over a pre-established gRPC channel. The tenant rides as
/// outgoing metadata on every call.
#[derive(Debug, Clone)]
pub struct GrpcExporter {
    client: TraceServiceClient<Channel>,
    tenant: Option<MetadataValue<tonic::metadata::Ascii>>,
}

impl GrpcExporter {
    /// Connect to `endpoint` and return an exporter over the channel.
    ///
    /// The endpoint is normalized to `host:port`: an `http://` or
    /// `https://` scheme is stripped and the default OTLP port is appended
    /// when none is present.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint cannot be interpreted or the
    /// connection cannot be established.
    pub async fn connect(endpoint: &str, tenant: &str, timeout: Duration) -> Result<Self, Error> {
        let host_port = normalize_endpoint(endpoint);

        let tenant = if tenant.is_empty() {
            None
        } else {
            Some(tenant.parse().map_err(
                |e: tonic::metadata::errors::InvalidMetadataValue| Error::Endpoint {
                    endpoint: endpoint.to_string(),
                    reason: format!("tenant is not valid metadata: {e}"),
                },
            )?)
        };

        let channel = Endpoint::from_shared(format!("http://{host_port}"))
            .map_err(|e| Error::Endpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(Duration::from_secs(1))
            .timeout(timeout)
            .connect()
            .await?;

        debug!(endpoint = %host_port, "gRPC exporter connected");
        Ok(Self {
            client: TraceServiceClient::new(channel),
            tenant,
        })
    }

    /// Send one export request.
    ///
    /// # Errors
    ///
    /// Returns an error when the RPC fails.
    pub(crate) async fn export(&self, payload: ExportTraceServiceRequest) -> Result<(), Error> {
        let mut request = Request::new(payload);
        if let Some(tenant) = &self.tenant {
            request
                .metadata_mut()
                .insert(TENANT_METADATA_KEY, tenant.clone());
        }

        // Channels are cheap handles over the shared connection.
        let mut client = self.client.clone();
        client.export(request).await?;
        Ok(())
    }

    /// Drop is sufficient for channel cleanup; kept for interface symmetry.
    pub(crate) fn shutdown(&self) {}
}

/// Strip any scheme and ensure a port.
fn normalize_endpoint(endpoint: &str) -> String {
    let stripped = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .unwrap_or(endpoint);
    let stripped = stripped.trim_end_matches('/');

    if let Some(rest) = stripped.strip_suffix(':') {
        return format!("{rest}:{DEFAULT_GRPC_PORT}");
    }
    // An explicit port is digits after the last colon. IPv6 literals without
    // brackets are not supported, matching the wire format's host:port form.
    match stripped.rsplit_once(':') {
        Some((_, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            stripped.to_string()
        }
        _ => format!("{stripped}:{DEFAULT_GRPC_PORT}"),
    }
}
