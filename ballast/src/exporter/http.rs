//! The protobuf-over-HTTP exporter.

use super::Error;
use crate::full;
use http_body_util::BodyExt;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{Request, Uri};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;
use std::time::Duration;
use tracing::debug;

const TENANT_HEADER: &str = "X-Scope-OrgID";
const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, hyper::Error>;

/// Exports traces by POSTing the OTLP export request to `<endpoint>/v1/traces`.
#[derive(Clone)]
pub struct HttpExporter {
    client: Client<HttpConnector, BoxBody>,
    endpoint: Uri,
    tenant: Option<HeaderValue>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExporter")
            .field("endpoint", &self.endpoint)
            .field("tenant", &self.tenant)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpExporter {
    /// Create a new [`HttpExporter`] against `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint does not form a valid URI or the
    /// tenant is not a valid header value.
    pub fn new(endpoint: &str, tenant: &str, timeout: Duration) -> Result<Self, Error> {
        let base = endpoint.trim_end_matches('/');
        let uri: Uri = format!("{base}/v1/traces")
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| Error::Endpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let tenant = if tenant.is_empty() {
            None
        } else {
            Some(
                HeaderValue::from_str(tenant).map_err(|e| Error::Endpoint {
                    endpoint: endpoint.to_string(),
                    reason: format!("tenant is not a valid header value: {e}"),
                })?,
            )
        };

        let client = Client::builder(TokioExecutor::new())
            .retry_canceled_requests(false)
            .build_http();

        debug!(endpoint = %uri, "HTTP exporter ready");
        Ok(Self {
            client,
            endpoint: uri,
            tenant,
            timeout,
        })
    }

    /// Send one export request.
    ///
    /// # Errors
    ///
    /// Returns an error on request-construction failure, transport failure,
    /// timeout, or a non-2xx response.
    pub(crate) async fn export(&self, request: ExportTraceServiceRequest) -> Result<(), Error> {
        let payload = request.encode_to_vec();
        let length = payload.len();

        let mut builder = Request::post(self.endpoint.clone())
            .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .header(CONTENT_LENGTH, length);
        if let Some(tenant) = &self.tenant {
            builder = builder.header(TENANT_HEADER, tenant.clone());
        }
        let request = builder.body(full(payload))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| String::from_utf8_lossy(&collected.to_bytes()).into_owned())
                .unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gains_the_traces_path() {
        let exporter =
            HttpExporter::new("http://localhost:4318", "", Duration::from_secs(30)).expect("new");
        assert_eq!(exporter.endpoint.path(), "/v1/traces");

        let exporter =
            HttpExporter::new("http://localhost:4318/", "", Duration::from_secs(30)).expect("new");
        assert_eq!(exporter.endpoint.path(), "/v1/traces");
    }

    #[test]
    fn tenant_header_only_when_configured() {
        let with = HttpExporter::new("http://localhost:4318", "team-a", Duration::from_secs(30))
            .expect("new");
        assert!(with.tenant.is_some());
        let without =
            HttpExporter::new("http://localhost:4318", "", Duration::from_secs(30)).expect("new");
        assert!(without.tenant.is_none());
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(matches!(
            HttpExporter::new("not a uri", "", Duration::from_secs(30)),
            Err(Error::Endpoint { .. })
        ));
    }
}
