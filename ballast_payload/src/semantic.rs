//! Semantic-convention attribute synthesis.
//!
//! Operation names, HTTP/database/RPC attributes, resource attributes, and
//! the error-message catalogue. All values come from fixed dictionaries so
//! output resembles real distributed-system traffic without unbounded
//! cardinality.

use crate::common::{SpanKind, bool_kv, double_kv, int_kv, str_kv};
use crate::workflow::WorkflowContext;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use rand::Rng;
use rand::seq::IndexedRandom;

/// Messages attached to error-status spans, drawn uniformly.
pub(crate) const ERROR_MESSAGES: &[&str] = &[
    "connection timeout",
    "database connection failed",
    "invalid request",
    "authentication failed",
    "rate limit exceeded",
    "service unavailable",
    "internal server error",
    "not found",
    "permission denied",
    "request timeout",
];

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH"];
const HTTP_STATUS_CODES: &[i64] = &[200, 201, 204, 400, 401, 403, 404, 500, 502, 503];

/// Built-in service names, by index, for the shape generation path.
pub(crate) fn service_name(index: usize) -> String {
    const SERVICES: &[&str] = &[
        "frontend",
        "backend",
        "database",
        "cache",
        "auth",
        "payment",
        "shipping",
        "analytics",
        "notification",
        "gateway",
    ];
    SERVICES
        .get(index)
        .map_or_else(|| format!("service-{index}"), |s| (*s).to_string())
}

/// A plausible operation name for the given service.
pub(crate) fn operation_name<R: Rng + ?Sized>(service: &str, rng: &mut R) -> String {
    let templates: &[&str] = match service {
        "frontend" => &[
            "GET /",
            "GET /api/users",
            "GET /api/orders",
            "POST /api/orders",
            "PUT /api/users/{id}",
            "DELETE /api/users/{id}",
            "GET /static/*",
            "GET /health",
            "POST /api/auth/login",
            "GET /api/products",
        ],
        "backend" => &[
            "ProcessRequest",
            "ValidateInput",
            "HandleWebhook",
            "ProcessPayment",
            "SendNotification",
            "UpdateInventory",
            "CalculateShipping",
            "GenerateReport",
        ],
        "database" => &[
            "SELECT",
            "INSERT",
            "UPDATE",
            "DELETE",
            "BEGIN TRANSACTION",
            "COMMIT",
            "ROLLBACK",
            "EXECUTE PROCEDURE",
        ],
        "cache" => &["GET", "SET", "MGET", "MSET", "EXPIRE", "DEL", "HGET", "HSET"],
        "auth" => &[
            "Authenticate",
            "Authorize",
            "ValidateToken",
            "RefreshToken",
            "RevokeToken",
        ],
        "payment" => &["ProcessPayment", "Refund", "Authorize", "Capture", "Void"],
        "shipping" => &[
            "CalculateShipping",
            "CreateShipment",
            "TrackShipment",
            "UpdateStatus",
        ],
        "analytics" => &["TrackEvent", "RecordMetric", "GenerateReport", "QueryData"],
        "notification" => &["SendEmail", "SendSMS", "SendPush", "ScheduleNotification"],
        "gateway" => &["RouteRequest", "LoadBalance", "RateLimit", "Authenticate"],
        _ => return format!("{service}-operation"),
    };
    (*templates.choose(rng).expect("non-empty template list")).to_string()
}

/// OTel semantic-convention attributes keyed on span kind and service.
pub(crate) fn semantic_attributes<R: Rng + ?Sized>(
    kind: SpanKind,
    service: &str,
    rng: &mut R,
) -> Vec<KeyValue> {
    let mut attrs = Vec::new();

    match kind {
        SpanKind::Server | SpanKind::Client => {
            let method = HTTP_METHODS.choose(rng).expect("non-empty");
            attrs.push(str_kv("http.method", method));
            let status = HTTP_STATUS_CODES.choose(rng).expect("non-empty");
            attrs.push(int_kv("http.status_code", *status));
            let url: String = match service {
                "frontend" => (*["/api/users", "/api/orders", "/api/products", "/health", "/static/app.js"]
                    .choose(rng)
                    .expect("non-empty"))
                .to_string(),
                "backend" => (*["/v1/process", "/v1/validate", "/v1/webhook"]
                    .choose(rng)
                    .expect("non-empty"))
                .to_string(),
                _ => format!("/api/{service}"),
            };
            attrs.push(str_kv("http.url", &url));
            attrs.push(str_kv("http.scheme", "https"));
        }
        SpanKind::Internal => {
            attrs.push(str_kv("service.operation", "internal-process"));
        }
        SpanKind::Producer | SpanKind::Consumer => {}
    }

    if service == "database" {
        let system = ["postgresql", "mysql", "mongodb", "redis"]
            .choose(rng)
            .expect("non-empty");
        attrs.push(str_kv("db.system", system));
        let statement = [
            "SELECT * FROM users WHERE id = ?",
            "INSERT INTO orders (user_id, total) VALUES (?, ?)",
            "UPDATE products SET stock = ? WHERE id = ?",
            "DELETE FROM sessions WHERE expires_at < ?",
        ]
        .choose(rng)
        .expect("non-empty");
        attrs.push(str_kv("db.statement", statement));
    }

    if service == "cache" {
        attrs.push(str_kv("db.system", "redis"));
        let operation = ["GET", "SET", "MGET", "MSET", "DEL"]
            .choose(rng)
            .expect("non-empty");
        attrs.push(str_kv("db.operation", operation));
    }

    if service == "backend" || service == "gateway" {
        attrs.push(str_kv("rpc.service", &format!("{service}.Service")));
        let method = ["Process", "Validate", "Handle", "Execute"]
            .choose(rng)
            .expect("non-empty");
        attrs.push(str_kv("rpc.method", method));
    }

    attrs
}

/// Business-domain attributes derived from a workflow context, sampled by
/// density with per-attribute multipliers.
#[allow(clippy::too_many_lines)]
pub(crate) fn business_attributes<R: Rng + ?Sized>(
    ctx: &WorkflowContext,
    service: &str,
    density: f64,
    rng: &mut R,
) -> Vec<KeyValue> {
    let density = if density <= 0.0 { 0.8 } else { density.min(1.0) };
    let mut attrs = Vec::new();

    if let Some(user_id) = &ctx.user_id {
        if rng.random::<f64>() < density {
            attrs.push(str_kv("user.id", user_id));
        }
    }

    match service {
        "auth" => {
            if let Some(session_id) = &ctx.session_id {
                if rng.random::<f64>() < density {
                    attrs.push(str_kv("session.id", session_id));
                }
            }
            if rng.random::<f64>() < density * 0.6 {
                let method = ["password", "oauth", "jwt", "saml"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("auth.method", method));
            }
            if rng.random::<f64>() < density * 0.5 {
                let token = ["bearer", "api_key", "session"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("auth.token_type", token));
            }
        }
        "payment" => {
            if let Some(payment_id) = &ctx.payment_id {
                if rng.random::<f64>() < density {
                    attrs.push(str_kv("payment.id", payment_id));
                }
            }
            if rng.random::<f64>() < density {
                let amount = f64::from(rng.random_range(100..=10_099)) / 100.0;
                attrs.push(double_kv("payment.amount", amount));
            }
            if rng.random::<f64>() < density {
                let currency = ["USD", "EUR", "GBP", "JPY"].choose(rng).expect("non-empty");
                attrs.push(str_kv("payment.currency", currency));
            }
            if rng.random::<f64>() < density * 0.8 {
                let method = ["credit_card", "debit_card", "paypal", "bank_transfer"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("payment.method", method));
            }
            if rng.random::<f64>() < density * 0.7 {
                let status = ["pending", "completed", "failed", "refunded"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("payment.status", status));
            }
        }
        "database" => {
            if rng.random::<f64>() < density * 0.8 {
                let table = ["users", "orders", "products", "sessions", "payments", "shipments"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("db.table", table));
            }
            if rng.random::<f64>() < density * 0.6 {
                let query = ["SELECT", "INSERT", "UPDATE", "DELETE"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("db.query_type", query));
            }
            if rng.random::<f64>() < density * 0.5 {
                attrs.push(int_kv("db.rows_affected", rng.random_range(1..=1000)));
            }
            if rng.random::<f64>() < density * 0.4 {
                attrs.push(bool_kv("db.cache_hit", rng.random::<f64>() < 0.3));
            }
        }
        "cache" => {
            if rng.random::<f64>() < density {
                let key = format!("cache:{service}:{}", rng.random_range(0..10_000));
                attrs.push(str_kv("cache.key", &key));
            }
            if rng.random::<f64>() < density * 0.8 {
                attrs.push(bool_kv("cache.hit", rng.random::<f64>() < 0.7));
            }
            if rng.random::<f64>() < density * 0.5 {
                attrs.push(int_kv("cache.ttl", rng.random_range(60..=3660)));
            }
        }
        "shipping" => {
            if let Some(shipment_id) = &ctx.shipment_id {
                if rng.random::<f64>() < density {
                    attrs.push(str_kv("shipment.id", shipment_id));
                }
            }
            if rng.random::<f64>() < density * 0.8 {
                let carrier = ["UPS", "FedEx", "DHL", "USPS"].choose(rng).expect("non-empty");
                attrs.push(str_kv("shipment.carrier", carrier));
            }
            if rng.random::<f64>() < density * 0.6 {
                let tracking = format!("TRK{:012}", rng.random_range(0..1_000_000_000_000_u64));
                attrs.push(str_kv("shipment.tracking_number", &tracking));
            }
            if rng.random::<f64>() < density * 0.5 {
                let destination = ["US", "CA", "UK", "DE", "FR", "JP"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("shipment.destination", destination));
            }
        }
        "analytics" => {
            if rng.random::<f64>() < density {
                let event = ["page_view", "click", "purchase", "search", "login", "logout"]
                    .choose(rng)
                    .expect("non-empty");
                attrs.push(str_kv("analytics.event_name", event));
            }
            if rng.random::<f64>() < density * 0.6 {
                attrs.push(int_kv("analytics.page_views", rng.random_range(1..=10)));
            }
            if rng.random::<f64>() < density * 0.5 {
                attrs.push(int_kv(
                    "analytics.session_duration_seconds",
                    rng.random_range(60..=3660),
                ));
            }
        }
        "frontend" | "backend" => {
            if let Some(order_id) = &ctx.order_id {
                if rng.random::<f64>() < density {
                    attrs.push(str_kv("order.id", order_id));
                }
            }
            if let Some(product_id) = &ctx.product_id {
                if rng.random::<f64>() < density {
                    attrs.push(str_kv("product.id", product_id));
                }
            }
        }
        _ => {}
    }

    attrs
}

/// Resource-level attributes for a service. Values are drawn from the random
/// source in a fixed field order so seeded generations replay identically.
pub(crate) fn resource_attributes<R: Rng + ?Sized>(rng: &mut R) -> Vec<(String, String)> {
    let mut attrs = Vec::with_capacity(6);

    let version = ["1.0.0", "1.1.0", "1.2.0", "2.0.0"]
        .choose(rng)
        .expect("non-empty");
    attrs.push(("service.version".to_string(), (*version).to_string()));

    let host = ["host-01", "host-02", "host-03", "pod-abc123", "pod-def456"]
        .choose(rng)
        .expect("non-empty");
    attrs.push(("host.name".to_string(), (*host).to_string()));

    if rng.random::<f64>() < 0.7 {
        let pod = ["pod-abc123", "pod-def456", "pod-ghi789"]
            .choose(rng)
            .expect("non-empty");
        attrs.push(("k8s.pod.name".to_string(), (*pod).to_string()));
        let namespace = ["production", "staging", "default"]
            .choose(rng)
            .expect("non-empty");
        attrs.push(("k8s.namespace.name".to_string(), (*namespace).to_string()));
        let container = ["app", "sidecar", "init"].choose(rng).expect("non-empty");
        attrs.push(("k8s.container.name".to_string(), (*container).to_string()));
    }

    let env = ["production", "staging", "development"]
        .choose(rng)
        .expect("non-empty");
    attrs.push(("deployment.environment".to_string(), (*env).to_string()));

    attrs
}

/// A random error message from the catalogue.
pub(crate) fn error_message<R: Rng + ?Sized>(rng: &mut R) -> String {
    (*ERROR_MESSAGES.choose(rng).expect("non-empty catalogue")).to_string()
}
