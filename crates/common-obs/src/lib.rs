use std::{
    fmt, io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use tracing::{field::Visit, span};
use tracing_subscriber::{
    fmt::{self as tsfmt, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::{Context, Layer, SubscriberExt},
    registry::LookupSpan,
    EnvFilter, Registry,
};

mod metrics;

pub use metrics::{
    autotest_checks_total, encode_prometheus as encode_prometheus_metrics, http_requests_total,
    register_counter, service_name, CounterVec, PROMETHEUS_CONTENT_TYPE,
};

/// Span field picked up as the request identifier for every event logged
/// inside the span.
pub const REQUEST_ID_FIELD: &str = "request_id";

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize observability for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install a global tracing subscriber with JSON output on stderr and
    /// register the service with the metrics registry.
    pub fn init(service: &str) -> Result<(), ObsInitError> {
        let subscriber = Self::subscriber_with_writer(service, io::stderr);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })
    }

    /// Build a tracing subscriber using the provided writer.
    pub fn subscriber_with_writer<W>(service: &str, writer: W) -> impl tracing::Subscriber
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        metrics::init(service);
        let fallback = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tsfmt::layer()
            .with_ansi(false)
            .event_format(JsonLineFormat {
                service: Arc::from(service),
            })
            .with_writer(writer);

        Registry::default()
            .with(env_filter)
            .with(RequestContextLayer::default())
            .with(fmt_layer)
    }
}

/// Build a simple health and info router for services.
pub fn health_router(service: &'static str) -> Router {
    let version = env!("CARGO_PKG_VERSION");
    let health = get(move || async move { Json(json!({ "status": "ok", "service": service })) });
    let info =
        get(move || async move { Json(json!({ "service": service, "version": version })) });

    Router::new()
        .route("/health", health.clone())
        .route("/v1/health", health)
        .route("/info", info.clone())
        .route("/v1/info", info)
}

/// Per-span trace metadata, inherited by child spans.
#[derive(Debug, Clone)]
struct RequestContext {
    trace_id: String,
    request_id: Option<String>,
}

#[derive(Default)]
struct RequestContextLayer {
    next_trace: AtomicU64,
}

impl<S> Layer<S> for RequestContextLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let inherited = span
            .parent()
            .and_then(|parent| parent.extensions().get::<RequestContext>().cloned());
        let mut context = inherited.unwrap_or_else(|| {
            let n = self.next_trace.fetch_add(1, Ordering::Relaxed) + 1;
            RequestContext {
                trace_id: format!("{n:016x}"),
                request_id: None,
            }
        });

        let mut visitor = RequestIdVisitor::default();
        attrs.record(&mut visitor);
        if let Some(request_id) = visitor.0 {
            context.request_id = Some(request_id);
        }

        span.extensions_mut().insert(context);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        values.record(&mut visitor);
        let (Some(request_id), Some(span)) = (visitor.0, ctx.span(id)) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(context) = extensions.get_mut::<RequestContext>() {
            context.request_id = Some(request_id);
        }
    }
}

#[derive(Default)]
struct RequestIdVisitor(Option<String>);

impl Visit for RequestIdVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

/// One JSON object per event: level, target, service, trace/request ids and
/// the event fields.
struct JsonLineFormat {
    service: Arc<str>,
}

impl<S, N> FormatEvent<S, N> for JsonLineFormat
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let context = ctx
            .lookup_current()
            .and_then(|span| span.extensions().get::<RequestContext>().cloned());
        let (trace_id, request_id) = match context {
            Some(context) => (Value::from(context.trace_id), Value::from(context.request_id)),
            None => (Value::Null, Value::Null),
        };

        let line = json!({
            "level": metadata.level().as_str().to_ascii_lowercase(),
            "target": metadata.target(),
            "service": &*self.service,
            "trace_id": trace_id,
            "request_id": request_id,
            "fields": Value::Object(fields.0),
        });
        writeln!(writer, "{line}")
    }
}

#[derive(Default)]
struct FieldCollector(Map<String, Value>);

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::from(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Mutex, Once};
    use tracing::subscriber::with_default;

    static INIT: Once = Once::new();

    #[test]
    fn init_is_idempotent() {
        INIT.call_once(|| {
            ObsInit::init("test-service").expect("init failed");
        });
        assert!(matches!(
            ObsInit::init("test"),
            Err(ObsInitError::AlreadyInitialized)
        ));
    }

    #[test]
    fn json_logs_include_trace_and_request() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = ObsInit::subscriber_with_writer("svc", TestMakeWriter(buffer.clone()));

        with_default(subscriber, || {
            let span = tracing::info_span!("http.request", request_id = "req-123");
            let _guard = span.enter();
            tracing::info!(status = 200u64, "hello world");
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).expect("valid utf8");
        let line: Value = serde_json::from_str(output.trim()).expect("json line");
        assert_eq!(line["service"], "svc");
        assert_eq!(line["level"], "info");
        assert_eq!(line["request_id"], "req-123");
        assert!(line["trace_id"].is_string());
        assert_eq!(line["fields"]["message"], "hello world");
        assert_eq!(line["fields"]["status"], 200);
    }

    #[test]
    fn events_outside_spans_have_null_ids() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = ObsInit::subscriber_with_writer("svc", TestMakeWriter(buffer.clone()));

        with_default(subscriber, || {
            tracing::warn!("standalone");
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).expect("valid utf8");
        let line: Value = serde_json::from_str(output.trim()).expect("json line");
        assert!(line["trace_id"].is_null());
        assert!(line["request_id"].is_null());
    }

    #[test]
    fn late_recorded_request_id_is_used() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = ObsInit::subscriber_with_writer("svc", TestMakeWriter(buffer.clone()));

        with_default(subscriber, || {
            let span = tracing::info_span!("outer", request_id = tracing::field::Empty);
            span.record(REQUEST_ID_FIELD, "late-1");
            let _outer = span.enter();
            let child = tracing::info_span!("inner");
            let _inner = child.enter();
            tracing::info!("nested");
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).expect("valid utf8");
        let line: Value = serde_json::from_str(output.trim()).expect("json line");
        assert_eq!(line["request_id"], "late-1");
    }

    #[derive(Clone)]
    struct TestMakeWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for TestMakeWriter {
        type Writer = TestWriter;

        fn make_writer(&'a self) -> Self::Writer {
            TestWriter(self.0.clone())
        }
    }

    struct TestWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
