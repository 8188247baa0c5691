use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use serde::Serialize;
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, UtcTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt as tracing_fmt};

const DEFAULT_FILTER: &str = "info,tower_http=info,sqlx=warn,hyper=warn,h2=warn";

fn resource() -> Resource {
    Resource::builder()
        .with_attributes(vec![
            KeyValue::new("service.namespace", "starter"),
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build()
}

/// One log line as emitted on stdout.
#[derive(Serialize)]
struct LogLine<'a> {
    level: &'a str,
    logger: &'a str,
    time: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exc_info: Option<String>,
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    extra: String,
    exc_info: Option<String>,
}

impl LineVisitor {
    fn push_extra(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        let _ = write!(self.extra, " {}={}", field.name(), value);
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_owned(),
            "error" | "exc_info" => self.exc_info = Some(value.to_owned()),
            _ => self.push_extra(field, format_args!("{value}")),
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut chain = value.to_string();
        let mut source = value.source();
        while let Some(cause) = source {
            // Skip causes whose parent already printed them inline.
            let cause_text = cause.to_string();
            if !chain.ends_with(&cause_text) {
                let _ = write!(chain, ": {cause_text}");
            }
            source = cause.source();
        }
        if let Some(previous) = self.exc_info.replace(chain) {
            self.push_extra(field, format_args!("{previous}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "error" | "exc_info" => self.exc_info = Some(format!("{value:?}")),
            _ => self.push_extra(field, format_args!("{value:?}")),
        }
    }
}

/// Formats every event as a single JSON object: `level`, `logger`, `time`, `message`
/// and, when the event carries an error, `exc_info`.
pub struct JsonLine<T> {
    timer: T,
}

/// [`JsonLine`] stamped with RFC 3339 UTC time.
pub fn json_lines() -> JsonLine<impl FormatTime + Send + Sync + 'static> {
    JsonLine {
        timer: UtcTime::rfc_3339(),
    }
}

impl<S, N, T> FormatEvent<S, N> for JsonLine<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    T: FormatTime,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let mut time = String::new();
        self.timer.format_time(&mut Writer::new(&mut time))?;

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let LineVisitor {
            mut message,
            extra,
            exc_info,
        } = visitor;
        message.push_str(&extra);

        let line = LogLine {
            level: metadata.level().as_str(),
            logger: metadata.target(),
            time,
            message,
            exc_info,
        };
        let json = serde_json::to_string(&line).map_err(|_| fmt::Error)?;
        writeln!(writer, "{json}")
    }
}

pub struct TelemetryGuard {
    exporters: Option<(SdkLoggerProvider, SdkTracerProvider)>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some((log_provider, trace_provider)) = self.exporters.take() else {
            return;
        };
        if let Err(err) = log_provider.shutdown() {
            eprintln!("failed to shutdown log provider: {err}");
        }
        if let Err(err) = trace_provider.shutdown() {
            eprintln!("failed to shutdown trace provider: {err}");
        }
    }
}

fn init_logs(endpoint: &str) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkLoggerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build();

    Ok(provider)
}

fn init_traces(endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .build();

    Ok(provider)
}

/// JSON lines on stdout, plus OTLP export of logs and traces when `otlp_endpoint` is set.
///
/// Must be called from within a tokio runtime when exporting.
pub fn init_telemetry(otlp_endpoint: Option<&str>) -> Result<TelemetryGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_fmt::layer()
        .event_format(json_lines())
        .with_writer(std::io::stdout);

    let exporters = otlp_endpoint
        .map(|endpoint| Ok::<_, anyhow::Error>((init_logs(endpoint)?, init_traces(endpoint)?)))
        .transpose()?;

    let otel_log_layer = exporters
        .as_ref()
        .map(|(log_provider, _)| OpenTelemetryTracingBridge::new(log_provider).boxed());
    let otel_trace_layer = exporters.as_ref().map(|(_, trace_provider)| {
        tracing_opentelemetry::layer()
            .with_tracer(trace_provider.tracer(env!("CARGO_PKG_NAME")))
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_log_layer)
        .with(otel_trace_layer)
        .try_init()?;

    Ok(TelemetryGuard { exporters })
}
