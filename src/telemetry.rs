use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "greenlight";

pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("greenlight=info,info"));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    const fn new() -> Self {
        Self {
            service_name: SERVICE_NAME,
        }
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let pid = std::process::id().to_string();
        let metadata = event.metadata();
        let component = metadata.target();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let span_path = current_span_path(ctx);

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", self.service_name);
        push_field(&mut line, "component", component);
        push_field(&mut line, "pid", &pid);

        if let Some(span_path) = span_path {
            push_field(&mut line, "span", &span_path);
        }

        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        if let Some(file) = metadata.file() {
            push_field(&mut line, "file", file);
        }
        if let Some(line_no) = metadata.line() {
            push_field(&mut line, "line", &line_no.to_string());
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

fn current_span_path<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    let span = ctx.lookup_current()?;
    let names: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("."))
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

#[derive(Default)]
pub struct RuntimeCounters {
    starts_inflight: AtomicU64,
    dependency_skips: AtomicU64,
    cancelled_services: AtomicU64,
    launches: LaunchRegistry,
    probe_outcomes: ProbeOutcomeRegistry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub starts_inflight: u64,
    pub dependency_skips: u64,
    pub cancelled_services: u64,
    pub launches: Vec<LaunchStatusSnapshot>,
    pub probe_outcomes: Vec<ProbeOutcomeSnapshot>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LaunchState {
    #[default]
    Pending,
    Ready,
    Failed,
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchStatusSnapshot {
    pub service: String,
    pub state: LaunchState,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeOutcomeSnapshot {
    pub service: String,
    pub kind: String,
    pub success: u64,
    pub failure: u64,
    pub failures_by_reason: Vec<(String, u64)>,
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_starts_inflight(&self) {
        self.starts_inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_starts_inflight(&self) {
        let _ = self.starts_inflight.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| (current > 0).then_some(current - 1),
        );
    }

    pub fn record_dependency_skip(&self) {
        self.dependency_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled_service(&self) {
        self.cancelled_services.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            starts_inflight: self.starts_inflight.load(Ordering::Relaxed),
            dependency_skips: self.dependency_skips.load(Ordering::Relaxed),
            cancelled_services: self.cancelled_services.load(Ordering::Relaxed),
            launches: self.launches.snapshot(),
            probe_outcomes: self.probe_outcomes.snapshot(),
        }
    }

    pub fn register_launch_target(&self, service: &str) {
        self.launches.register(service);
    }

    pub fn record_launch_ready(&self, service: &str, attempts: u32, elapsed: Duration) {
        self.launches
            .record(service, LaunchState::Ready, attempts, elapsed);
    }

    pub fn record_launch_failure(&self, service: &str, attempts: u32, elapsed: Duration) {
        self.launches
            .record(service, LaunchState::Failed, attempts, elapsed);
    }

    pub fn record_launch_abandoned(&self, service: &str, attempts: u32, elapsed: Duration) {
        self.launches
            .record(service, LaunchState::Abandoned, attempts, elapsed);
    }

    pub fn record_probe_success(&self, kind: &str, service: &str) {
        self.probe_outcomes.record_success(kind, service);
    }

    pub fn record_probe_failure(&self, kind: &str, service: &str, reason: Option<&str>) {
        self.probe_outcomes.record_failure(kind, service, reason);
    }
}

#[derive(Clone, Debug, Default)]
struct LaunchEntry {
    state: LaunchState,
    attempts: u32,
    duration_ms: Option<u64>,
}

#[derive(Default)]
struct LaunchRegistry {
    inner: Mutex<BTreeMap<String, LaunchEntry>>,
}

impl LaunchRegistry {
    fn register(&self, service: &str) {
        let mut guard = self.inner.lock().expect("launch registry poisoned");
        guard.entry(service.to_string()).or_default();
    }

    fn record(&self, service: &str, state: LaunchState, attempts: u32, elapsed: Duration) {
        let mut guard = self.inner.lock().expect("launch registry poisoned");
        let entry = guard.entry(service.to_string()).or_default();
        let millis = elapsed.as_millis();
        let clamped = std::cmp::min(millis, u128::from(u64::MAX)) as u64;
        entry.state = state;
        entry.attempts = attempts;
        entry.duration_ms = Some(clamped);
    }

    fn snapshot(&self) -> Vec<LaunchStatusSnapshot> {
        let guard = self.inner.lock().expect("launch registry poisoned");
        guard
            .iter()
            .map(|(service, entry)| LaunchStatusSnapshot {
                service: service.clone(),
                state: entry.state,
                attempts: entry.attempts,
                duration_ms: entry.duration_ms,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
struct ProbeOutcomeEntry {
    success: u64,
    failure: u64,
    failure_reasons: BTreeMap<String, u64>,
}

#[derive(Default)]
struct ProbeOutcomeRegistry {
    inner: Mutex<BTreeMap<(String, String), ProbeOutcomeEntry>>,
}

impl ProbeOutcomeRegistry {
    fn record_success(&self, kind: &str, service: &str) {
        let mut guard = self.inner.lock().expect("probe outcome registry poisoned");
        let entry = guard
            .entry((service.to_string(), kind.to_string()))
            .or_default();
        entry.success = entry.success.saturating_add(1);
    }

    fn record_failure(&self, kind: &str, service: &str, reason: Option<&str>) {
        let mut guard = self.inner.lock().expect("probe outcome registry poisoned");
        let entry = guard
            .entry((service.to_string(), kind.to_string()))
            .or_default();
        entry.failure = entry.failure.saturating_add(1);
        let label = reason.unwrap_or("unknown").to_string();
        *entry.failure_reasons.entry(label).or_insert(0) += 1;
    }

    fn snapshot(&self) -> Vec<ProbeOutcomeSnapshot> {
        let guard = self.inner.lock().expect("probe outcome registry poisoned");
        guard
            .iter()
            .map(|((service, kind), entry)| ProbeOutcomeSnapshot {
                service: service.clone(),
                kind: kind.clone(),
                success: entry.success,
                failure: entry.failure,
                failures_by_reason: entry
                    .failure_reasons
                    .iter()
                    .map(|(reason, count)| (reason.clone(), *count))
                    .collect(),
            })
            .collect()
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}
