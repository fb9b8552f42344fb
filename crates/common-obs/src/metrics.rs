use once_cell::sync::{Lazy, OnceCell};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

static SERVICE_NAME: OnceCell<&'static str> = OnceCell::new();
static PROCESS_START: OnceCell<Instant> = OnceCell::new();
static COUNTERS: Lazy<RwLock<Vec<Arc<CounterVec>>>> = Lazy::new(Default::default);

static HTTP_REQUESTS_TOTAL: Lazy<Arc<CounterVec>> = Lazy::new(|| {
    register_counter(
        "http_requests_total",
        "Total HTTP requests handled",
        &["service", "route", "code"],
    )
});

static AUTOTEST_CHECKS_TOTAL: Lazy<Arc<CounterVec>> = Lazy::new(|| {
    register_counter(
        "autotest_checks_total",
        "Diagnostic checks run against authentication sources",
        &["endpoint", "outcome"],
    )
});

pub fn init(service: &str) {
    if SERVICE_NAME.get().is_some() {
        return;
    }

    let leaked: &'static str = Box::leak(service.to_string().into_boxed_str());
    SERVICE_NAME.set(leaked).ok();
    PROCESS_START.get_or_init(Instant::now);
}

pub fn service_name() -> Option<&'static str> {
    SERVICE_NAME.get().copied()
}

pub fn http_requests_total() -> Arc<CounterVec> {
    HTTP_REQUESTS_TOTAL.clone()
}

pub fn autotest_checks_total() -> Arc<CounterVec> {
    AUTOTEST_CHECKS_TOTAL.clone()
}

/// Monotonic counter family keyed by label values.
pub struct CounterVec {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: Mutex<BTreeMap<Vec<String>, u64>>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[&str], amount: u64) {
        debug_assert_eq!(labels.len(), self.label_names.len());
        let key = labels.iter().map(|label| label.to_string()).collect();
        let mut values = self.values.lock().expect("lock poisoned");
        *values.entry(key).or_insert(0) += amount;
    }

    pub fn get(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        let values = self.values.lock().expect("lock poisoned");
        values.get(&key).copied().unwrap_or(0)
    }

    fn encode(&self, output: &mut String) {
        let _ = writeln!(output, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(output, "# TYPE {} counter", self.name);
        let values = self.values.lock().expect("lock poisoned");
        for (labels, value) in values.iter() {
            output.push_str(self.name);
            write_labels(output, self.label_names, labels);
            let _ = writeln!(output, " {value}");
        }
    }
}

/// Register a counter family, returning the existing one when the name is
/// already taken.
pub fn register_counter(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> Arc<CounterVec> {
    let mut counters = COUNTERS.write().expect("lock poisoned");
    if let Some(existing) = counters.iter().find(|counter| counter.name == name) {
        return existing.clone();
    }
    let counter = Arc::new(CounterVec {
        name,
        help,
        label_names,
        values: Mutex::new(BTreeMap::new()),
    });
    counters.push(counter.clone());
    counter
}

pub fn encode_prometheus() -> String {
    let mut output = String::new();

    if let (Some(service), Some(start)) = (service_name(), PROCESS_START.get()) {
        output.push_str("# HELP process_uptime_seconds Service uptime in seconds\n");
        output.push_str("# TYPE process_uptime_seconds gauge\n");
        let _ = writeln!(
            output,
            "process_uptime_seconds{{service=\"{}\"}} {:.3}",
            escape_label(service),
            start.elapsed().as_secs_f64()
        );
    }

    let counters = COUNTERS.read().expect("lock poisoned");
    for counter in counters.iter() {
        counter.encode(&mut output);
    }

    output
}

fn write_labels(output: &mut String, names: &[&str], values: &[String]) {
    if names.is_empty() {
        return;
    }
    output.push('{');
    for (idx, (name, value)) in names.iter().zip(values).enumerate() {
        if idx > 0 {
            output.push(',');
        }
        let _ = write!(output, "{}=\"{}\"", name, escape_label(value));
    }
    output.push('}');
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
