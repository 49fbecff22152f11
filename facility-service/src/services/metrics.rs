use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static LOGIN_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static THROTTLED_ATTEMPTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static HOST_COMMANDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn register<C>(registry: &Registry, collector: Result<C, prometheus::Error>) -> Option<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = match collector {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to create metric: {}", e);
            return None;
        }
    };
    if let Err(e) = registry.register(Box::new(collector.clone())) {
        tracing::error!("Failed to register metric: {}", e);
        return None;
    }
    Some(collector)
}

/// Builds the process registry. Later calls are no-ops.
pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }
    let registry = Registry::new();

    let requests = register(
        &registry,
        IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        ),
    );
    let duration = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "path", "status"],
        ),
    );
    let logins = register(
        &registry,
        IntCounterVec::new(
            Opts::new("login_attempts_total", "Authentication attempts per module and outcome"),
            &["module", "result"],
        ),
    );
    let throttled = register(
        &registry,
        IntCounter::new("throttled_attempts_total", "Attempts rejected by the throttler"),
    );
    let commands = register(
        &registry,
        IntCounterVec::new(
            Opts::new("host_commands_total", "Host commands executed per outcome"),
            &["result"],
        ),
    );

    if REGISTRY.set(registry).is_err() {
        return;
    }
    if let Some(m) = requests {
        let _ = HTTP_REQUESTS_TOTAL.set(m);
    }
    if let Some(m) = duration {
        let _ = HTTP_REQUEST_DURATION_SECONDS.set(m);
    }
    if let Some(m) = logins {
        let _ = LOGIN_ATTEMPTS_TOTAL.set(m);
    }
    if let Some(m) = throttled {
        let _ = THROTTLED_ATTEMPTS_TOTAL.set(m);
    }
    if let Some(m) = commands {
        let _ = HOST_COMMANDS_TOTAL.set(m);
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, seconds: f64) {
    let status = status.to_string();
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, path, &status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[method, path, &status])
            .observe(seconds);
    }
}

pub fn record_login(module: &str, result: &str) {
    if let Some(counter) = LOGIN_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[module, result]).inc();
    }
}

pub fn record_throttled() {
    if let Some(counter) = THROTTLED_ATTEMPTS_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_host_command(result: &str) {
    if let Some(counter) = HOST_COMMANDS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

pub fn get_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        tracing::error!("Metrics registry not initialized");
        return "# Metrics registry not initialized\n".to_string();
    };

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to UTF-8: {}", e);
        format!("# Failed to convert metrics to UTF-8: {}\n", e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_export() {
        init_metrics();
        init_metrics();
        record_login("standard", "success");
        record_throttled();
        record_host_command("ok");

        let text = get_metrics();
        assert!(text.contains("login_attempts_total"));
        assert!(text.contains("throttled_attempts_total"));
        assert!(text.contains("host_commands_total"));
    }
}
