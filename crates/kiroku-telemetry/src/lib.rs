//! Tracing setup for kiroku binaries.
//!
//! [`init_tracing`] installs a `tracing_subscriber` registry with an
//! `EnvFilter` (default `info`, override with `RUST_LOG`) and a stderr fmt
//! layer. Built with the `telemetry` feature, it also adds an OTLP export
//! layer when standard OTel environment variables ask for one:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 kiroku insert ...
//! ```
//!
//! Set `OTEL_SDK_DISABLED=true` to explicitly disable even when the endpoint is set.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, otel_layer};

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Stand-in guard when OTel export is compiled out.
#[cfg(not(feature = "telemetry"))]
#[derive(Debug)]
pub struct OtelGuard;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(String),

    #[error("failed to create OTel runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Check whether OTel export should be enabled.
///
/// Returns `true` when standard OTel env vars indicate export is desired:
/// - `OTEL_SDK_DISABLED` is NOT set to `"true"`
/// - AND at least one of:
///   - `OTEL_EXPORTER_OTLP_ENDPOINT` is set
///   - `OTEL_TRACES_EXPORTER` is set (and not `"none"`)
pub fn otel_enabled() -> bool {
    otel_enabled_with(|key| std::env::var(key).ok())
}

fn otel_enabled_with(var: impl Fn(&str) -> Option<String>) -> bool {
    if var("OTEL_SDK_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return false;
    }
    if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() {
        return true;
    }
    var("OTEL_TRACES_EXPORTER").is_some_and(|e| !e.eq_ignore_ascii_case("none"))
}

/// Install the global subscriber. Hold the returned guard for the life of
/// the process so pending spans are flushed.
pub fn init_tracing(service_name: &str) -> Option<OtelGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "telemetry")]
    {
        if otel_enabled() {
            match otel_layer(service_name) {
                Ok((layer, guard)) => {
                    let _ = registry.with(layer).try_init();
                    return Some(guard);
                }
                Err(e) => eprintln!("OTel export disabled: {e}"),
            }
        }
    }
    #[cfg(not(feature = "telemetry"))]
    let _ = service_name;

    // A subscriber may already be installed (tests, embedding hosts).
    let _ = registry.try_init();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_otel_enabled_rules() {
        assert!(!otel_enabled_with(env(&[])));
        assert!(otel_enabled_with(env(&[(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "http://localhost:4317"
        )])));
        assert!(otel_enabled_with(env(&[("OTEL_TRACES_EXPORTER", "otlp")])));
        assert!(!otel_enabled_with(env(&[("OTEL_TRACES_EXPORTER", "None")])));
        assert!(!otel_enabled_with(env(&[
            ("OTEL_SDK_DISABLED", "TRUE"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
        ])));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let _first = init_tracing("kiroku-test");
        let _second = init_tracing("kiroku-test");
        tracing::info!("still logging");
    }
}
