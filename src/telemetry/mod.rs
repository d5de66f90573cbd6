//! Optional scalar time-series output.
//!
//! Sinks never fail the run: write or transport errors are logged and
//! dropped.  `NoopTelemetry` stands in whenever telemetry is disabled or
//! could not be set up.

pub mod http;
pub mod jsonl;

use serde::{Serialize, Deserialize};

pub use http::HttpTelemetry;
pub use jsonl::JsonlTelemetry;

/// One value of a named series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarPoint {
    pub step: u64,
    pub value: f64,
}

pub trait TelemetrySink {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64);

    /// Several series sampled at the same step.
    fn add_scalars(&mut self, values: &[(&str, f64)], step: u64) {
        for (name, value) in values {
            self.add_scalar(name, *value, step);
        }
    }

    /// False for the no-op sink; lets the trainer skip building values.
    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn add_scalar(&mut self, _name: &str, _value: f64, _step: u64) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) {
        (**self).add_scalar(name, value, step)
    }

    fn add_scalars(&mut self, values: &[(&str, f64)], step: u64) {
        (**self).add_scalars(values, step)
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }
}

/// Which telemetry sink a run uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryMode {
    Off,
    /// Append JSON lines to `{output_dir}/telemetry.jsonl`.
    Jsonl,
    /// Serve series over HTTP on this address.
    Http(String),
}

/// Builds the sink for `mode`, degrading to `NoopTelemetry` on failure.
pub fn build_sink(mode: &TelemetryMode, output_dir: &std::path::Path, experiment: &str) -> Box<dyn TelemetrySink> {
    match mode {
        TelemetryMode::Off => Box::new(NoopTelemetry),
        TelemetryMode::Jsonl => match JsonlTelemetry::create(&output_dir.join(jsonl::TELEMETRY_FILE), experiment) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                tracing::warn!("telemetry disabled: cannot open jsonl file: {e}");
                Box::new(NoopTelemetry)
            }
        },
        TelemetryMode::Http(addr) => match HttpTelemetry::bind(addr, experiment) {
            Ok(sink) => {
                tracing::info!("serving telemetry on http://{}/scalars", addr);
                Box::new(sink)
            }
            Err(e) => {
                tracing::warn!("telemetry disabled: cannot bind {addr}: {e}");
                Box::new(NoopTelemetry)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_setup_degrades_to_noop() {
        let sink = build_sink(
            &TelemetryMode::Jsonl,
            std::path::Path::new("/nonexistent/dir"),
            "exp",
        );
        assert!(!sink.is_enabled());
        assert!(!build_sink(&TelemetryMode::Off, std::path::Path::new("."), "exp").is_enabled());
    }
}
