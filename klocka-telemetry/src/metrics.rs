//! ## klocka-telemetry::metrics
//! **Prometheus counters for the virtual clock**
//!
//! Counts are in callbacks, never in wall-clock units: the engine has no
//! notion of real elapsed time.

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub timers_fired: prometheus::Counter,
    pub continuations_run: prometheus::Counter,
    pub advances: prometheus::Counter,
    pub advance_callbacks: prometheus::Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let timers_fired = Counter::new(
            "klocka_timers_fired_total",
            "Total timer callbacks invoked by the virtual clock",
        )?;
        let continuations_run = Counter::new(
            "klocka_continuations_run_total",
            "Total deferred continuations drained by the virtual clock",
        )?;
        let advances = Counter::new("klocka_advance_total", "Total completed advance calls")?;
        let advance_callbacks = Histogram::with_opts(
            HistogramOpts::new(
                "klocka_advance_callbacks",
                "Callbacks (timers and continuations) run per advance call",
            )
            .buckets(vec![0.0, 1.0, 10.0, 100.0, 1_000.0, 10_000.0]),
        )?;

        registry.register(Box::new(timers_fired.clone()))?;
        registry.register(Box::new(continuations_run.clone()))?;
        registry.register(Box::new(advances.clone()))?;
        registry.register(Box::new(advance_callbacks.clone()))?;

        Ok(Self {
            registry,
            timers_fired,
            continuations_run,
            advances,
            advance_callbacks,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    #[inline]
    pub fn inc_timers_fired(&self) {
        self.timers_fired.inc();
    }

    #[inline]
    pub fn inc_continuations_run(&self) {
        self.continuations_run.inc();
    }

    /// Records one finished advance and how many callbacks it ran.
    pub fn observe_advance(&self, callbacks: u64) {
        self.advances.inc();
        self.advance_callbacks.observe(callbacks as f64);
    }
}
