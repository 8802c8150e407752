//! Minimal run‑time metrics sink.
//!
//! Prometheus export is intentionally left out; instead we allow the host
//! process to register a raw callback that receives name/value pairs.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use once_cell::sync::OnceCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_ulonglong};
use std::sync::Arc;

/// Signature for external collectors.
pub type StatsCallback = unsafe extern "C" fn(name: *const c_char, value: c_ulonglong);

static CALLBACK: OnceCell<StatsCallback> = OnceCell::new();

/// Register a callback from C/other languages. Only the first registration
/// takes effect.
///
/// # Safety
/// `cb` must stay callable for the life of the process and may be invoked
/// from any thread.
#[no_mangle]
pub unsafe extern "C" fn ndnscan_register_stats_callback(cb: StatsCallback) {
    let _ = CALLBACK.set(cb);
}

/// Forwarding recorder. Uses the callback **if** it was registered.
struct FfiRecorder;

/// One registered metric; keeps a NUL-terminated copy of its name.
struct FfiMetric {
    name: Option<CString>,
}

impl FfiMetric {
    fn new(key: &Key) -> Arc<Self> {
        Arc::new(Self { name: CString::new(key.name()).ok() })
    }

    fn emit(&self, value: u64) {
        if let (Some(cb), Some(name)) = (CALLBACK.get(), self.name.as_ref()) {
            unsafe { cb(name.as_ptr(), value as c_ulonglong) };
        }
    }
}

impl Recorder for FfiRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(FfiMetric::new(key))
    }
    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(FfiMetric::new(key))
    }
    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(FfiMetric::new(key))
    }
}

impl metrics::CounterFn for FfiMetric {
    fn increment(&self, value: u64) {
        self.emit(value);
    }
    fn absolute(&self, value: u64) {
        self.emit(value);
    }
}

// Gauges and histograms are truncated to integers for the C side.
impl metrics::GaugeFn for FfiMetric {
    fn set(&self, value: f64) {
        self.emit(value as u64);
    }
    fn increment(&self, value: f64) {
        self.emit(value as u64);
    }
    fn decrement(&self, value: f64) {
        self.emit(value as u64);
    }
}

impl metrics::HistogramFn for FfiMetric {
    fn record(&self, value: f64) {
        self.emit(value as u64);
    }
}

/// Install exactly **once** – called from index constructors.
pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = metrics::set_global_recorder(FfiRecorder);
    });
}

/// Process-wide collector for tests. The callback can be registered only
/// once per process, so every test that inspects metrics goes through here.
#[cfg(test)]
pub(crate) mod test_sink {
    use super::*;
    use once_cell::sync::Lazy;
    use std::collections::HashMap;
    use std::ffi::CStr;
    use std::sync::Mutex;

    // name -> (sum of values, last value)
    static SEEN: Lazy<Mutex<HashMap<String, (u64, u64)>>> = Lazy::new(Default::default);

    unsafe extern "C" fn collect(name: *const c_char, value: c_ulonglong) {
        let name = CStr::from_ptr(name).to_string_lossy().into_owned();
        if let Ok(mut seen) = SEEN.lock() {
            let entry = seen.entry(name).or_default();
            entry.0 += value;
            entry.1 = value;
        }
    }

    pub(crate) fn install() {
        init();
        unsafe { ndnscan_register_stats_callback(collect) };
    }

    pub(crate) fn total(name: &str) -> u64 {
        SEEN.lock().map(|s| s.get(name).map_or(0, |e| e.0)).unwrap_or(0)
    }

    pub(crate) fn last(name: &str) -> Option<u64> {
        SEEN.lock().ok().and_then(|s| s.get(name).map(|e| e.1))
    }
}

#[cfg(test)]
mod tests {
    use super::test_sink;

    #[test]
    fn counters_reach_the_registered_callback() {
        test_sink::install();
        metrics::counter!("ndnscan_telemetry_check").increment(3);
        metrics::counter!("ndnscan_telemetry_check").increment(2);
        assert_eq!(test_sink::total("ndnscan_telemetry_check"), 5);
    }

    #[test]
    fn gauges_report_their_latest_value() {
        test_sink::install();
        metrics::gauge!("ndnscan_telemetry_gauge").set(7.0);
        metrics::gauge!("ndnscan_telemetry_gauge").set(11.0);
        assert_eq!(test_sink::last("ndnscan_telemetry_gauge"), Some(11));
    }
}
