//! Host resource sampling.

use std::sync::Mutex;
use std::time::Instant;

/// Live process resource queries.
///
/// Sampling must be cheap; the governor calls it on every acquisition. A
/// `None` reading means "unknown" and never blocks acquisition.
pub trait ResourceProbe: Send + Sync {
    /// Resident memory of the current process in megabytes.
    fn memory_mb(&self) -> Option<f64>;

    /// Process CPU usage in percent since the previous sample.
    fn cpu_percent(&self) -> Option<f64>;
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    at: Instant,
    ticks: u64,
}

/// `/proc`-backed probe for Linux.
///
/// CPU usage is derived from utime+stime deltas between consecutive samples,
/// so the first reading is always `None`.
pub struct ProcProbe {
    last_cpu: Mutex<Option<CpuSample>>,
}

// Common defaults on Linux; exposing these via sysconf is not worth a
// platform-bindings dependency for a coarse pressure signal.
const PAGE_SIZE_BYTES: f64 = 4096.0;
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

impl ProcProbe {
    pub fn new() -> Self {
        Self { last_cpu: Mutex::new(None) }
    }

    #[cfg(target_os = "linux")]
    fn resident_pages() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        statm.split_whitespace().nth(1)?.parse().ok()
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_pages() -> Option<u64> {
        None
    }

    #[cfg(target_os = "linux")]
    fn cpu_ticks() -> Option<u64> {
        let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
        // The comm field may contain spaces; fields are stable after the
        // closing paren. utime and stime are fields 14 and 15, 1-based.
        let rest = stat.rsplit_once(')').map(|(_, r)| r)?;
        let mut fields = rest.split_whitespace();
        let utime: u64 = fields.nth(11)?.parse().ok()?;
        let stime: u64 = fields.next()?.parse().ok()?;
        Some(utime + stime)
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_ticks() -> Option<u64> {
        None
    }
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcProbe {
    fn memory_mb(&self) -> Option<f64> {
        Some(Self::resident_pages()? as f64 * PAGE_SIZE_BYTES / (1024.0 * 1024.0))
    }

    fn cpu_percent(&self) -> Option<f64> {
        let ticks = Self::cpu_ticks()?;
        let now = Instant::now();
        let mut last = self.last_cpu.lock().unwrap();
        let previous = last.replace(CpuSample { at: now, ticks });
        let previous = previous?;

        let elapsed = now.duration_since(previous.at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let busy = ticks.saturating_sub(previous.ticks) as f64 / CLOCK_TICKS_PER_SEC;
        Some((busy / elapsed * 100.0).min(100.0 * num_cpus_estimate()))
    }
}

fn num_cpus_estimate() -> f64 {
    std::thread::available_parallelism().map(|n| n.get() as f64).unwrap_or(1.0)
}

/// Fixed-value probe for tests and simulations.
pub struct StaticProbe {
    memory_mb: Mutex<Option<f64>>,
    cpu_percent: Mutex<Option<f64>>,
}

impl StaticProbe {
    pub fn new(memory_mb: Option<f64>, cpu_percent: Option<f64>) -> Self {
        Self { memory_mb: Mutex::new(memory_mb), cpu_percent: Mutex::new(cpu_percent) }
    }

    pub fn set_memory_mb(&self, value: Option<f64>) {
        *self.memory_mb.lock().unwrap() = value;
    }

    pub fn set_cpu_percent(&self, value: Option<f64>) {
        *self.cpu_percent.lock().unwrap() = value;
    }
}

impl ResourceProbe for StaticProbe {
    fn memory_mb(&self) -> Option<f64> {
        *self.memory_mb.lock().unwrap()
    }

    fn cpu_percent(&self) -> Option<f64> {
        *self.cpu_percent.lock().unwrap()
    }
}
