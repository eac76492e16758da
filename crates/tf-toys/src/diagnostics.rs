//! Per-trial resource diagnostics. Purely informational.

use std::time::{Duration, Instant};

/// Resident set size of the current process in bytes, where the platform exposes it.
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.trim_start_matches("VmRSS:").trim().trim_end_matches("kB").trim().parse().ok()?;
    Some(kib * 1024)
}

/// Wall time and memory change of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialDiagnostics {
    /// Wall-clock duration.
    pub wall_time: Duration,
    /// Change of resident memory in bytes (`None` if unavailable).
    pub rss_delta: Option<i64>,
}

/// Measures one trial from construction to [`TrialProbe::finish`].
#[derive(Debug)]
pub struct TrialProbe {
    start: Instant,
    rss_start: Option<u64>,
}

impl TrialProbe {
    /// Start measuring.
    pub fn start() -> Self {
        Self { start: Instant::now(), rss_start: resident_memory_bytes() }
    }

    /// Stop measuring.
    pub fn finish(self) -> TrialDiagnostics {
        let rss_delta = match (self.rss_start, resident_memory_bytes()) {
            (Some(a), Some(b)) => Some(b as i64 - a as i64),
            _ => None,
        };
        TrialDiagnostics { wall_time: self.start.elapsed(), rss_delta }
    }
}

/// Totals over all trials of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopDiagnostics {
    /// Number of trials measured.
    pub n_trials: usize,
    /// Summed wall time.
    pub wall_time: Duration,
    /// Summed memory change in bytes, over trials where it was available.
    pub rss_delta: i64,
    /// Whether any trial lacked a memory reading.
    pub rss_incomplete: bool,
}

impl LoopDiagnostics {
    /// Add one trial.
    pub fn record(&mut self, trial: TrialDiagnostics) {
        self.n_trials += 1;
        self.wall_time += trial.wall_time;
        match trial.rss_delta {
            Some(d) => self.rss_delta += d,
            None => self.rss_incomplete = true,
        }
    }

    /// Memory growth in MB per sample-fit sequence.
    pub fn mb_per_trial(&self) -> Option<f64> {
        if self.n_trials == 0 || self.rss_incomplete {
            return None;
        }
        Some(self.rss_delta as f64 / (1024.0 * 1024.0) / self.n_trials as f64)
    }

    /// Wall time in ms per sample-fit sequence.
    pub fn ms_per_trial(&self) -> Option<f64> {
        (self.n_trials > 0).then(|| self.wall_time.as_secs_f64() * 1e3 / self.n_trials as f64)
    }
}
