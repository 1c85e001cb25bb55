use std::time::{Duration, Instant};

/// Intervals per window.
pub const WINDOW_TICKS: usize = 30;
const MAX_HISTORY: usize = 3000;

/// Summary over all completed windows, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JitterStats {
    pub windows: usize,
    pub average_us: f64,
    pub std_dev_us: f64,
    pub highest_us: f64,
}

/// Measures the spacing of display ticks.
#[derive(Debug)]
pub struct JitterMeter {
    name: &'static str,
    last_tick: Option<Instant>,
    ticks: Vec<Duration>,
    window_avg: Vec<f64>,
    window_std_dev: Vec<f64>,
}

impl JitterMeter {
    pub fn new(name: &'static str) -> Self {
        JitterMeter {
            name,
            last_tick: None,
            ticks: Vec::with_capacity(WINDOW_TICKS),
            window_avg: Vec::new(),
            window_std_dev: Vec::new(),
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        if let Some(last) = self.last_tick.replace(now) {
            self.record(now.saturating_duration_since(last));
        }
    }

    fn record(&mut self, interval: Duration) {
        self.ticks.push(interval);
        if self.ticks.len() < WINDOW_TICKS {
            return;
        }

        let n = self.ticks.len() as f64;
        let avg = self.ticks.iter().map(|t| t.as_secs_f64() * 1e6).sum::<f64>() / n;
        let variance = self
            .ticks
            .iter()
            .map(|t| {
                let d = t.as_secs_f64() * 1e6 - avg;
                d * d
            })
            .sum::<f64>()
            / n;
        self.ticks.clear();

        if self.window_avg.len() == MAX_HISTORY {
            self.window_avg.remove(0);
            self.window_std_dev.remove(0);
        }
        self.window_avg.push(avg);
        self.window_std_dev.push(variance.sqrt());
    }

    pub fn stats(&self) -> JitterStats {
        let windows = self.window_avg.len();
        if windows == 0 {
            return JitterStats::default();
        }
        let n = windows as f64;
        JitterStats {
            windows,
            average_us: self.window_avg.iter().sum::<f64>() / n,
            std_dev_us: self.window_std_dev.iter().sum::<f64>() / n,
            highest_us: self.window_avg.iter().cloned().fold(0.0, f64::max),
        }
    }

    pub fn log(&self) {
        let stats = self.stats();
        tracing::info!(
            "{}: {} windows, avg {:.1}us, std dev {:.1}us, highest avg {:.1}us",
            self.name,
            stats.windows,
            stats.average_us,
            stats.std_dev_us,
            stats.highest_us
        );
    }
}
