use std::time::Duration;

/// Delay schedule indexed by attempt number. Attempts past the end of
/// the schedule reuse the last delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_secs(&[3, 6, 10, 15])
    }
}

impl BackoffPolicy {
    /// An empty schedule falls back to the default one.
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            return Self::default();
        }
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(idx).copied().unwrap_or_default()
    }
}
