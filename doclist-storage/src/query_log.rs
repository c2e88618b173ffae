use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Times statements and logs them, loudly when they are slow or when the
/// caller asked for debug output.
#[derive(Debug, Clone)]
pub struct QueryLogger {
    threshold: Duration,
}

impl Default for QueryLogger {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl QueryLogger {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn from_millis(threshold_ms: u64) -> Self {
        Self::new(Duration::from_millis(threshold_ms))
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn log_query(&self, query: &str, duration: Duration, result: &str, debug: bool) {
        if duration >= self.threshold {
            warn!(
                target: "slow_query",
                query = %query,
                duration_ms = duration.as_millis(),
                result = %result,
                "Slow query detected"
            );
        } else if debug {
            info!(
                target: "query",
                query = %query,
                duration_ms = duration.as_millis(),
                result = %result,
                "Query executed"
            );
        } else {
            debug!(
                target: "query",
                query = %query,
                duration_ms = duration.as_millis(),
                result = %result,
                "Query executed"
            );
        }
    }

    /// Runs `f` and logs `query` with its duration and outcome.
    pub async fn track<F, T, E>(&self, query: &str, debug: bool, f: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = f.await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.log_query(query, start.elapsed(), outcome, debug);
        result
    }
}
