use std::time::Duration;

use tokio::time::Instant;

/// Media position tracked against the runtime clock: accumulates while
/// running, freezes while paused.
#[derive(Debug)]
pub struct Timer {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.start_time = None;
        self.elapsed = Duration::ZERO;
    }

    pub(crate) fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    pub(crate) fn pause(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        match self.start_time {
            Some(start) => self.elapsed + start.elapsed(),
            None => self.elapsed,
        }
    }

    pub(crate) fn seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Jumps to `seconds`. Negative or non-finite positions clamp to zero.
    pub(crate) fn set_seconds(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };
        self.elapsed = Duration::from_secs_f64(seconds);

        if self.start_time.is_some() {
            self.start_time = Some(Instant::now());
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn resume_accumulates_time() {
        let mut timer = Timer::new();

        timer.start();
        advance(Duration::from_millis(1500)).await;
        timer.pause();
        assert_eq!(timer.elapsed(), Duration::from_millis(1500));

        timer.start();
        advance(Duration::from_millis(500)).await;
        assert_eq!(timer.seconds(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_time_accumulation() {
        let mut timer = Timer::new();

        timer.start();
        advance(Duration::from_secs(1)).await;
        timer.pause();
        advance(Duration::from_secs(5)).await;

        assert!(!timer.is_running());
        assert_eq!(timer.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn seeking_while_running_restarts_from_new_position() {
        let mut timer = Timer::new();

        timer.start();
        advance(Duration::from_secs(3)).await;
        timer.set_seconds(60.0);
        advance(Duration::from_secs(2)).await;

        assert_eq!(timer.seconds(), 62.0);
    }

    #[test]
    fn invalid_positions_clamp_to_zero() {
        let mut timer = Timer::new();

        timer.set_seconds(-4.0);
        assert_eq!(timer.seconds(), 0.0);

        timer.set_seconds(f64::NAN);
        assert_eq!(timer.seconds(), 0.0);

        timer.set_seconds(10.0);
        timer.clear();
        assert_eq!(timer.seconds(), 0.0);
    }
}
