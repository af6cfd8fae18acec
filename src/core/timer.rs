use std::time::{Duration, Instant};

/// Wall-clock timer for one pipeline stage. Values are reported through the
/// log, never used for control decisions; misuse degrades to a warning.
#[derive(Debug)]
pub struct StageTimer {
    stage: &'static str,
    resolution: u32,
    elapsed: Duration,
    started: Option<Instant>,
}

impl StageTimer {
    fn new(stage: &'static str, resolution: u32) -> Self {
        Self {
            stage,
            resolution,
            elapsed: Duration::ZERO,
            started: None,
        }
    }

    pub fn start(&mut self) {
        if self.started.is_some() {
            log::warn!("{} timer for {} m already running", self.stage, self.resolution);
            return;
        }
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        match self.started.take() {
            Some(t0) => self.elapsed += t0.elapsed(),
            None => log::warn!(
                "{} timer for {} m stopped without being started",
                self.stage,
                self.resolution
            ),
        }
    }

    /// Accumulated time across start/stop cycles
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn log(&self) {
        log::info!(
            "{} m {}: {:.2} s",
            self.resolution,
            self.stage,
            self.elapsed.as_secs_f64()
        );
    }
}

/// Stage timers for one resolution group
#[derive(Debug)]
pub struct PipelineTimer {
    pub load: StageTimer,
    pub composite: StageTimer,
    pub interpolate: StageTimer,
}

impl PipelineTimer {
    pub fn new(resolution: u32) -> Self {
        Self {
            load: StageTimer::new("load", resolution),
            composite: StageTimer::new("composite", resolution),
            interpolate: StageTimer::new("interpolate", resolution),
        }
    }

    /// Report all stage timings
    pub fn log(&self) {
        self.load.log();
        self.composite.log();
        self.interpolate.log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_accumulates() {
        let mut timer = PipelineTimer::new(10);
        timer.composite.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.composite.stop();
        assert!(timer.composite.elapsed() >= Duration::from_millis(5));
        assert_eq!(timer.load.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_unbalanced_stop_is_not_fatal() {
        let mut timer = PipelineTimer::new(20);
        timer.load.stop();
        assert_eq!(timer.load.elapsed(), Duration::ZERO);
    }
}
