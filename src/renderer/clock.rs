//! Frame pacing
//!
//! Every method takes the current time explicitly so the event loop and the
//! tests agree on what "now" means.

use std::time::{Duration, Instant};

/// Refresh used when an output reports none (mHz)
pub const DEFAULT_REFRESH_MHZ: u32 = 60_000;

/// Tracks when the next frame is due and how fast frames are going out
#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    epoch: Instant,
    last_frame: Option<Instant>,
    frames_since_sample: u64,
    sample_start: Instant,
    fps: f64,
    frame: u64,
}

impl FrameClock {
    /// Create a clock ticking at `refresh_mhz` (60000 = 60 Hz)
    pub fn new(refresh_mhz: u32, now: Instant) -> Self {
        Self {
            interval: interval_for(refresh_mhz),
            epoch: now,
            last_frame: None,
            frames_since_sample: 0,
            sample_start: now,
            fps: 0.0,
            frame: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Follow the fastest output after a mode change
    pub fn set_refresh(&mut self, refresh_mhz: u32) {
        self.interval = interval_for(refresh_mhz);
    }

    /// Whether a full interval has passed since the last frame
    pub fn should_render(&self, now: Instant) -> bool {
        self.time_until_next(now).is_zero()
    }

    pub fn time_until_next(&self, now: Instant) -> Duration {
        match self.last_frame {
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Start a frame and return its number
    pub fn begin_frame(&mut self, now: Instant) -> u64 {
        self.frame += 1;
        self.frames_since_sample += 1;
        self.last_frame = Some(now);
        self.frame
    }

    /// Finish a frame; the fps estimate is refreshed once per second
    pub fn end_frame(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.sample_start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames_since_sample as f64 / elapsed.as_secs_f64();
            self.frames_since_sample = 0;
            self.sample_start = now;
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Millisecond timestamp for wl_callback.done, wrapping at u32
    pub fn timestamp_ms(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.epoch).as_millis() as u32
    }
}

fn interval_for(refresh_mhz: u32) -> Duration {
    let refresh = if refresh_mhz == 0 {
        DEFAULT_REFRESH_MHZ
    } else {
        refresh_mhz
    };
    Duration::from_nanos(1_000_000_000_000 / refresh as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_refresh() {
        let now = Instant::now();
        assert_eq!(
            FrameClock::new(60_000, now).interval(),
            Duration::from_nanos(16_666_666)
        );
        assert_eq!(
            FrameClock::new(120_000, now).interval(),
            Duration::from_nanos(8_333_333)
        );
        // Unknown refresh falls back to 60Hz
        assert_eq!(
            FrameClock::new(0, now).interval(),
            FrameClock::new(60_000, now).interval()
        );
    }

    #[test]
    fn test_pacing() {
        let start = Instant::now();
        let mut clock = FrameClock::new(60_000, start);
        assert!(clock.should_render(start));

        assert_eq!(clock.begin_frame(start), 1);
        clock.end_frame(start);
        assert!(!clock.should_render(start + Duration::from_millis(10)));
        assert_eq!(
            clock.time_until_next(start + Duration::from_millis(10)),
            clock.interval() - Duration::from_millis(10)
        );
        assert!(clock.should_render(start + Duration::from_millis(17)));
    }

    #[test]
    fn test_fps_sampled_each_second() {
        let start = Instant::now();
        let mut clock = FrameClock::new(60_000, start);
        for i in 0..30 {
            let t = start + Duration::from_millis(i * 33);
            clock.begin_frame(t);
            clock.end_frame(t);
        }
        assert_eq!(clock.fps(), 0.0);

        let t = start + Duration::from_secs(1);
        clock.begin_frame(t);
        clock.end_frame(t);
        assert!((clock.fps() - 31.0).abs() < 0.01);
    }

    #[test]
    fn test_timestamp_relative_to_creation() {
        let start = Instant::now();
        let clock = FrameClock::new(60_000, start);
        assert_eq!(clock.timestamp_ms(start + Duration::from_millis(1500)), 1500);
    }
}
