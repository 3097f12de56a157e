use std::time::{Duration, Instant};

/// Frames-per-second counter averaged over fixed sample windows.
///
/// Call [`FpsCounter::tick`] once per presented frame. A new reading is
/// produced each time the window elapses; between readings the last one is
/// kept.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    window_start: Instant,
    frames_in_window: u32,
    total_frames: u64,
    fps: f64,
}

impl FpsCounter {
    /// Counter producing one reading per second.
    pub fn new() -> Self {
        Self::with_window(Instant::now(), Duration::from_secs(1))
    }

    pub fn with_window(start: Instant, window: Duration) -> Self {
        debug_assert!(!window.is_zero());
        Self { window, window_start: start, frames_in_window: 0, total_frames: 0, fps: 0.0 }
    }

    /// Counts one frame at `now`. Returns the new reading when a window closes.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames_in_window += 1;
        self.total_frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.fps = self.frames_in_window as f64 / elapsed.as_secs_f64();
        self.frames_in_window = 0;
        self.window_start = now;
        Some(self.fps)
    }

    /// Last reading; 0 before the first window closes.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Window title with size and frame rate appended.
pub fn format_title(title: &str, width: u32, height: u32, fps: f64) -> String {
    format!("{title} | Window Size: {width}x{height} | FPS: {fps:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_arrives_once_per_window() {
        let start = Instant::now();
        let mut fps = FpsCounter::with_window(start, Duration::from_secs(1));
        for i in 1..60 {
            assert_eq!(fps.tick(start + Duration::from_millis(i * 16)), None);
        }
        let reading = fps.tick(start + Duration::from_secs(1)).unwrap();
        assert!((reading - 60.0).abs() < 1e-9);
        assert_eq!(fps.total_frames(), 60);
        assert_eq!(fps.tick(start + Duration::from_millis(1100)), None);
    }

    #[test]
    fn title_has_size_and_two_decimals() {
        assert_eq!(
            format_title("Ember", 1280, 720, 59.941),
            "Ember | Window Size: 1280x720 | FPS: 59.94"
        );
    }
}
