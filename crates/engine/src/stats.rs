use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Frame timing shown in the overlay.
///
/// FPS is recomputed once per window of at least one second so the number stays readable.
#[derive(Debug, Clone)]
pub struct FrameStats {
    last_tick: Option<Instant>,
    window_start: Option<Instant>,
    frames_in_window: u32,
    frame_time: Duration,
    fps: f32,
    total_frames: u64,
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            last_tick: None,
            window_start: None,
            frames_in_window: 0,
            frame_time: Duration::ZERO,
            fps: 0.0,
            total_frames: 0,
        }
    }

    /// Records a frame that ended at `now`.
    pub fn tick(&mut self, now: Instant) {
        if let Some(last) = self.last_tick {
            self.frame_time = now.saturating_duration_since(last);
        }
        self.last_tick = Some(now);
        self.total_frames += 1;

        let start = *self.window_start.get_or_insert(now);
        self.frames_in_window += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed >= FPS_WINDOW {
            self.fps = self.frames_in_window as f32 / elapsed.as_secs_f32();
            self.frames_in_window = 0;
            self.window_start = Some(now);
        }
    }

    /// Forgets the previous tick and the readings taken before it, e.g. after the window was
    /// minimised. The total frame count is kept.
    pub fn reset(&mut self) {
        self.last_tick = None;
        self.window_start = None;
        self.frames_in_window = 0;
        self.frame_time = Duration::ZERO;
        self.fps = 0.0;
    }

    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time.as_secs_f32() * 1000.0
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_no_frame_time() {
        let mut stats = FrameStats::new();
        stats.tick(Instant::now());
        assert_eq!(stats.frame_time_ms(), 0.0);
        assert_eq!(stats.total_frames(), 1);
        assert_eq!(stats.fps(), 0.0);
    }

    #[test]
    fn frame_time_is_delta_between_ticks() {
        let start = Instant::now();
        let mut stats = FrameStats::new();
        stats.tick(start);
        stats.tick(start + Duration::from_millis(16));
        assert!((stats.frame_time_ms() - 16.0).abs() < 0.01);
    }

    #[test]
    fn fps_is_averaged_over_one_second() {
        let start = Instant::now();
        let mut stats = FrameStats::new();
        // 61 ticks 1/60 s apart span exactly one second
        for i in 0..=60 {
            stats.tick(start + Duration::from_secs(1) * i / 60);
        }
        assert!((stats.fps() - 61.0).abs() < 0.5, "fps = {}", stats.fps());
    }

    #[test]
    fn fps_holds_until_window_completes() {
        let start = Instant::now();
        let mut stats = FrameStats::new();
        stats.tick(start);
        stats.tick(start + Duration::from_millis(1000));
        let fps = stats.fps();
        assert!((fps - 2.0).abs() < 0.01);

        stats.tick(start + Duration::from_millis(1500));
        assert_eq!(stats.fps(), fps);
    }

    #[test]
    fn reset_drops_stale_delta() {
        let start = Instant::now();
        let mut stats = FrameStats::new();
        stats.tick(start);
        stats.tick(start + Duration::from_millis(16));
        stats.tick(start + Duration::from_millis(1016));
        assert!(stats.fps() > 0.0);

        stats.reset();
        assert_eq!(stats.frame_time_ms(), 0.0);
        assert_eq!(stats.fps(), 0.0);

        // the 10 s gap spent minimised is not reported as a frame time
        stats.tick(start + Duration::from_secs(10));
        assert_eq!(stats.frame_time_ms(), 0.0);
        assert_eq!(stats.total_frames(), 4);

        stats.tick(start + Duration::from_millis(10_020));
        assert!((stats.frame_time_ms() - 20.0).abs() < 0.01);
    }
}
