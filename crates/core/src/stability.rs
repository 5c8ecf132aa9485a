//! Document stability detection
//!
//! Decides when a page held in front of the camera has settled long enough
//! to photograph. Each sampled frame is downscaled to the analysis
//! resolution and compared with the previous sample; a run of consecutive
//! samples at or above the threshold triggers a capture, after which the
//! detector enters a cooldown so the same still page is not captured twice.
//!
//! The detector is clock-agnostic: callers pass the sampling instant, which
//! keeps the cooldown deterministic under test.

use crate::config::StabilityConfig;
use crate::frame::{similarity, VideoFrame};
use crate::Result;
use std::time::Instant;
use tracing::debug;

/// What a single sample tick decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// First frame after (re)enabling; stored as the comparison baseline
    Baseline,
    /// Similarity fell below the threshold; the run counter was reset
    Unstable { score: f64 },
    /// Stable, but the run is not long enough yet
    Accumulating { score: f64, count: u32 },
    /// Inside the post-capture cooldown; no accumulation happens
    CoolingDown { score: f64 },
    /// Run length reached: the caller should capture the full-resolution frame
    Capture { score: f64 },
}

impl SampleOutcome {
    pub fn is_capture(&self) -> bool {
        matches!(self, SampleOutcome::Capture { .. })
    }
}

/// Consecutive-stable-frame detector with post-capture cooldown
#[derive(Debug)]
pub struct StabilityDetector {
    config: StabilityConfig,
    previous: Option<VideoFrame>,
    stable_count: u32,
    cooldown_until: Option<Instant>,
    score: f64,
}

impl StabilityDetector {
    /// Create a detector, rejecting invalid tuning
    pub fn new(config: StabilityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            previous: None,
            stable_count: 0,
            cooldown_until: None,
            score: 0.0,
        })
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Latest similarity score; 0 until two frames have been compared
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Current length of the stable run
    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    /// Whether `now` falls inside the post-capture cooldown
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Feed one full-resolution frame sampled at `now`
    ///
    /// Only the downscaled copy is retained. On [`SampleOutcome::Capture`]
    /// the caller encodes `frame` itself.
    pub fn sample(&mut self, frame: &VideoFrame, now: Instant) -> Result<SampleOutcome> {
        let current = frame.downscale(self.config.analysis_width, self.config.analysis_height)?;

        let score = match self.previous.as_ref() {
            Some(previous) => similarity(&current, previous),
            None => {
                self.previous = Some(current);
                self.score = 0.0;
                return Ok(SampleOutcome::Baseline);
            }
        };
        self.previous = Some(current);
        self.score = score;

        if self.in_cooldown(now) {
            self.stable_count = 0;
            return Ok(SampleOutcome::CoolingDown { score });
        }

        if score < self.config.threshold {
            if self.stable_count > 0 {
                debug!(score, run = self.stable_count, "stable run broken");
            }
            self.stable_count = 0;
            return Ok(SampleOutcome::Unstable { score });
        }

        self.stable_count += 1;
        if self.stable_count < self.config.stable_frame_count {
            return Ok(SampleOutcome::Accumulating {
                score,
                count: self.stable_count,
            });
        }

        self.stable_count = 0;
        self.cooldown_until = Some(now + self.config.cooldown());
        debug!(score, "page settled, capture triggered");
        Ok(SampleOutcome::Capture { score })
    }

    /// Stop detection: drop the baseline, the run and the score
    ///
    /// The cooldown deadline survives so re-enabling cannot immediately
    /// re-capture the page that was just taken.
    pub fn reset(&mut self) {
        self.previous = None;
        self.stable_count = 0;
        self.score = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(200);

    fn detector() -> StabilityDetector {
        StabilityDetector::new(StabilityConfig::default()).unwrap()
    }

    fn grey(level: u8) -> VideoFrame {
        VideoFrame::filled(160, 120, [level, level, level, 255])
    }

    #[test]
    fn test_first_frame_is_baseline() {
        let mut d = detector();
        let outcome = d.sample(&grey(100), Instant::now()).unwrap();
        assert_eq!(outcome, SampleOutcome::Baseline);
        assert_eq!(d.score(), 0.0);
        assert_eq!(d.stable_count(), 0);
    }

    #[test]
    fn test_identical_frames_capture_once_then_cool_down() {
        let mut d = detector();
        let frame = grey(128);
        let start = Instant::now();

        assert_eq!(d.sample(&frame, start).unwrap(), SampleOutcome::Baseline);

        let outcomes: Vec<_> = (1..=4)
            .map(|i| d.sample(&frame, start + TICK * i).unwrap())
            .collect();

        assert_eq!(
            outcomes[0],
            SampleOutcome::Accumulating {
                score: 1.0,
                count: 1
            }
        );
        assert_eq!(
            outcomes[1],
            SampleOutcome::Accumulating {
                score: 1.0,
                count: 2
            }
        );
        assert!(outcomes[2].is_capture());
        assert_eq!(outcomes[3], SampleOutcome::CoolingDown { score: 1.0 });
        assert_eq!(outcomes.iter().filter(|o| o.is_capture()).count(), 1);
    }

    #[test]
    fn test_single_unstable_sample_resets_run() {
        let mut d = detector();
        let start = Instant::now();
        d.sample(&grey(0), start).unwrap();
        d.sample(&grey(0), start + TICK).unwrap();
        d.sample(&grey(0), start + TICK * 2).unwrap();
        assert_eq!(d.stable_count(), 2);

        let outcome = d.sample(&grey(255), start + TICK * 3).unwrap();
        assert!(matches!(outcome, SampleOutcome::Unstable { .. }));
        assert_eq!(d.stable_count(), 0);

        // The broken run has to be rebuilt from scratch.
        let outcome = d.sample(&grey(255), start + TICK * 4).unwrap();
        assert!(matches!(outcome, SampleOutcome::Accumulating { count: 1, .. }));
    }

    #[test]
    fn test_captures_respect_cooldown() {
        let mut d = detector();
        let frame = grey(60);
        let start = Instant::now();
        let mut captures = Vec::new();

        for i in 0..100u32 {
            let now = start + TICK * i;
            if d.sample(&frame, now).unwrap().is_capture() {
                captures.push(now);
            }
        }

        assert!(captures.len() >= 2);
        for pair in captures.windows(2) {
            assert!(pair[1] - pair[0] >= d.config().cooldown());
        }
    }

    #[test]
    fn test_cooldown_blocks_accumulation() {
        let mut d = detector();
        let frame = grey(10);
        let start = Instant::now();
        for i in 0..=3u32 {
            d.sample(&frame, start + TICK * i).unwrap();
        }
        assert!(d.in_cooldown(start + TICK * 4));

        let outcome = d.sample(&frame, start + TICK * 4).unwrap();
        assert_eq!(outcome, SampleOutcome::CoolingDown { score: 1.0 });
        assert_eq!(d.stable_count(), 0);
    }

    #[test]
    fn test_reset_discards_baseline_and_score() {
        let mut d = detector();
        let start = Instant::now();
        d.sample(&grey(5), start).unwrap();
        d.sample(&grey(5), start + TICK).unwrap();
        assert_eq!(d.score(), 1.0);

        d.reset();
        assert_eq!(d.score(), 0.0);
        assert_eq!(d.stable_count(), 0);
        assert_eq!(
            d.sample(&grey(5), start + TICK * 2).unwrap(),
            SampleOutcome::Baseline
        );
    }

    #[test]
    fn test_frames_downscaled_before_comparison() {
        let mut d = detector();
        let start = Instant::now();
        let large = VideoFrame::filled(1920, 1080, [90, 90, 90, 255]);
        let small = VideoFrame::filled(640, 480, [90, 90, 90, 255]);

        d.sample(&large, start).unwrap();
        let outcome = d.sample(&small, start + TICK).unwrap();
        assert!(matches!(outcome, SampleOutcome::Accumulating { count: 1, .. }));
        assert!(d.score() > 0.99);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = StabilityConfig {
            threshold: -0.1,
            ..Default::default()
        };
        assert!(StabilityDetector::new(config).is_err());
    }
}
