//! Adaptive screencast quality controller.
//!
//! A latency EMA plus a per-tier frame count pick one of four quality tiers.
//! The controller only reports that a tier change is due; the viewer main
//! loop performs the stop/start of the screencast so the restart never runs
//! on the RPC reader path.

/// One quality level paired with a frame-skip ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    /// JPEG quality handed to the screencast start call.
    pub quality: u32,
    /// Capture every n-th compositor frame.
    pub every_nth_frame: u32,
}

/// Quality ladder, worst to best.
pub const TIERS: [Tier; 4] = [
    Tier { quality: 25, every_nth_frame: 3 },
    Tier { quality: 35, every_nth_frame: 2 },
    Tier { quality: 50, every_nth_frame: 2 },
    Tier { quality: 70, every_nth_frame: 1 },
];

const EMA_ALPHA: f64 = 0.2;
/// Upgrade when the EMA sits below this for a full hold period.
const UPGRADE_BELOW_MS: f64 = 50.0;
/// Downgrade when the EMA sits above this for a full hold period.
const DOWNGRADE_ABOVE_MS: f64 = 150.0;
/// Minimum frames between tier changes. Together with the EMA this keeps the
/// tier stable when latency hovers at a threshold.
const HOLD_FRAMES: u32 = 10;
const LATENCY_CLAMP_MS: f64 = 5000.0;
const EMA_INPUT_CLAMP_MS: f64 = 2000.0;

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    tier: usize,
    ema_ms: f64,
    frames_at_tier: u32,
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::new(1)
    }
}

impl AdaptiveController {
    pub fn new(initial_tier: usize) -> Self {
        Self {
            tier: initial_tier.min(TIERS.len() - 1),
            ema_ms: 0.0,
            frames_at_tier: 0,
        }
    }

    pub fn tier(&self) -> usize {
        self.tier
    }

    pub fn params(&self) -> Tier {
        TIERS[self.tier]
    }

    pub fn ema_ms(&self) -> f64 {
        self.ema_ms
    }

    /// Feed one frame observation. `browser_to_now_ms` is the age of the
    /// frame when it reached the pool; `write_latency_ms` is the local blit
    /// cost of the previous render pass.
    ///
    /// Returns the new tier parameters when a change is due; the caller
    /// queues the screencast restart.
    pub fn on_frame(&mut self, browser_to_now_ms: f64, write_latency_ms: f64) -> Option<Tier> {
        let latency = browser_to_now_ms.clamp(0.0, LATENCY_CLAMP_MS) + write_latency_ms;
        let input = latency.clamp(0.0, EMA_INPUT_CLAMP_MS);
        self.ema_ms = (1.0 - EMA_ALPHA) * self.ema_ms + EMA_ALPHA * input;
        self.frames_at_tier += 1;

        if self.frames_at_tier < HOLD_FRAMES {
            return None;
        }
        if self.tier < TIERS.len() - 1 && self.ema_ms < UPGRADE_BELOW_MS {
            self.tier += 1;
            self.frames_at_tier = 0;
            tracing::debug!(target: "frame.adaptive", tier = self.tier, ema_ms = self.ema_ms, "tier upgrade");
            return Some(self.params());
        }
        if self.tier > 0 && self.ema_ms > DOWNGRADE_ABOVE_MS {
            self.tier -= 1;
            self.frames_at_tier = 0;
            tracing::debug!(target: "frame.adaptive", tier = self.tier, ema_ms = self.ema_ms, "tier downgrade");
            return Some(self.params());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_after_hold_period_of_low_latency() {
        let mut ctl = AdaptiveController::new(1);
        let mut changed_at = None;
        for frame in 1..=20 {
            if ctl.on_frame(5.0, 1.0).is_some() {
                changed_at = Some(frame);
                break;
            }
        }
        assert_eq!(changed_at, Some(10), "first eligible frame is the 10th");
        assert_eq!(ctl.tier(), 2);
    }

    #[test]
    fn downgrades_under_sustained_load() {
        let mut ctl = AdaptiveController::new(2);
        let mut changed = None;
        for _ in 0..20 {
            if let Some(t) = ctl.on_frame(300.0, 10.0) {
                changed = Some(t);
                break;
            }
        }
        let tier = changed.expect("downgrade within 20 frames");
        assert_eq!(ctl.tier(), 1);
        assert_eq!(tier, TIERS[1]);
    }

    #[test]
    fn never_changes_tier_within_hold_window_of_a_change() {
        let mut ctl = AdaptiveController::new(2);
        // Drive a downgrade.
        while ctl.on_frame(400.0, 0.0).is_none() {}
        assert_eq!(ctl.tier(), 1);
        // Latency stays terrible, but the next change must wait 10 frames.
        for frame in 1..HOLD_FRAMES {
            assert!(
                ctl.on_frame(400.0, 0.0).is_none(),
                "change {frame} frames after a change violates hysteresis"
            );
        }
        assert!(ctl.on_frame(400.0, 0.0).is_some());
        assert_eq!(ctl.tier(), 0);
    }

    #[test]
    fn tier_zero_and_top_are_terminal_in_their_direction() {
        let mut ctl = AdaptiveController::new(0);
        for _ in 0..30 {
            assert!(ctl.on_frame(1000.0, 0.0).is_none(), "no downgrade below 0");
        }
        let mut ctl = AdaptiveController::new(3);
        for _ in 0..30 {
            assert!(ctl.on_frame(0.0, 0.0).is_none(), "no upgrade above top");
        }
    }

    #[test]
    fn ema_input_is_clamped() {
        let mut ctl = AdaptiveController::new(1);
        ctl.on_frame(f64::MAX, f64::MAX);
        assert!(ctl.ema_ms() <= EMA_INPUT_CLAMP_MS);
        assert!(ctl.ema_ms() > 0.0);
    }

    #[test]
    fn sustained_200ms_downgrades_from_tier_two() {
        let mut ctl = AdaptiveController::new(2);
        let mut restart = None;
        for frame in 1..=20 {
            if let Some(t) = ctl.on_frame(200.0, 0.0) {
                restart = Some((frame, t));
                break;
            }
        }
        let (frame, tier) = restart.expect("restart requested");
        assert!(frame >= 10, "hysteresis holds for at least 10 frames");
        assert_eq!(tier, TIERS[1]);
    }
}
