// ============================================================
// Layer 5 — Stability Detector
// ============================================================
// Decides when per-iteration timing has reached a steady state.
//
// Every ANALYSIS_INTERVAL iterations the timing window is reduced
// to (mean, stddev) and the stddev is turned into a coarse
// fingerprint: its leading digit and how many extra ×10 steps it
// took to reach that digit.
//
//   scaled = stddev × 10, position = 0
//   while trunc(scaled) mod 10 == 0:  scaled ×= 10, position += 1
//   digit = trunc(scaled) mod 10
//
//   0.0456 → 0.456 → 4.56            digit 4, position 1
//   0.456  → 4.56                    digit 4, position 0
//   1.5    → 15                      digit 5, position 0
//
// Timing is declared stable the first time two consecutive ticks
// produce the same fingerprint. A zero (or otherwise unusable)
// stddev produces no fingerprint and leaves the comparison state
// untouched. Whole-number stddevs (1.0, 2.0, 10.0) never reach a
// nonzero digit and also produce none.

use crate::training::timing::TimingRecorder;

/// Iterations between two analysis ticks.
pub const ANALYSIS_INTERVAL: usize = 10;

/// Upper bound on ×10 steps for tiny stddevs.
const MAX_SCALE_STEPS: u32 = 32;

/// Leading-digit fingerprint of a standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub digit: u8,
    pub position: u32,
}

/// Compute the fingerprint of `stddev`; `None` means "no signal".
pub fn fingerprint(stddev: f64) -> Option<Fingerprint> {
    if !stddev.is_finite() || stddev <= 0.0 {
        return None;
    }

    let mut scaled = stddev * 10.0;
    let mut position = 0;
    while scaled.trunc() % 10.0 == 0.0 {
        // An exact multiple of 10 (2.0 → 20 → 200 ...) never reaches a
        // nonzero digit; further steps only surface rounding noise.
        if scaled.fract() == 0.0 {
            return None;
        }
        if position >= MAX_SCALE_STEPS || !scaled.is_finite() {
            return None;
        }
        scaled *= 10.0;
        position += 1;
    }
    if !scaled.is_finite() {
        return None;
    }

    Some(Fingerprint { digit: (scaled.trunc() % 10.0) as u8, position })
}

/// Whether the batch at 0-based run `iteration` is an analysis tick.
pub fn is_analysis_tick(iteration: usize) -> bool {
    (iteration + 1) % ANALYSIS_INTERVAL == 0
}

/// Statistics of the timing window at one analysis tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityWindow {
    pub mean: f64,
    pub stddev: f64,
    pub samples: usize,
}

impl StabilityWindow {
    /// Summarise the recorder; `None` while it holds no samples.
    pub fn measure(recorder: &TimingRecorder) -> Option<Self> {
        let (mean, stddev) = recorder.mean_and_stddev()?;
        Some(Self { mean, stddev, samples: recorder.len() })
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        fingerprint(self.stddev)
    }
}

/// Remembers the previous tick's fingerprint.
#[derive(Debug, Clone, Default)]
pub struct StabilityDetector {
    previous: Option<Fingerprint>,
}

impl StabilityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick. Returns true iff this tick's fingerprint repeats
    /// the previous one.
    pub fn observe(&mut self, window: &StabilityWindow) -> bool {
        let Some(current) = window.fingerprint() else {
            return false;
        };
        let repeated = self.previous == Some(current);
        self.previous = Some(current);
        repeated
    }

    pub fn previous(&self) -> Option<Fingerprint> {
        self.previous
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn window(stddev: f64) -> StabilityWindow {
        StabilityWindow { mean: 0.1, stddev, samples: 9 }
    }

    #[test]
    fn test_fingerprint_table() {
        let table: &[(f64, Option<(u8, u32)>)] = &[
            (0.0456, Some((4, 1))),
            (0.456, Some((4, 0))),
            (0.00789, Some((7, 2))),
            (0.05, Some((5, 1))),
            (0.0999, Some((9, 1))),
            (0.1, Some((1, 0))),
            (1.5, Some((5, 0))),
            (0.0, None),
            (-0.3, None),
            (f64::NAN, None),
            (f64::INFINITY, None),
            (2.0, None),
        ];
        for &(stddev, expected) in table {
            let got = fingerprint(stddev).map(|f| (f.digit, f.position));
            assert_eq!(got, expected, "stddev = {stddev}");
        }
    }

    #[test]
    fn test_whole_number_stddev_has_no_fingerprint() {
        for stddev in [1.0, 2.0, 5.0, 10.0, 30.0, 100.0] {
            assert_eq!(fingerprint(stddev), None, "stddev = {stddev}");
        }
        assert_eq!(fingerprint(2.5).map(|f| (f.digit, f.position)), Some((5, 0)));
    }

    #[test]
    fn test_whole_number_stddev_never_signals_stability() {
        let mut detector = StabilityDetector::new();
        assert!(!detector.observe(&window(2.0)));
        assert!(!detector.observe(&window(2.0)));
        assert_eq!(detector.previous(), None);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        for stddev in [0.0123, 0.3, 0.000042, 7.25] {
            assert_eq!(fingerprint(stddev), fingerprint(stddev));
        }
    }

    #[test]
    fn test_tiny_stddev_still_has_a_fingerprint() {
        let fp = fingerprint(3.5e-12).unwrap();
        assert_eq!(fp.digit, 3);
        assert_eq!(fp.position, 11);
    }

    #[test]
    fn test_first_tick_never_triggers() {
        let mut detector = StabilityDetector::new();
        assert!(!detector.observe(&window(0.0456)));
        assert_eq!(detector.previous(), Some(Fingerprint { digit: 4, position: 1 }));
    }

    #[test]
    fn test_two_equal_ticks_trigger() {
        let mut detector = StabilityDetector::new();
        assert!(!detector.observe(&window(0.0456)));
        // Different value, same leading digit and position
        assert!(detector.observe(&window(0.0412)));
    }

    #[test]
    fn test_changed_fingerprint_resets_comparison() {
        let mut detector = StabilityDetector::new();
        assert!(!detector.observe(&window(0.0456)));
        assert!(!detector.observe(&window(0.0356)));
        assert!(!detector.observe(&window(0.00356)));
        assert!(detector.observe(&window(0.00399)));
    }

    #[test]
    fn test_zero_stddev_is_skipped_without_reset() {
        let mut detector = StabilityDetector::new();
        assert!(!detector.observe(&window(0.0456)));
        assert!(!detector.observe(&window(0.0)));
        assert_eq!(detector.previous(), Some(Fingerprint { digit: 4, position: 1 }));
        assert!(detector.observe(&window(0.0481)));
    }

    #[test]
    fn test_analysis_cadence() {
        let ticks: Vec<usize> = (0..35).filter(|&i| is_analysis_tick(i)).collect();
        assert_eq!(ticks, vec![9, 19, 29]);
    }

    #[test]
    fn test_window_from_recorder() {
        use crate::domain::timing::IterationTiming;

        let mut rec = TimingRecorder::new(10);
        assert_eq!(StabilityWindow::measure(&rec), None);
        for (i, s) in [0.1, 0.3].into_iter().enumerate() {
            rec.record(IterationTiming { epoch: 0, batch_index: i, iteration: i, duration_seconds: s });
        }
        let w = StabilityWindow::measure(&rec).unwrap();
        assert_eq!(w.samples, 2);
        assert!((w.mean - 0.2).abs() < 1e-12);
        assert!((w.stddev - 0.1).abs() < 1e-12);
    }
}
