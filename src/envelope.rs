//! Trapezoid envelope playback: rise to a peak, hold, fall back, settle.
//!
//! The legacy deployment read its parameters as a byte-packed control word
//! from a fixed memory address; here the word decodes into a plain struct
//! with named fields. Times are in milliseconds per step, the peak is the raw
//! output level to climb to.

/// Byte layout of the legacy control word, low byte first:
/// peak level, hold time, rise time, fall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeConfig {
    pub peak: u16,
    pub hold_ms: u32,
    pub rise_step_ms: u32,
    pub fall_step_ms: u32,
}

impl EnvelopeConfig {
    pub const fn from_word(word: u32) -> Self {
        Self {
            peak: (word & 0xFF) as u16,
            hold_ms: (word >> 8) & 0xFF,
            rise_step_ms: (word >> 16) & 0xFF,
            fall_step_ms: (word >> 24) & 0xFF,
        }
    }
}

/// One output level and how long to sit on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeStep {
    pub level: u16,
    pub hold_ms: u32,
}

/// Iterator over one full envelope: `0..peak` rising one level per
/// `rise_step_ms`, the peak held for `hold_ms`, `peak-1..=1` falling one
/// level per `fall_step_ms`, then a settle at zero for `hold_ms`.
pub struct EnvelopeGenerator {
    config: EnvelopeConfig,
    phase: Phase,
    level: u16,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Rise,
    Hold,
    Fall,
    Settle,
    Done,
}

impl EnvelopeGenerator {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config,
            phase: Phase::Rise,
            level: 0,
        }
    }
}

impl Iterator for EnvelopeGenerator {
    type Item = EnvelopeStep;

    fn next(&mut self) -> Option<EnvelopeStep> {
        match self.phase {
            Phase::Rise => {
                let step = EnvelopeStep {
                    level: self.level,
                    hold_ms: self.config.rise_step_ms,
                };
                self.level += 1;
                if self.level >= self.config.peak {
                    self.phase = Phase::Hold;
                }
                Some(step)
            }
            Phase::Hold => {
                self.level = self.config.peak.saturating_sub(1);
                self.phase = if self.level == 0 {
                    Phase::Settle
                } else {
                    Phase::Fall
                };
                Some(EnvelopeStep {
                    level: self.config.peak,
                    hold_ms: self.config.hold_ms,
                })
            }
            Phase::Fall => {
                let step = EnvelopeStep {
                    level: self.level,
                    hold_ms: self.config.fall_step_ms,
                };
                self.level -= 1;
                if self.level == 0 {
                    self.phase = Phase::Settle;
                }
                Some(step)
            }
            Phase::Settle => {
                self.phase = Phase::Done;
                Some(EnvelopeStep {
                    level: 0,
                    hold_ms: self.config.hold_ms,
                })
            }
            Phase::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_word_unpacks_byte_by_byte() {
        let config = EnvelopeConfig::from_word(0x0405_02FF);
        assert_eq!(
            config,
            EnvelopeConfig {
                peak: 255,
                hold_ms: 2,
                rise_step_ms: 5,
                fall_step_ms: 4,
            }
        );
    }

    #[test]
    fn full_envelope_sequence() {
        let config = EnvelopeConfig {
            peak: 3,
            hold_ms: 10,
            rise_step_ms: 2,
            fall_step_ms: 1,
        };
        let steps: Vec<EnvelopeStep> = EnvelopeGenerator::new(config).collect();
        let expected = [
            (0, 2),
            (1, 2),
            (2, 2), // rise
            (3, 10), // hold at peak
            (2, 1),
            (1, 1), // fall
            (0, 10), // settle
        ];
        assert_eq!(steps.len(), expected.len());
        for (step, &(level, hold_ms)) in steps.iter().zip(expected.iter()) {
            assert_eq!((step.level, step.hold_ms), (level, hold_ms));
        }
    }

    #[test]
    fn zero_peak_degenerates_to_hold_and_settle() {
        let config = EnvelopeConfig {
            peak: 0,
            hold_ms: 4,
            rise_step_ms: 1,
            fall_step_ms: 1,
        };
        let steps: Vec<EnvelopeStep> = EnvelopeGenerator::new(config).collect();
        assert_eq!(steps.first().map(|s| s.level), Some(0));
        assert!(steps.iter().all(|s| s.level == 0));
    }
}
