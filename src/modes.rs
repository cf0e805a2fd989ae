//! Waveform/rate mode table and the arbiter that walks it.
//!
//! An external trigger advances the mode counter modulo the table and hands
//! the streaming driver a freshly built descriptor. The arbiter also owns the
//! estimator-driven retune: the smoothed duty bends the current mode's base
//! frequency over one octave, so the synthesized wave audibly follows the
//! measured input.

use micromath::F32Ext;

use crate::streaming::{SampleRate, StreamingDescriptor};
use crate::waveform::{WAVEFORM_LEN, WaveformTable};

/// Frequency ratio across the full duty range (half an octave either side of
/// the 50 % midpoint).
const RETUNE_SPAN: f32 = 2.0;

/// Ignore retunes that would move the update period by less than 1/64
/// (~1.6 %) — not worth tearing the circular stream down for.
const RETUNE_DEADBAND_SHIFT: u32 = 6;

/// One selectable playback personality: which table, at what base frequency.
#[derive(Clone, Copy)]
pub struct PlaybackMode {
    pub table: &'static WaveformTable,
    pub base_wave_hz: f32,
}

pub struct ModeArbiter<const M: usize> {
    modes: [PlaybackMode; M],
    current: usize,
    tim_ker_hz: u32,
    programmed: SampleRate,
}

impl<const M: usize> ModeArbiter<M> {
    pub fn new(modes: [PlaybackMode; M], tim_ker_hz: u32) -> Self {
        let programmed = rate_for(tim_ker_hz, tuned_hz(modes[0].base_wave_hz, 50));
        Self {
            modes,
            current: 0,
            tim_ker_hz,
            programmed,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Descriptor for whatever is currently programmed.
    pub fn descriptor(&self) -> StreamingDescriptor {
        StreamingDescriptor {
            table: self.modes[self.current].table,
            rate: self.programmed,
        }
    }

    /// Advance to the next mode (wrapping) and reset the retune baseline to
    /// the new mode's base frequency.
    pub fn advance(&mut self) -> StreamingDescriptor {
        self.current = (self.current + 1) % M;
        self.programmed = rate_for(
            self.tim_ker_hz,
            tuned_hz(self.modes[self.current].base_wave_hz, 50),
        );
        self.descriptor()
    }

    /// Bend the playback rate to the smoothed duty. Returns a replacement
    /// descriptor only when the change clears the dead band, so callers
    /// reconfigure the stream exactly as often as necessary.
    pub fn retune(&mut self, average_duty: u32) -> Option<StreamingDescriptor> {
        let rate = rate_for(
            self.tim_ker_hz,
            tuned_hz(self.modes[self.current].base_wave_hz, average_duty),
        );
        let old = self.programmed.period_ticks;
        let delta = rate.period_ticks.abs_diff(old);
        if delta <= old >> RETUNE_DEADBAND_SHIFT {
            return None;
        }
        self.programmed = rate;
        Some(self.descriptor())
    }
}

/// Duty 0 plays half the base frequency, duty 50 the base, duty 100 double —
/// the exponential knob curve, not a linear one.
fn tuned_hz(base_wave_hz: f32, average_duty: u32) -> f32 {
    let norm = average_duty.min(100) as f32 / 100.0;
    base_wave_hz * RETUNE_SPAN.powf(norm - 0.5)
}

fn rate_for(tim_ker_hz: u32, wave_hz: f32) -> SampleRate {
    let sample_hz = (wave_hz * WAVEFORM_LEN as f32) as u32;
    SampleRate::from_sample_hz(tim_ker_hz, sample_hz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform;

    const TIM_KER_HZ: u32 = 200_000_000;

    static TRIANGLE: WaveformTable = waveform::triangle(4095);
    static SAWTOOTH: WaveformTable = waveform::sawtooth(4095);
    static SQUARE: WaveformTable = waveform::square(4095);

    fn arbiter() -> ModeArbiter<3> {
        ModeArbiter::new(
            [
                PlaybackMode {
                    table: &TRIANGLE,
                    base_wave_hz: 60.0,
                },
                PlaybackMode {
                    table: &SAWTOOTH,
                    base_wave_hz: 120.0,
                },
                PlaybackMode {
                    table: &SQUARE,
                    base_wave_hz: 450.0,
                },
            ],
            TIM_KER_HZ,
        )
    }

    #[test]
    fn three_triggers_cycle_back_to_the_first_mode() {
        let mut arb = arbiter();
        assert_eq!(arb.current_index(), 0);

        let second = arb.advance();
        assert_eq!(arb.current_index(), 1);
        assert!(core::ptr::eq(second.table, &SAWTOOTH));

        let third = arb.advance();
        assert_eq!(arb.current_index(), 2);
        assert!(core::ptr::eq(third.table, &SQUARE));

        let first_again = arb.advance();
        assert_eq!(arb.current_index(), 0);
        assert!(core::ptr::eq(first_again.table, &TRIANGLE));
    }

    #[test]
    fn faster_base_means_shorter_period() {
        let mut arb = arbiter();
        let triangle = arb.descriptor();
        let sawtooth = arb.advance();
        assert!(sawtooth.rate.period_ticks < triangle.rate.period_ticks);
    }

    #[test]
    fn midpoint_duty_is_the_baseline() {
        let mut arb = arbiter();
        assert_eq!(arb.retune(50), None);
    }

    #[test]
    fn high_duty_speeds_playback_up() {
        let mut arb = arbiter();
        let before = arb.descriptor().rate.period_ticks;
        let retuned = arb.retune(100).expect("full duty clears the dead band");
        assert!(retuned.rate.period_ticks < before);
        // Same duty again: nothing changed, nothing to reconfigure.
        assert_eq!(arb.retune(100), None);
    }

    #[test]
    fn low_duty_slows_playback_down() {
        let mut arb = arbiter();
        let before = arb.descriptor().rate.period_ticks;
        let retuned = arb.retune(0).expect("zero duty clears the dead band");
        assert!(retuned.rate.period_ticks > before);
    }

    #[test]
    fn mode_switch_resets_the_retune_baseline() {
        let mut arb = arbiter();
        arb.retune(100);
        arb.advance();
        assert_eq!(arb.retune(50), None);
    }

    #[test]
    fn pass_through_duty_clamps_into_the_curve() {
        let mut arb = arbiter();
        let at_hundred = arb.retune(100).unwrap().rate;
        let mut arb = arbiter();
        let beyond = arb.retune(130).unwrap().rate;
        assert_eq!(at_hundred, beyond);
    }
}
