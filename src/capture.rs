//! TIM2 input capture for the monitored PWM line.
//!
//! TIM2 free-runs over its full 32-bit range at a 1 us tick; channel 1 latches
//! the counter on every transition of the input. The ISR's only duties are to
//! read the latched value, classify the edge and clear the pending condition —
//! the estimator does the rest outside the register layer.
//!
//! The line idles low (pull-down), so edges alternate starting with a rising
//! one. A capture that overwrites an unread one (over-capture) means an edge
//! was lost to interrupt latency; the sequencer restarts from the idle-low
//! assumption and the loss is counted, not reported. The measurement heals on
//! the next full period.

use stm32h7xx_hal::pac;
use stm32h7xx_hal::rcc::rec;
use stm32h7xx_hal::rcc::ResetEnable;

/// Tick rate the capture counter is prescaled to: 1 tick = 1 us.
pub const TICK_HZ: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum EdgePolarity {
    Rising,
    Falling,
}

/// One timestamped transition of the input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub timestamp: u32,
    pub polarity: EdgePolarity,
}

/// Assigns polarities to a stream of both-edge captures by alternation.
pub struct EdgeSequencer {
    next: EdgePolarity,
}

impl EdgeSequencer {
    pub fn new() -> Self {
        Self {
            next: EdgePolarity::Rising,
        }
    }

    pub fn classify(&mut self, timestamp: u32) -> EdgeEvent {
        let polarity = self.next;
        self.next = match polarity {
            EdgePolarity::Rising => EdgePolarity::Falling,
            EdgePolarity::Falling => EdgePolarity::Rising,
        };
        EdgeEvent {
            timestamp,
            polarity,
        }
    }

    /// Back to the idle-low assumption: the next edge is a rising one.
    pub fn reset(&mut self) {
        self.next = EdgePolarity::Rising;
    }
}

impl Default for EdgeSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// What the capture ISR observed when it serviced the interrupt.
pub enum CaptureEvent {
    /// A clean edge.
    Edge(EdgeEvent),
    /// The hardware latched a new capture before the previous one was read;
    /// at least one edge is gone. Carries the surviving (latest) timestamp.
    Overcapture(u32),
}

pub struct PwmCapture {
    tim: pac::TIM2,
    sequencer: EdgeSequencer,
    missed_edges: u32,
}

impl PwmCapture {
    /// Takes ownership of TIM2 and sets it up for both-edge capture on
    /// channel 1. The capture pin must already be switched to its alternate
    /// function; interrupts fire once the NVIC unmasks TIM2.
    pub fn new(tim: pac::TIM2, prec: rec::Tim2, tim_ker_hz: u32) -> Self {
        let _ = prec.enable();

        // Free-running at 1 us per tick over the full 32-bit range.
        tim.psc
            .write(|w| unsafe { w.psc().bits((tim_ker_hz / TICK_HZ - 1) as u16) });
        tim.arr.write(|w| unsafe { w.bits(u32::MAX) });

        // CH1 captures TI1; require a few consecutive samples so contact
        // bounce and glitches shorter than the filter window are ignored.
        tim.ccmr1_input()
            .modify(|_, w| unsafe { w.cc1s().bits(0b01).ic1f().bits(0b0011) });
        // CC1P + CC1NP = both edges.
        tim.ccer.modify(|_, w| {
            w.cc1p().set_bit().cc1np().set_bit().cc1e().set_bit()
        });
        tim.dier.modify(|_, w| w.cc1ie().set_bit());

        tim.egr.write(|w| w.ug().set_bit());
        tim.cr1.modify(|_, w| w.cen().set_bit());

        Self {
            tim,
            sequencer: EdgeSequencer::new(),
            missed_edges: 0,
        }
    }

    /// Service the capture interrupt. Returns `None` on a spurious entry.
    pub fn service(&mut self) -> Option<CaptureEvent> {
        let sr = self.tim.sr.read();
        if !sr.cc1if().bit_is_set() {
            return None;
        }

        let overcaptured = sr.cc1of().bit_is_set();
        if overcaptured {
            self.missed_edges = self.missed_edges.wrapping_add(1);
            // rc_w0: writing zero clears, writing one leaves the rest alone
            self.tim.sr.modify(|_, w| w.cc1of().clear_bit());
            self.sequencer.reset();
        }

        // Reading CCR1 clears CC1IF.
        let timestamp = self.tim.ccr1().read().bits();

        Some(if overcaptured {
            CaptureEvent::Overcapture(timestamp)
        } else {
            CaptureEvent::Edge(self.sequencer.classify(timestamp))
        })
    }

    /// Edges lost to over-capture since startup.
    pub fn missed_edges(&self) -> u32 {
        self.missed_edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarities_alternate_from_rising() {
        let mut seq = EdgeSequencer::new();
        assert_eq!(seq.classify(10).polarity, EdgePolarity::Rising);
        assert_eq!(seq.classify(20).polarity, EdgePolarity::Falling);
        assert_eq!(seq.classify(30).polarity, EdgePolarity::Rising);
    }

    #[test]
    fn reset_restarts_at_rising() {
        let mut seq = EdgeSequencer::new();
        seq.classify(10);
        seq.reset();
        assert_eq!(seq.classify(20).polarity, EdgePolarity::Rising);
    }

    #[test]
    fn timestamps_pass_through_unchanged() {
        let mut seq = EdgeSequencer::new();
        assert_eq!(seq.classify(u32::MAX).timestamp, u32::MAX);
        assert_eq!(seq.classify(0).timestamp, 0);
    }
}
