//! Free-running waveform playback: DMA1 copies table samples into the DAC
//! holding register, one per TIM6 trigger, with no CPU work per sample.
//!
//! The stream is circular — after the last sample the transfer wraps to the
//! start of the table and playback loops forever. Rate pacing goes through
//! TIM6's update trigger output into the DAC, which raises a DMA request for
//! the next sample on every conversion; this reproduces the reference DAC's
//! counter mode ("fire exactly once per configured tick interval, repeating").
//!
//! All reconfiguration funnels through [`WaveStreamer::reconfigure`], which
//! stops the in-flight transfer, waits for the stream to actually disable,
//! reprograms source/length/rate from a freshly built descriptor and only
//! then re-enables. There is no other mutation path, so touching a live
//! transfer is impossible by construction.

use stm32h7xx_hal::pac;
use stm32h7xx_hal::rcc::rec;
use stm32h7xx_hal::rcc::ResetEnable;

use crate::waveform::{WAVEFORM_LEN, WaveformTable};

/// DMAMUX1 request line for DAC channel 1.
const DAC_CH1_DMA_REQUEST: u8 = 67;

/// DAC channel 1 trigger selection: TIM6 TRGO.
const TRIGGER_TIM6_TRGO: u8 = 5;

/// Update period of the streamed output, in timer kernel-clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRate {
    pub period_ticks: u32,
}

impl SampleRate {
    /// Period for a given per-sample update frequency.
    pub fn from_sample_hz(tim_ker_hz: u32, sample_hz: u32) -> Self {
        Self {
            period_ticks: (tim_ker_hz / sample_hz.max(1)).max(1),
        }
    }
}

/// Everything one transfer needs: which table, how fast. Built as a value and
/// swapped in whole; never mutated while a transfer is running.
#[derive(Clone, Copy)]
pub struct StreamingDescriptor {
    pub table: &'static WaveformTable,
    pub rate: SampleRate,
}

impl PartialEq for StreamingDescriptor {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.table, other.table) && self.rate == other.rate
    }
}

impl core::fmt::Debug for StreamingDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamingDescriptor")
            .field("table", &self.table.as_ptr())
            .field("rate", &self.rate)
            .finish()
    }
}

/// Split an update period into 16-bit prescaler and reload values,
/// `(psc + 1) * (arr + 1)` as close to the period as the split allows.
pub fn timer_divider(period_ticks: u32) -> (u16, u16) {
    let period = period_ticks.max(1);
    let mut div = 1u32;
    while period / div > 0x1_0000 {
        div += 1;
    }
    let psc = (div - 1) as u16;
    let arr = (period / div - 1) as u16;
    (psc, arr)
}

pub struct WaveStreamer {
    dma: pac::DMA1,
    dac: pac::DAC,
    tim: pac::TIM6,
    current: StreamingDescriptor,
}

impl WaveStreamer {
    /// Takes ownership of the transfer hardware and programs the initial
    /// descriptor. Nothing moves until [`start`](Self::start).
    ///
    /// The DAC pin must already be in analog mode.
    pub fn new(
        dma: pac::DMA1,
        mux: pac::DMAMUX1,
        dac: pac::DAC,
        tim: pac::TIM6,
        prec: (rec::Dma1, rec::Dac12, rec::Tim6),
        descriptor: StreamingDescriptor,
    ) -> Self {
        let (dma_prec, dac_prec, tim_prec) = prec;
        let _ = dma_prec.enable();
        let _ = dac_prec.enable();
        let _ = tim_prec.enable();

        // Route the DAC channel 1 request to DMA1 stream 0.
        mux.ccr[0].modify(|_, w| unsafe { w.dmareq_id().bits(DAC_CH1_DMA_REQUEST) });

        // DAC channel 1: externally triggered by TIM6 TRGO, raising a DMA
        // request per conversion.
        dac.cr.modify(|_, w| unsafe {
            w.ten1()
                .set_bit()
                .tsel1()
                .bits(TRIGGER_TIM6_TRGO)
                .dmaen1()
                .set_bit()
        });
        dac.cr.modify(|_, w| w.en1().set_bit());
        // Rest at zero until the stream starts.
        dac.dhr12r1.write(|w| unsafe { w.dacc1dhr().bits(0) });

        // TIM6: trigger output on update events.
        tim.cr2.modify(|_, w| unsafe { w.mms().bits(0b010) });

        let mut streamer = Self {
            dma,
            dac,
            tim,
            current: descriptor,
        };
        streamer.program(descriptor);
        streamer
    }

    /// Enable the programmed transfer: stream first, then the pacing timer.
    pub fn start(&mut self) {
        self.dma.st[0].cr.modify(|_, w| w.en().set_bit());
        self.tim.cnt.reset();
        self.tim.cr1.modify(|_, w| w.cen().set_bit());
    }

    /// Full stop → reprogram → restart cycle for a replacement descriptor.
    pub fn reconfigure(&mut self, next: StreamingDescriptor) {
        self.stop();
        self.program(next);
        self.start();
    }

    /// The descriptor currently programmed into the hardware.
    pub fn descriptor(&self) -> StreamingDescriptor {
        self.current
    }

    fn stop(&mut self) {
        // Stop the trigger source before the stream so no request arrives
        // between the two.
        self.tim.cr1.modify(|_, w| w.cen().clear_bit());
        self.dma.st[0].cr.modify(|_, w| w.en().clear_bit());
        // The stream stays busy until the in-flight beat drains.
        while self.dma.st[0].cr.read().en().bit_is_set() {}
        // Clear stream 0 flags before reprogramming.
        self.dma.lifcr.write(|w| {
            w.ctcif0()
                .set_bit()
                .chtif0()
                .set_bit()
                .cteif0()
                .set_bit()
                .cdmeif0()
                .set_bit()
                .cfeif0()
                .set_bit()
        });
    }

    /// Program source, length, destination and rate. Only ever called with
    /// the stream disabled.
    fn program(&mut self, descriptor: StreamingDescriptor) {
        let stream = &self.dma.st[0];

        // Memory-to-peripheral, 16-bit samples into the 32-bit holding
        // register, incrementing source, fixed destination, circular.
        stream.cr.write(|w| unsafe {
            w.dir()
                .bits(0b01)
                .minc()
                .set_bit()
                .pinc()
                .clear_bit()
                .msize()
                .bits(0b01)
                .psize()
                .bits(0b10)
                .circ()
                .set_bit()
                .pl()
                .bits(0b10)
        });
        stream
            .ndtr
            .write(|w| unsafe { w.ndt().bits(WAVEFORM_LEN as u16) });
        stream
            .par
            .write(|w| unsafe { w.bits(self.dac.dhr12r1.as_ptr() as u32) });
        stream
            .m0ar
            .write(|w| unsafe { w.bits(descriptor.table.as_ptr() as u32) });

        let (psc, arr) = timer_divider(descriptor.rate.period_ticks);
        self.tim.psc.write(|w| unsafe { w.psc().bits(psc) });
        self.tim.arr.write(|w| unsafe { w.arr().bits(arr) });
        // Push the new prescaler/reload through immediately.
        self.tim.egr.write(|w| w.ug().set_bit());

        self.current = descriptor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform;

    static TABLE_A: WaveformTable = waveform::triangle(4095);
    static TABLE_B: WaveformTable = waveform::sawtooth(4095);

    #[test]
    fn short_periods_need_no_prescaler() {
        assert_eq!(timer_divider(3255), (0, 3254));
    }

    #[test]
    fn long_periods_split_across_prescaler_and_reload() {
        let period = 100_000_000u32; // 0.5 s at 200 MHz
        let (psc, arr) = timer_divider(period);
        let effective = (u32::from(psc) + 1) * (u32::from(arr) + 1);
        // Exact within one divisor step.
        assert!(period - effective <= u32::from(psc) + 1);
        assert!(effective <= period);
    }

    #[test]
    fn degenerate_period_still_fires() {
        assert_eq!(timer_divider(0), (0, 0));
        assert_eq!(timer_divider(1), (0, 0));
    }

    #[test]
    fn sample_rate_from_frequency() {
        assert_eq!(
            SampleRate::from_sample_hz(200_000_000, 61_440).period_ticks,
            3255
        );
    }

    #[test]
    fn descriptor_round_trip_compares_equal() {
        let a = StreamingDescriptor {
            table: &TABLE_A,
            rate: SampleRate { period_ticks: 3255 },
        };
        let b = StreamingDescriptor {
            table: &TABLE_B,
            rate: SampleRate { period_ticks: 1627 },
        };
        let back = StreamingDescriptor {
            table: &TABLE_A,
            rate: SampleRate { period_ticks: 3255 },
        };
        assert_ne!(a, b);
        assert_eq!(a, back); // A/R1 -> B/R2 -> A/R1 reproduces the original
    }

    #[test]
    fn same_rate_different_table_is_a_different_descriptor() {
        let rate = SampleRate { period_ticks: 1000 };
        let a = StreamingDescriptor {
            table: &TABLE_A,
            rate,
        };
        let b = StreamingDescriptor {
            table: &TABLE_B,
            rate,
        };
        assert_ne!(a, b);
    }
}
