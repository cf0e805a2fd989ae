//! Polled-update pipeline: TIM2 captures the PWM input, TIM3 periodically
//! maps the smoothed duty cycle onto the DAC.

#![no_main]
#![no_std]

use core::cell::RefCell;
use cortex_m::Peripherals as CorePeripherals;
use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;
use daisy::pac::Peripherals as DevicePeripherals;

use hal::dac::{C1, DacExt, Enabled};
use hal::delay::Delay;
use hal::pac::{self, interrupt};
use hal::prelude::*;
use hal::timer::{Event, Timer};
use hal::traits::DacOut;
use stm32h7xx_hal as hal;

use pwm_follower::capture::{CaptureEvent, PwmCapture};
use pwm_follower::duty::{ClampPolicy, DutyCycleEstimator};
use pwm_follower::output::{self, LevelMapping, OutputRange};
use pwm_follower::smoothing::{AverageCadence, SmoothingBuffer, WarmupPolicy};

use {defmt_rtt as _, panic_probe as _};

/// How often the output side rereads the average.
const UPDATE_RATE_HZ: u32 = 2; // every 500 ms

// Capture must preempt the output update; lower number wins on the NVIC.
const CAPTURE_IRQ_PRIO: u8 = 32;
const UPDATE_IRQ_PRIO: u8 = 64;

// Global values, touched only inside critical sections
static CAPTURE: Mutex<RefCell<Option<CaptureStage>>> = Mutex::new(RefCell::new(None));
static OUTPUT: Mutex<RefCell<Option<OutputStage>>> = Mutex::new(RefCell::new(None));

#[entry]
fn main() -> ! {
    // Acquire peripherals
    let mut cp = cortex_m::Peripherals::take().unwrap();
    let dp = pac::Peripherals::take().unwrap();

    // Set interrupt priorities before anything fires
    unsafe {
        cp.NVIC.set_priority(pac::Interrupt::TIM2, CAPTURE_IRQ_PRIO);
        cp.NVIC.set_priority(pac::Interrupt::TIM3, UPDATE_IRQ_PRIO);
    }

    // Initialize system
    let system = System::init(cp, dp);

    // Store both pipeline stages in global statics
    cortex_m::interrupt::free(|cs| {
        CAPTURE.borrow(cs).replace(Some(system.capture_stage));
        OUTPUT.borrow(cs).replace(Some(system.output_stage));
    });

    // Hand the pipeline over to the two interrupt handlers
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM2);
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM3);
    }

    defmt::info!("duty follower up, polled output at {} Hz", UPDATE_RATE_HZ);

    loop {
        // Everything happens in interrupt context
        cortex_m::asm::wfi();
    }
}

// Capture interrupt: timestamp in, duty sample into the ring
#[interrupt]
fn TIM2() {
    cortex_m::interrupt::free(|cs| {
        if let Some(stage) = CAPTURE.borrow(cs).borrow_mut().as_mut() {
            match stage.capture.service() {
                Some(CaptureEvent::Edge(edge)) => {
                    if let Some(duty) = stage.estimator.observe(edge) {
                        stage.ring.insert(duty);
                    }
                }
                Some(CaptureEvent::Overcapture(_)) => {
                    // Lost at least one edge; drop the partial cycle and
                    // resynchronize from the next rising edge.
                    stage.estimator.reset();
                }
                None => {}
            }
        }
    });
}

// Periodic output update: read the average, one register write, done
#[interrupt]
fn TIM3() {
    cortex_m::interrupt::free(|cs| {
        let (average, missed) = match CAPTURE.borrow(cs).borrow().as_ref() {
            // Zero average before the first full period is the meaningful
            // "no signal yet" default, not an error.
            Some(stage) => (stage.ring.average(), stage.capture.missed_edges()),
            None => (0, 0),
        };

        if let Some(stage) = OUTPUT.borrow(cs).borrow_mut().as_mut() {
            stage.timer.clear_irq();
            let level = output::level_for(average, stage.mapping, stage.range);
            stage.dac.set_value(level);
            defmt::trace!(
                "avg {}% -> level {} (missed edges {})",
                average,
                level,
                missed
            );
        }
    });
}

struct CaptureStage {
    capture: PwmCapture,
    estimator: DutyCycleEstimator,
    ring: SmoothingBuffer<10>,
}

struct OutputStage {
    dac: C1<pac::DAC, Enabled>,
    timer: Timer<pac::TIM3>,
    mapping: LevelMapping,
    range: OutputRange,
}

struct System {
    capture_stage: CaptureStage,
    output_stage: OutputStage,
}

impl System {
    fn init(mut cp: CorePeripherals, dp: DevicePeripherals) -> Self {
        // Enable caches
        cp.SCB.enable_icache();
        cp.SCB.enable_dcache(&mut cp.CPUID);

        // Initialize board
        let board = daisy::Board::take().unwrap();
        let ccdr = daisy::board_freeze_clocks!(board, dp);
        let pins = daisy::board_split_gpios!(board, ccdr, dp);

        // PWM input on seed pin 20, routed to TIM2 CH1 (AF1). The capture
        // driver owns the timer; the pin just has to stay in AF mode.
        let _capture_pin = pins.GPIO.PIN_20.into_alternate::<1>();

        let capture = PwmCapture::new(
            dp.TIM2,
            ccdr.peripheral.TIM2,
            ccdr.clocks.timx_ker_ck().to_Hz(),
        );

        // DAC1 output on seed pin 23 (PA4)
        let dac_pin = pins.GPIO.PIN_23.into_analog();
        let mut delay = Delay::new(cp.SYST, ccdr.clocks);
        let dac = dp
            .DAC
            .dac(dac_pin, ccdr.peripheral.DAC12)
            .calibrate_buffer(&mut delay)
            .enable();

        // Periodic output update, independent of the input signal
        let mut timer = dp
            .TIM3
            .timer(UPDATE_RATE_HZ.Hz(), ccdr.peripheral.TIM3, &ccdr.clocks);
        timer.listen(Event::TimeOut);

        Self {
            capture_stage: CaptureStage {
                capture,
                estimator: DutyCycleEstimator::new(ClampPolicy::Clamp),
                ring: SmoothingBuffer::new(
                    AverageCadence::EveryInsert,
                    WarmupPolicy::DivideByCapacity,
                ),
            },
            output_stage: OutputStage {
                dac,
                timer,
                mapping: LevelMapping::Linear,
                range: OutputRange::Bits12,
            },
        }
    }
}
