//! Trapezoid envelope on the DAC: rise, hold, fall, settle, forever.
//!
//! The pacing uses the interruptible busy-wait helper — the main loop spins
//! on a flag that the 1 kHz TIM5 interrupt ticks down, so interrupts stay
//! serviceable while "sleeping". No scheduler, no queues, just the legacy
//! delay contract.

#![no_main]
#![no_std]

use core::cell::RefCell;
use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;

use hal::dac::DacExt;
use hal::delay::Delay;
use hal::pac::{self, interrupt};
use hal::prelude::*;
use hal::timer::{Event, Timer};
use hal::traits::DacOut;
use stm32h7xx_hal as hal;

use pwm_follower::delay::DelayFlag;
use pwm_follower::envelope::{EnvelopeConfig, EnvelopeGenerator};

use {defmt_rtt as _, panic_probe as _};

/// Byte-packed legacy control word: peak, hold ms, rise ms, fall ms.
/// 200 counts peak, 48 ms hold, 1 ms per rise step, 1 ms per fall step.
const CONTROL_WORD: u32 = 0x0101_30C8;

static DELAY: DelayFlag = DelayFlag::new();
static TICK_TIMER: Mutex<RefCell<Option<Timer<pac::TIM5>>>> = Mutex::new(RefCell::new(None));

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().unwrap();
    let dp = pac::Peripherals::take().unwrap();

    cp.SCB.enable_icache();
    cp.SCB.enable_dcache(&mut cp.CPUID);

    let board = daisy::Board::take().unwrap();
    let ccdr = daisy::board_freeze_clocks!(board, dp);
    let pins = daisy::board_split_gpios!(board, ccdr, dp);

    // DAC1 output on seed pin 23 (PA4)
    let dac_pin = pins.GPIO.PIN_23.into_analog();
    let mut delay = Delay::new(cp.SYST, ccdr.clocks);
    let mut dac = dp
        .DAC
        .dac(dac_pin, ccdr.peripheral.DAC12)
        .calibrate_buffer(&mut delay)
        .enable();

    // 1 kHz tick driving the busy-wait countdown
    let mut tick_timer = dp
        .TIM5
        .timer(1_000.Hz(), ccdr.peripheral.TIM5, &ccdr.clocks);
    tick_timer.listen(Event::TimeOut);
    cortex_m::interrupt::free(|cs| {
        TICK_TIMER.borrow(cs).replace(Some(tick_timer));
    });
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM5);
    }

    let config = EnvelopeConfig::from_word(CONTROL_WORD);
    defmt::info!(
        "envelope: peak {} hold {} ms rise {} ms/step fall {} ms/step",
        config.peak,
        config.hold_ms,
        config.rise_step_ms,
        config.fall_step_ms
    );

    loop {
        for step in EnvelopeGenerator::new(config) {
            // Legacy 8-bit levels onto the 12-bit DAC
            dac.set_value(step.level << 4);
            DELAY.arm(step.hold_ms);
            DELAY.block();
        }
    }
}

#[interrupt]
fn TIM5() {
    cortex_m::interrupt::free(|cs| {
        if let Some(timer) = TICK_TIMER.borrow(cs).borrow_mut().as_mut() {
            timer.clear_irq();
        }
    });
    DELAY.tick();
}
