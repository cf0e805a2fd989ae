#![cfg_attr(not(test), no_main)]
#![cfg_attr(not(test), no_std)]

use daisy::hal as _;
use defmt_rtt as _;

#[cfg(not(test))]
use panic_probe as _;

pub mod capture;
pub mod delay;
pub mod duty;
pub mod envelope;
pub mod modes;
pub mod output;
pub mod smoothing;
pub mod streaming;
pub mod waveform;

// Custom panic handler to avoid duplicate panic messages
// Uses defmt for formatted logging instead of standard panic behavior
#[cfg(not(test))]
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf() // Trigger undefined instruction exception
}

/// Terminates the application gracefully for probe-run debugger
/// Makes the debugger exit with success status (exit-code = 0)
pub fn exit() -> ! {
    loop {
        cortex_m::asm::bkpt(); // Trigger breakpoint instruction repeatedly
    }
}
