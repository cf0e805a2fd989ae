//! Streaming pipeline: the DAC plays a precomputed waveform table through a
//! circular DMA stream while the capture side keeps measuring the PWM input.
//! The smoothed duty retunes the playback rate; the user button cycles
//! through waveform/rate modes. Read https://rtic.rs to learn more about the
//! framework.

#![no_main]
#![no_std]

use core::sync::atomic::AtomicU32;

use pwm_follower::output::OutputRange;
use pwm_follower::waveform::{self, WaveformTable};

use {defmt_rtt as _, panic_probe as _};

const OUTPUT_MAX: u16 = OutputRange::Bits12.max_level();

// Tables are const-built so they live in flash, which the D2-domain DMA
// master can read (DTCM statics would be invisible to it).
static TRIANGLE: WaveformTable = waveform::triangle(OUTPUT_MAX);
static SAWTOOTH: WaveformTable = waveform::sawtooth(OUTPUT_MAX);
static SQUARE: WaveformTable = waveform::square(OUTPUT_MAX);

// Capture-side diagnostic, written by the capture task, read by retune.
static MISSED_EDGES: AtomicU32 = AtomicU32::new(0);

#[rtic::app(device = stm32h7xx_hal::pac, peripherals = true, dispatchers = [EXTI0, EXTI1])]
mod app {
    use core::sync::atomic::Ordering;

    use heapless::spsc::{Consumer, Producer, Queue};

    use stm32h7xx_hal::gpio::{Edge, ExtiPin, Input, Pin};
    use stm32h7xx_hal::prelude::*;
    use systick_monotonic::Systick;

    use cortex_m::Peripherals as CorePeripherals;
    use daisy::pac::Peripherals as DevicePeripherals;

    use pwm_follower::capture::{CaptureEvent, PwmCapture};
    use pwm_follower::duty::{ClampPolicy, DutyCycleEstimator};
    use pwm_follower::modes::{ModeArbiter, PlaybackMode};
    use pwm_follower::smoothing::{AverageCadence, SmoothingBuffer, WarmupPolicy};
    use pwm_follower::streaming::{StreamingDescriptor, WaveStreamer};

    use super::{MISSED_EDGES, SAWTOOTH, SQUARE, TRIANGLE};

    /// How often the retune task drains the duty queue.
    const RETUNE_PERIOD_MS: u64 = 500;

    #[monotonic(binds = SysTick, default = true)]
    type Mono = Systick<1000>; // 1 kHz / 1 ms granularity

    #[shared]
    struct Shared {
        streamer: WaveStreamer,
        arbiter: ModeArbiter<3>,
    }

    #[local]
    struct Local {
        capture: PwmCapture,
        estimator: DutyCycleEstimator,
        ring: SmoothingBuffer<10>,
        avg_producer: Producer<'static, u32, 8>,
        avg_consumer: Consumer<'static, u32, 8>,
        mode_button: Pin<'B', 12, Input>,
    }

    #[init(
        local = [
            avg_queue: Queue<u32, 8> = Queue::new(),
        ]
    )]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        let system = System::init(cx.core, cx.device);

        let (avg_producer, avg_consumer) = cx.local.avg_queue.split();

        retune::spawn().unwrap();

        (
            Shared {
                streamer: system.streamer,
                arbiter: system.arbiter,
            },
            Local {
                capture: system.capture,
                estimator: DutyCycleEstimator::new(ClampPolicy::Clamp),
                ring: SmoothingBuffer::new(
                    AverageCadence::EveryWrap,
                    WarmupPolicy::DivideByCapacity,
                ),
                avg_producer,
                avg_consumer,
                mode_button: system.mode_button,
            },
            init::Monotonics(system.mono),
        )
    }

    // Highest priority: edge timing is the measurement. Classify the edge,
    // fold it into the ring, queue every fresh batch average for the retune
    // task. The queue is the only hand-off between the two contexts.
    #[task(binds = TIM2, priority = 3, local = [capture, estimator, ring, avg_producer])]
    fn capture(cx: capture::Context) {
        match cx.local.capture.service() {
            Some(CaptureEvent::Edge(edge)) => {
                if let Some(duty) = cx.local.estimator.observe(edge) {
                    if let Some(average) = cx.local.ring.insert(duty) {
                        // A full queue just means the consumer is behind;
                        // dropping the oldest average is harmless.
                        let _ = cx.local.avg_producer.enqueue(average);
                    }
                }
            }
            Some(CaptureEvent::Overcapture(_)) => {
                cx.local.estimator.reset();
                MISSED_EDGES.store(cx.local.capture.missed_edges(), Ordering::Relaxed);
            }
            None => {}
        }
    }

    // Button edge: next waveform/rate pair. The previous transfer is fully
    // stopped inside reconfigure before the new descriptor goes in.
    #[task(binds = EXTI15_10, priority = 2, shared = [streamer, arbiter], local = [mode_button])]
    fn mode_switch(cx: mode_switch::Context) {
        cx.local.mode_button.clear_interrupt_pending_bit();

        (cx.shared.streamer, cx.shared.arbiter).lock(|streamer, arbiter| {
            let descriptor = arbiter.advance();
            streamer.reconfigure(descriptor);
            defmt::info!("mode {}", arbiter.current_index());
        });
    }

    // Lowest priority: drain the queue to the freshest average and bend the
    // playback rate toward it.
    #[task(priority = 1, shared = [streamer, arbiter], local = [avg_consumer, seen_missed: u32 = 0])]
    fn retune(cx: retune::Context) {
        retune::spawn_after(systick_monotonic::ExtU64::millis(RETUNE_PERIOD_MS))
            .ok()
            .unwrap();

        // keep only the last item in the queue
        let mut average = None;
        while let Some(a) = cx.local.avg_consumer.dequeue() {
            average = Some(a);
        }

        if let Some(average) = average {
            (cx.shared.streamer, cx.shared.arbiter).lock(|streamer, arbiter| {
                if let Some(descriptor) = arbiter.retune(average) {
                    streamer.reconfigure(descriptor);
                    defmt::debug!("retuned to avg {}%", average);
                }
            });
        }

        let missed = MISSED_EDGES.load(Ordering::Relaxed);
        if missed > *cx.local.seen_missed {
            defmt::warn!("{} edges lost to capture latency", missed);
            *cx.local.seen_missed = missed;
        }
    }

    struct System {
        pub mono: Systick<1000>,
        pub capture: PwmCapture,
        pub streamer: WaveStreamer,
        pub arbiter: ModeArbiter<3>,
        pub mode_button: Pin<'B', 12, Input>,
    }

    impl System {
        fn init(mut cp: CorePeripherals, mut dp: DevicePeripherals) -> Self {
            // Using caches should provide a major performance boost. The DMA
            // source tables live in flash and are never written, so there is
            // no cache coherence to manage around the stream.
            cp.SCB.enable_icache();
            cp.SCB.enable_dcache(&mut cp.CPUID);

            let board = daisy::Board::take().unwrap();
            let ccdr = daisy::board_freeze_clocks!(board, dp);
            let pins = daisy::board_split_gpios!(board, ccdr, dp);

            let mono = Systick::new(cp.SYST, ccdr.clocks.sys_ck().to_Hz());

            // PWM input on seed pin 20, routed to TIM2 CH1 (AF1).
            let _capture_pin = pins.GPIO.PIN_20.into_alternate::<1>();
            let capture = PwmCapture::new(
                dp.TIM2,
                ccdr.peripheral.TIM2,
                ccdr.clocks.timx_ker_ck().to_Hz(),
            );

            // Mode button on seed pin 0 (PB12), active low.
            let mut mode_button = pins.GPIO.PIN_0.into_pull_up_input();
            mode_button.make_interrupt_source(&mut dp.SYSCFG);
            mode_button.trigger_on_edge(&mut dp.EXTI, Edge::Falling);
            mode_button.enable_interrupt(&mut dp.EXTI);

            // DAC1 output on seed pin 23 (PA4), fed by DMA.
            let _dac_pin = pins.GPIO.PIN_23.into_analog();

            let tim_ker_hz = ccdr.clocks.timx_ker_ck().to_Hz();
            let arbiter = ModeArbiter::new(
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
                tim_ker_hz,
            );

            let initial: StreamingDescriptor = arbiter.descriptor();
            let mut streamer = WaveStreamer::new(
                dp.DMA1,
                dp.DMAMUX1,
                dp.DAC,
                dp.TIM6,
                (
                    ccdr.peripheral.DMA1,
                    ccdr.peripheral.DAC12,
                    ccdr.peripheral.TIM6,
                ),
                initial,
            );
            streamer.start();

            defmt::info!("streaming up, mode 0 (triangle)");

            Self {
                mono,
                capture,
                streamer,
                arbiter,
                mode_button,
            }
        }
    }
}
