use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use stm32g0xx_hal::rcc::Rcc;
use stm32g0xx_hal::stm32g0::stm32g070::TIM7;
use stm32g0xx_hal::time::Hertz;
use stm32g0xx_hal::timer::{Timer, TimerExt};

use crate::clock::extend_ticks;
use crate::hw::TickSource;

// Written only from the TIM7 interrupt, M0+ has no atomic read-modify-write
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Scheduler ticks since boot, wrapping after 2^32.
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// TIM7 update interrupt driving the scheduler tick.
pub struct TickTimer {
    timer: Timer<TIM7>,
    freq: Hertz,
}

impl TickTimer {
    pub fn new(pac_tim: TIM7, freq: Hertz, rcc: &mut Rcc) -> Self {
        TickTimer {
            timer: pac_tim.timer(rcc),
            freq,
        }
    }

    pub fn start(&mut self) {
        self.timer.clear_irq();
        self.timer.listen();
        self.timer.start(self.freq.into_duration());
    }

    pub fn unpend(&mut self) {
        self.timer.clear_irq();
        let n = TICKS.load(Ordering::Relaxed);
        TICKS.store(n.wrapping_add(1), Ordering::Relaxed);
    }
}

/// Read side of the scheduler tick, waits with WFI so interrupts keep running.
pub struct Ticks {
    resolution: Duration,
    // widened count at the last read, `wait_until` reads it after every wake-up
    last: Cell<u64>,
}

impl Ticks {
    pub fn new(tick_hz: u32) -> Self {
        Ticks {
            resolution: Duration::from_nanos(1_000_000_000 / tick_hz as u64),
            last: Cell::new(ticks() as u64),
        }
    }
}

impl TickSource for Ticks {
    fn resolution(&self) -> Duration {
        self.resolution
    }

    fn now(&self) -> u64 {
        let now = extend_ticks(self.last.get(), ticks());
        self.last.set(now);
        now
    }

    fn wait_until(&mut self, deadline: u64) {
        while self.now() < deadline {
            cortex_m::asm::wfi();
        }
    }
}
