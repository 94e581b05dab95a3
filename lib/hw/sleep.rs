use core::time::Duration;

use cortex_m::peripheral::SCB;
use stm32g0xx_hal::rcc::Rcc;
use stm32g0xx_hal::stm32g0::stm32g070::{PWR, RCC, RTC};

use crate::hw::SleepControl;

// WUTWF shows up within two RTC clock cycles, this bounds a dead LSI
const WUTWF_POLLS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeError {
    // Wake-up timer counts whole seconds, 1 to 65536
    OutOfRange,
    // Wake-up timer never became writable
    NotReady,
}

/// RTC wake-up timer and STANDBY mode. Leaving STANDBY resets the MCU.
pub struct Standby {
    pwr: PWR,
    rtc: RTC,
    scb: SCB,
}

impl Standby {
    pub fn new(pwr: PWR, rtc: RTC, scb: SCB, rcc: &mut Rcc) -> Self {
        Standby::enable_clock(rcc);
        // Backup domain holds the RTC registers
        pwr.cr1.modify(|_, w| w.dbp().set_bit());
        Standby::select_lsi(rcc);
        Standby { pwr, rtc, scb }
    }

    fn enable_clock(_: &mut Rcc) {
        let rcc = unsafe { &(*RCC::ptr()) };
        rcc.apbenr1.modify(|_, w| {
            w.pwren().set_bit();
            w.rtcapben().set_bit()
        });
    }

    fn select_lsi(_: &mut Rcc) {
        let rcc = unsafe { &(*RCC::ptr()) };
        rcc.csr.modify(|_, w| w.lsion().set_bit());
        while rcc.csr.read().lsirdy().bit_is_clear() {}
        // LSI with reset prescalers, a second on the RTC is about 1.02 s
        rcc.bdcr.modify(|_, w| unsafe {
            w.rtcsel().bits(0b10);
            w.rtcen().set_bit()
        });
    }

    fn unlock(&mut self) {
        self.rtc.wpr.write(|w| unsafe { w.key().bits(0xca) });
        self.rtc.wpr.write(|w| unsafe { w.key().bits(0x53) });
    }

    fn lock(&mut self) {
        self.rtc.wpr.write(|w| unsafe { w.key().bits(0xff) });
    }
}

impl SleepControl for Standby {
    type Error = WakeError;

    fn arm(&mut self, after: Duration) -> Result<(), WakeError> {
        let secs = after.as_secs();
        if secs == 0 || secs > 0x1_0000 {
            return Err(WakeError::OutOfRange);
        }

        self.unlock();
        self.rtc.cr.modify(|_, w| w.wute().clear_bit());
        let mut polls = WUTWF_POLLS;
        while self.rtc.icsr.read().wutwf().bit_is_clear() {
            polls -= 1;
            if polls == 0 {
                self.lock();
                return Err(WakeError::NotReady);
            }
        }
        self.rtc
            .wutr
            .write(|w| unsafe { w.wut().bits((secs - 1) as u16) });
        self.rtc.cr.modify(|_, w| unsafe {
            // ck_spre, 1 Hz
            w.wucksel().bits(0b100);
            w.wutie().set_bit();
            w.wute().set_bit()
        });
        self.rtc.scr.write(|w| w.cwutf().set_bit());
        self.lock();
        Ok(())
    }

    fn suspend(&mut self) {
        // RTC wake-up reaches PWR through the internal wake-up line
        self.pwr.cr3.modify(|_, w| w.eiwul().set_bit());
        self.pwr.scr.write(|w| w.csbf().set_bit());
        self.pwr.cr1.modify(|_, w| unsafe { w.lpms().bits(0b011) });
        self.scb.set_sleepdeep();
        loop {
            cortex_m::asm::dsb();
            cortex_m::asm::wfi();
        }
    }
}
