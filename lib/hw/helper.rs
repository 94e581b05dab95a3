use cortex_m::peripheral::SYST;
use embedded_sdmmc::SdCard;
use stm32g0xx_hal::gpio::gpioa::{PA4, PA5, PA8};
use stm32g0xx_hal::gpio::gpiob::{PB3, PB4, PB5, PB6};
use stm32g0xx_hal::gpio::{Analog, DefaultMode, Output, PushPull};
use stm32g0xx_hal::rcc::{Config, PllConfig, Rcc, RccExt};
use stm32g0xx_hal::spi::Spi;
use stm32g0xx_hal::stm32g0::stm32g070::{RCC, SPI1};
use stm32g0xx_hal::timer::delay::Delay;

use crate::hw::adc::Adc;
use crate::hw::sd::SdStore;
use crate::hw::sleep::Standby;
use crate::hw::spi_baud_bits;
use crate::hw::timers::Ticks;
use crate::power::PowerCycle;

// PLL output, APB runs undivided
pub const PCLK_HZ: u32 = 64_000_000;

pub fn init_clock(pac_rcc: RCC) -> Rcc {
    // ((16 MHz / 4) * 32) / 2 = 64 MHz
    let pll_config = PllConfig::with_hsi(4, 32, 2);
    pac_rcc.freeze(Config::pll().pll_cfg(pll_config))
}

// PA4 - ADC_IN4 sensor input
type SensorInput = PA4<Analog>;
// PA5 - Status LED
pub type LedPin = PA5<Output<PushPull>>;
// PA8 - Sensor rail enable
pub type RailPin = PA8<Output<PushPull>>;
// PB3 - SD_SCK, PB4 - SD_MISO, PB5 - SD_MOSI
pub type SdSpi = Spi<SPI1, (PB3<DefaultMode>, PB4<DefaultMode>, PB5<DefaultMode>)>;
// PB6 - SD_CS
pub type SdCs = PB6<Output<PushPull>>;

pub type SensorAdc = Adc<SensorInput>;
pub type Card = SdCard<SdSpi, SdCs, Delay<SYST>>;
pub type Node = PowerCycle<RailPin, LedPin, Ticks, SensorAdc, SdStore, Standby>;

pub fn init_card(spi: SdSpi, cs: SdCs, delay: Delay<SYST>) -> SdStore {
    SdStore::new(SdCard::new(spi, cs, delay))
}

/// Retunes SPI1 between transfers, the card driver only ever sees the new speed.
pub fn set_sd_clock(max_hz: u32) {
    let bits = spi_baud_bits(PCLK_HZ, max_hz);
    let spi = unsafe { &(*SPI1::ptr()) };
    spi.cr1.modify(|_, w| w.spe().clear_bit());
    spi.cr1.modify(|_, w| unsafe { w.br().bits(bits) });
    spi.cr1.modify(|_, w| w.spe().set_bit());
}
