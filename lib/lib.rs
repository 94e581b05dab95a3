#![cfg_attr(not(test), no_std)]

#[cfg(feature = "firmware")]
use defmt_rtt as _; // global logger
#[cfg(feature = "firmware")]
use panic_probe as _;

#[macro_use]
mod fmt;

pub mod clock;
pub mod config;
pub mod error;
pub mod hw;
pub mod power;
pub mod record;
pub mod session;

/// One 12-bit conversion result.
pub type Sample = u16;

pub const SAMPLE_MAX: Sample = 4095;

/// Analog input channel as numbered by the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelId(pub u8);

#[cfg(feature = "firmware")]
defmt::timestamp!("{=u32}", hw::ticks());
