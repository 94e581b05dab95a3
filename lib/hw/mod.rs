use core::time::Duration;

use crate::config::Destination;
use crate::error::Result;
use crate::{ChannelId, Sample};

#[cfg(feature = "firmware")]
mod adc;
#[cfg(feature = "firmware")]
mod helper;
#[cfg(feature = "firmware")]
mod sd;
#[cfg(feature = "firmware")]
mod sleep;
#[cfg(feature = "firmware")]
mod timers;

#[cfg(feature = "firmware")]
pub use adc::Adc;
#[cfg(feature = "firmware")]
pub use helper::*;
#[cfg(feature = "firmware")]
pub use sd::{SdError, SdFile, SdStore};
#[cfg(feature = "firmware")]
pub use sleep::{Standby, WakeError};
#[cfg(feature = "firmware")]
pub use timers::{ticks, TickTimer, Ticks};

/// SPI baud rate field for the fastest clock at or below `max_hz`.
/// The divider is `2^(bits + 1)`, from 2 to 256.
pub fn spi_baud_bits(pclk_hz: u32, max_hz: u32) -> u8 {
    (0u8..7)
        .find(|bits| pclk_hz >> (bits + 1) <= max_hz)
        .unwrap_or(7)
}

/// Scheduler the node suspends on between samples and during settle delays.
pub trait TickSource {
    /// Length of one tick.
    fn resolution(&self) -> Duration;

    /// Ticks elapsed since the source was started.
    fn now(&self) -> u64;

    /// Suspends until `now() >= deadline`. Returns at once if the deadline has passed.
    fn wait_until(&mut self, deadline: u64);

    /// Whole ticks covering `duration`, rounded up.
    fn ticks_for(&self, duration: Duration) -> u64 {
        let resolution = self.resolution().as_nanos().max(1);
        let ticks = (duration.as_nanos() + resolution - 1) / resolution;
        ticks.min(u64::MAX as u128) as u64
    }

    fn delay(&mut self, duration: Duration) {
        let deadline = self.now().saturating_add(self.ticks_for(duration));
        self.wait_until(deadline);
    }
}

pub trait AnalogInput {
    /// Whether `channel` is wired and configured. Checked once at session setup.
    fn supports(&self, channel: ChannelId) -> bool;

    /// Single conversion on a channel that passed `supports`.
    fn read(&mut self, channel: ChannelId) -> Sample;
}

/// Durable medium holding the record files.
pub trait RecordStore {
    type Error;
    type Sink<'a>: RecordSink<Error = Self::Error>
    where
        Self: 'a;

    /// Brings up the card and its filesystem, failing with `MountFailed` or `CardInitFailed`.
    fn mount(&mut self) -> Result<(), Self::Error>;

    /// Opens the record file for one session. The sink borrows the store, so
    /// a second handle cannot exist while it lives.
    fn open(&mut self, destination: &Destination) -> Result<Self::Sink<'_>, Self::Error>;
}

/// Append-only destination of one capture session.
pub trait RecordSink {
    type Error;

    fn append(&mut self, sample: Sample) -> core::result::Result<(), Self::Error>;

    /// Commits everything appended so far. Records are durable once this returns `Ok`.
    fn close(self) -> core::result::Result<(), Self::Error>;
}

/// Raw byte file under a buffered record sink.
pub trait ByteSink {
    type Error;

    fn write(&mut self, bytes: &[u8]) -> core::result::Result<(), Self::Error>;

    fn commit(self) -> core::result::Result<(), Self::Error>;
}

pub trait SleepControl {
    type Error;

    /// Programs the wake-up source to fire `after` from now.
    fn arm(&mut self, after: Duration) -> core::result::Result<(), Self::Error>;

    /// Enters the low-power state. Hardware implementations never return.
    fn suspend(&mut self);
}
