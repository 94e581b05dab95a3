use core::fmt::Write;
use core::time::Duration;

use heapless::String;

use crate::error::{Error, Result};
use crate::ChannelId;

/// 8.3 file name on the card.
pub type FileName = String<12>;

pub const SAMPLE_RATE_HZ: u32 = 8_000;
// 10 s at 8 kHz plus the closing sample
pub const SAMPLE_COUNT: u32 = 80_001;
// PA4 - ADC_IN4
pub const SAMPLE_CHANNEL: ChannelId = ChannelId(4);
pub const SAMPLE_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / SAMPLE_RATE_HZ as u64);

// TIM7 update rate driving the scheduler tick
pub const SCHEDULER_TICK_HZ: u32 = 8_000;

// SD card identification runs at 400 kHz at most, data transfer after it
pub const SD_SPI_INIT_HZ: u32 = 400_000;
pub const SD_SPI_WORK_HZ: u32 = 16_000_000;

pub const RAIL_SETTLE: Duration = Duration::from_millis(500);
pub const POWER_DOWN_SETTLE: Duration = Duration::from_millis(2000);
pub const SLEEP_DURATION: Duration = Duration::from_secs(30);

pub const BLINK_COUNT: u8 = 3;
pub const BLINK_HALF_PERIOD: Duration = Duration::from_millis(200);
pub const PRE_SLEEP_DELAY: Duration = Duration::from_millis(1000);

pub const RECORD_FILE: &str = "DATA.TXT";

/// What happens to the record file of the previous episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilePolicy {
    /// Reuse the file and overwrite it. The previous episode's data is lost.
    Truncate,
    /// Reuse the file and append after the previous episode's records.
    Append,
    /// New numbered file per episode, `DATA0001.TXT`, `DATA0002.TXT`, ...
    Rotate,
}

/// What to do when the sample period is not a whole number of scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RatePolicy {
    /// Round the period up to whole ticks (at least one) and warn.
    Clamp,
    /// Refuse to start the session.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub file: &'static str,
    pub policy: FilePolicy,
}

impl Destination {
    pub const fn new(file: &'static str, policy: FilePolicy) -> Self {
        Destination { file, policy }
    }

    /// Name of the file to open for `episode`. Only `Rotate` uses the number.
    pub fn file_name(&self, episode: u16) -> Option<FileName> {
        let mut name = FileName::new();
        match self.policy {
            FilePolicy::Truncate | FilePolicy::Append => name.push_str(self.file).ok()?,
            FilePolicy::Rotate => {
                let (stem, ext) = self.split();
                // four digits have to fit the 8 character base name
                if stem.is_empty() || stem.len() > 4 || ext.len() > 3 {
                    return None;
                }
                write!(name, "{}{:04}", stem, episode % 10_000).ok()?;
                if !ext.is_empty() {
                    write!(name, ".{}", ext).ok()?;
                }
            }
        }
        Some(name)
    }

    /// Episode number one past the highest rotated file in `existing`,
    /// given as (base name, extension) pairs. Wraps to 1 after 9999.
    pub fn next_episode<'a, I>(&self, existing: I) -> u16
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let mut scan = self.scan();
        for (base, ext) in existing {
            scan.observe(base, ext);
        }
        scan.next_episode()
    }

    /// Starts a directory scan for the highest rotated file number.
    pub fn scan(&self) -> RotationScan {
        let (stem, ext) = self.split();
        RotationScan { stem, ext, last: 0 }
    }

    fn split(&self) -> (&'static str, &'static str) {
        self.file.rsplit_once('.').unwrap_or((self.file, ""))
    }
}

/// Running maximum over directory entries, fed one entry at a time so the
/// whole directory never has to be held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationScan {
    stem: &'static str,
    ext: &'static str,
    last: u16,
}

impl RotationScan {
    pub fn observe(&mut self, base: &[u8], ext: &[u8]) {
        if !ext.eq_ignore_ascii_case(self.ext.as_bytes()) {
            return;
        }
        let number = base
            .get(..self.stem.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(self.stem.as_bytes()))
            .and(base.get(self.stem.len()..))
            .and_then(parse_4digit_ascii);
        if let Some(number) = number {
            self.last = self.last.max(number);
        }
    }

    pub fn next_episode(&self) -> u16 {
        match (self.last + 1) % 10_000 {
            0 => 1,
            n => n,
        }
    }
}

fn parse_4digit_ascii(digits: &[u8]) -> Option<u16> {
    if digits.len() != 4 {
        return None;
    }
    digits.iter().try_fold(0u16, |acc, &d| {
        d.is_ascii_digit().then(|| acc * 10 + (d - b'0') as u16)
    })
}

/// Fixed parameters of one capture session. Not changed once the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDescriptor {
    pub target_sample_count: u32,
    pub sample_period: Duration,
    pub channel: ChannelId,
}

/// Everything one wake episode needs, built once at wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeConfig {
    pub capture: CaptureDescriptor,
    pub rate_policy: RatePolicy,
    pub destination: Destination,
    pub rail_settle: Duration,
    pub power_down_settle: Duration,
    pub sleep_duration: Duration,
    pub blink_count: u8,
    pub blink_half_period: Duration,
    pub pre_sleep_delay: Duration,
}

impl EpisodeConfig {
    pub const DEFAULT: EpisodeConfig = EpisodeConfig {
        capture: CaptureDescriptor {
            target_sample_count: SAMPLE_COUNT,
            sample_period: SAMPLE_PERIOD,
            channel: SAMPLE_CHANNEL,
        },
        rate_policy: RatePolicy::Clamp,
        destination: Destination::new(RECORD_FILE, FilePolicy::Rotate),
        rail_settle: RAIL_SETTLE,
        power_down_settle: POWER_DOWN_SETTLE,
        sleep_duration: SLEEP_DURATION,
        blink_count: BLINK_COUNT,
        blink_half_period: BLINK_HALF_PERIOD,
        pre_sleep_delay: PRE_SLEEP_DELAY,
    };

    pub fn validate<E>(&self) -> Result<(), E> {
        // a zero wake-up would never fire
        if self.sleep_duration.is_zero() {
            return Err(Error::TimerConfig);
        }
        if self.destination.file_name(1).is_none() {
            return Err(Error::InvalidDestination);
        }
        Ok(())
    }
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        EpisodeConfig::DEFAULT
    }
}
