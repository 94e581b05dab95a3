use crate::ChannelId;

pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Failures of one wake episode, generic over the storage driver's error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    // Filesystem on the card could not be mounted
    MountFailed(E),
    // Card did not answer initialization
    CardInitFailed(E),
    // Medium is not mounted
    StorageUnavailable,
    // Record file could not be created or opened
    FileOpenFailed(E),
    /// Append failed after `appended` records were accepted. Accepted is not
    /// durable: records still buffered survive only if the best-effort close
    /// manages to write them.
    WriteFailed { appended: u32, source: E },
    // Buffered records could not be committed on close
    FlushFailed(E),
    // Channel is not wired to the analog front end
    InvalidChannel(ChannelId),
    // Sample period is finer than the scheduler resolution
    RateUnachievable,
    // Rotated file name does not fit 8.3
    InvalidDestination,
    // Sensor rail output could not be driven
    Rail,
    // Wake timer could not be armed
    TimerConfig,
}

impl<E> Error<E> {
    pub fn name(&self) -> &'static str {
        match self {
            Error::MountFailed(_) => "mount failed",
            Error::CardInitFailed(_) => "card init failed",
            Error::StorageUnavailable => "storage unavailable",
            Error::FileOpenFailed(_) => "file open failed",
            Error::WriteFailed { .. } => "write failed",
            Error::FlushFailed(_) => "flush failed",
            Error::InvalidChannel(_) => "invalid channel",
            Error::RateUnachievable => "rate unachievable",
            Error::InvalidDestination => "invalid destination",
            Error::Rail => "rail fault",
            Error::TimerConfig => "timer config error",
        }
    }
}
