use embedded_sdmmc::{
    Directory, File, Mode, SdCardError, TimeSource, Timestamp, Volume, VolumeIdx,
    VolumeManager,
};

use crate::config::{Destination, FilePolicy, SCHEDULER_TICK_HZ, SD_SPI_WORK_HZ};
use crate::error::{Error, Result};
use crate::hw::{set_sd_clock, ticks, ByteSink, Card, RecordStore};
use crate::record::LineWriter;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdError {
    Card(SdCardError),
    Fs(embedded_sdmmc::Error<SdCardError>),
}

/// Time source based on uptime since boot (no RTC calendar on the node).
/// Base date: 2025-01-01 00:00:00 + uptime offset.
pub struct UptimeClock;

impl TimeSource for UptimeClock {
    fn get_timestamp(&self) -> Timestamp {
        let uptime_secs = ticks() / SCHEDULER_TICK_HZ;
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: (uptime_secs / 3600 % 24) as u8,
            minutes: (uptime_secs / 60 % 60) as u8,
            seconds: (uptime_secs % 60) as u8,
        }
    }
}

type Manager = VolumeManager<Card, UptimeClock>;

/// FAT volume on the SPI SD card.
pub struct SdStore {
    volume_mgr: Manager,
    volume: Option<Volume>,
}

impl SdStore {
    pub fn new(card: Card) -> Self {
        SdStore {
            volume_mgr: VolumeManager::new(card, UptimeClock),
            volume: None,
        }
    }

    fn next_episode(
        &mut self,
        root: Directory,
        destination: &Destination,
    ) -> core::result::Result<u16, SdError> {
        let mut scan = destination.scan();
        self.volume_mgr
            .iterate_dir(root, |entry| {
                scan.observe(entry.name.base_name(), entry.name.extension());
            })
            .map_err(SdError::Fs)?;
        Ok(scan.next_episode())
    }
}

impl RecordStore for SdStore {
    type Error = SdError;
    type Sink<'a> = LineWriter<SdFile<'a>>;

    fn mount(&mut self) -> Result<(), SdError> {
        let size = self
            .volume_mgr
            .device()
            .num_bytes()
            .map_err(|e| Error::CardInitFailed(SdError::Card(e)))?;
        info!("storage: card holds {=u64} MiB", size >> 20);
        set_sd_clock(SD_SPI_WORK_HZ);
        info!("storage: bus raised to {=u32} Hz", SD_SPI_WORK_HZ);
        let volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|e| Error::MountFailed(SdError::Fs(e)))?;
        self.volume = Some(volume);
        Ok(())
    }

    fn open(&mut self, destination: &Destination) -> Result<Self::Sink<'_>, SdError> {
        let volume = self.volume.ok_or(Error::StorageUnavailable)?;
        let root = self
            .volume_mgr
            .open_root_dir(volume)
            .map_err(|e| Error::FileOpenFailed(SdError::Fs(e)))?;

        let (episode, mode) = match destination.policy {
            FilePolicy::Truncate => (0, Mode::ReadWriteCreateOrTruncate),
            FilePolicy::Append => (0, Mode::ReadWriteCreateOrAppend),
            // a partial scan could pick a number already in use
            FilePolicy::Rotate => match self.next_episode(root, destination) {
                Ok(episode) => (episode, Mode::ReadWriteCreateOrTruncate),
                Err(e) => {
                    error!("storage: root directory scan failed");
                    let _ = self.volume_mgr.close_dir(root);
                    return Err(Error::FileOpenFailed(e));
                }
            },
        };
        let name = match destination.file_name(episode) {
            Some(name) => name,
            None => {
                let _ = self.volume_mgr.close_dir(root);
                return Err(Error::InvalidDestination);
            }
        };
        info!("storage: recording to {=str}", name.as_str());

        let file = match self.volume_mgr.open_file_in_dir(root, name.as_str(), mode) {
            Ok(file) => file,
            Err(e) => {
                let _ = self.volume_mgr.close_dir(root);
                return Err(Error::FileOpenFailed(SdError::Fs(e)));
            }
        };
        Ok(LineWriter::new(SdFile {
            volume_mgr: &mut self.volume_mgr,
            root,
            file,
        }))
    }
}

/// Open record file, closed together with its directory on commit.
pub struct SdFile<'a> {
    volume_mgr: &'a mut Manager,
    root: Directory,
    file: File,
}

impl ByteSink for SdFile<'_> {
    type Error = SdError;

    fn write(&mut self, bytes: &[u8]) -> core::result::Result<(), SdError> {
        let start = self.volume_mgr.file_offset(self.file).map_err(SdError::Fs)?;
        match self.volume_mgr.write(self.file, bytes) {
            Ok(_) => Ok(()),
            Err(e) => {
                // a retry overwrites whatever part of the block made it out
                let _ = self.volume_mgr.file_seek_from_start(self.file, start);
                Err(SdError::Fs(e))
            }
        }
    }

    fn commit(self) -> core::result::Result<(), SdError> {
        // closing the file writes its directory entry, the size lives there
        let closed = self.volume_mgr.close_file(self.file).map_err(SdError::Fs);
        let _ = self.volume_mgr.close_dir(self.root);
        closed
    }
}
