//! embedded-sdlog - Session controller
//!
//! Bounded-retry orchestration of mount + log-file adoption, and the public
//! append/close/timestamp surface.

use core::fmt::Write;

use crate::fat::{LogFile, VolumeGeometry};
use crate::link::SerialLink;
use crate::sdcard::SdCard;
use crate::Error;

#[cfg(feature = "log")]
use log::warn;

#[cfg(feature = "defmt-log")]
use defmt::warn;

/// How often a failed mount + locate pair is retried from scratch.
const INIT_ATTEMPTS: u8 = 3;

/// A calendar time, as reported by a [`ClockSource`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DateTime {
    pub day: u8,
    pub month: u8,
    pub year: u16,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Something that can tell the time, e.g. a battery-backed RTC chip.
pub trait ClockSource {
    /// Read the current time, or `None` if the clock is absent or cannot be
    /// read.
    fn read_current_time(&mut self) -> Option<DateTime>;
}

/// The clock for builds without one.
pub struct NoClock;

impl ClockSource for NoClock {
    fn read_current_time(&mut self) -> Option<DateTime> {
        None
    }
}

/// The log session: a card, the managed file once mounted, and an optional
/// clock for timestamps.
///
/// All card, geometry and file state is exclusively owned here; there is no
/// provision for concurrent access.
pub struct SdLogger<L, C = NoClock> {
    card: SdCard<L>,
    file: Option<LogFile>,
    clock: Option<C>,
}

impl<L> SdLogger<L, NoClock>
where
    L: SerialLink,
{
    /// Create a logger without a clock; `write_timestamp` becomes a no-op.
    pub fn new(link: L) -> Self {
        Self {
            card: SdCard::new(link),
            file: None,
            clock: None,
        }
    }
}

impl<L, C> SdLogger<L, C>
where
    L: SerialLink,
    C: ClockSource,
{
    /// Create a logger that stamps records from the given clock.
    pub fn with_clock(link: L, clock: C) -> Self {
        Self {
            card: SdCard::new(link),
            file: None,
            clock: Some(clock),
        }
    }

    /// Mount the volume and adopt the log file, retrying the whole pair up
    /// to three times. Each retry re-runs card initialization from scratch.
    ///
    /// This is the system's sole recovery strategy: once the attempts are
    /// exhausted the last error is returned and the session stays unusable.
    pub fn init(&mut self) -> Result<(), Error> {
        self.file = None;
        let mut last_error = Error::NotReady;
        for attempt in 1..=INIT_ATTEMPTS {
            match Self::mount_and_locate(&mut self.card) {
                Ok(file) => {
                    self.file = Some(file);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Init attempt {} failed: {:?}", attempt, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn mount_and_locate(card: &mut SdCard<L>) -> Result<LogFile, Error> {
        let geometry = VolumeGeometry::mount(card)?;
        LogFile::locate_or_create(geometry, card)
    }

    /// Append bytes to the log file.
    ///
    /// Fails with `Error::NotEnabled`, without touching the card, unless a
    /// previous [`init`](Self::init) succeeded.
    pub fn append(&mut self, data: &[u8]) -> Result<(), Error> {
        let file = self.file.as_mut().ok_or(Error::NotEnabled)?;
        file.append(&mut self.card, data)
    }

    /// Append a single byte; the generic byte-sink surface.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), Error> {
        self.append(&[byte])
    }

    /// Pad and flush the final sector and persist the file size.
    pub fn close(&mut self) -> Result<(), Error> {
        let file = self.file.as_mut().ok_or(Error::NotEnabled)?;
        file.close(&mut self.card)
    }

    /// The log file's current size, once mounted.
    pub fn size(&self) -> Option<u32> {
        self.file.as_ref().map(|file| file.size())
    }

    /// Append a `DD-MM-YYYY HH:MM:SS ` timestamp.
    ///
    /// Returns `false` if the clock cannot be read or the append fails.
    /// Without a configured clock this writes nothing and reports success.
    pub fn write_timestamp(&mut self) -> bool {
        let now = match self.clock.as_mut() {
            Some(clock) => match clock.read_current_time() {
                Some(now) => now,
                None => return false,
            },
            None => return true,
        };

        write!(
            self,
            "{:02}-{:02}-{} {:02}:{:02}:{:02} ",
            now.day, now.month, now.year, now.hour, now.minute, now.second
        )
        .is_ok()
    }
}

impl<L, C> Write for SdLogger<L, C>
where
    L: SerialLink,
    C: ClockSource,
{
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.append(s.as_bytes()).map_err(|_| core::fmt::Error)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
