//! # embedded-sdlog
//!
//! > A write-only FAT32 append logger for SD cards, written in Embedded Rust
//!
//! This crate lets a resource-constrained device append text records to a
//! single pre-provisioned file on a FAT32 formatted SD card, driving the card
//! over a bit-banged serial link instead of a hardware SPI peripheral. It is
//! written in pure-Rust, is `#![no_std]` and does not use `alloc` or
//! `collections` to keep the memory footprint low. Sector data is streamed
//! out byte-by-byte, so no 512-byte buffer is ever held in RAM.
//!
//! ## Using the crate
//!
//! You need something that implements the [`SerialLink`] trait. The supplied
//! [`BitBangLink`] drives four GPIO pins from `embedded-hal`, but anything
//! that can select the card and exchange one byte at a time will do.
//!
//! ```rust,ignore
//! # let (sck, mosi, miso, cs) = pins();
//! let link = embedded_sdlog::BitBangLink::new(sck, mosi, miso, cs);
//! let mut logger = embedded_sdlog::SdLogger::new(link);
//! logger.init()?;
//! logger.append(b"boot complete\n")?;
//! logger.close()?;
//! ```
//!
//! The managed file (`LOG.TXT`) lives at a fixed directory slot and a fixed
//! starting cluster; a card that has never seen this logger is provisioned on
//! the first successful `init`. Host operating systems can read the card
//! afterwards as a normal FAT32 volume.
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the
//! `defmt-log` feature you can configure this crate to log messages over
//! defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is
//! enabled.

#![cfg_attr(not(test), no_std)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[cfg(test)]
mod test;

#[macro_use]
mod structure;

pub mod fat;
pub mod link;
pub mod logger;
pub mod sdcard;

pub use crate::link::{BitBangLink, SerialLink};
pub use crate::logger::{ClockSource, DateTime, NoClock, SdLogger};
pub use crate::sdcard::Error as CardError;
pub use crate::sdcard::SdCard;

/// The result codes this crate reports to callers. Every public operation
/// returns one of these; nothing panics.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Error {
    /// A card protocol failure: the card was non-responsive, returned a bad
    /// data token, or rejected a write.
    Disk(CardError),
    /// The card did not complete the initialization handshake.
    NotReady,
    /// An append or close was attempted before a volume was mounted.
    NotEnabled,
    /// The volume's cluster count is below the FAT32 minimum.
    NoFilesystem,
    /// Neither sector 0 nor the first partition holds a boot record.
    NoBootRecord,
    /// The boot record is not tagged as FAT32.
    BadFilesystemType,
}

impl From<CardError> for Error {
    fn from(e: CardError) -> Self {
        Self::Disk(e)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
