//! The append-only log file.
//!
//! Owns the file's size, extends its cluster chain, rewrites its directory
//! entry and pads the final sector on close. The file's starting cluster is
//! fixed, so appending never consults an allocator: the chain always runs
//! `first, first+1, first+2, ..` and only its end-of-chain marker moves.

use crate::link::SerialLink;
use crate::sdcard::SdCard;
use crate::Error;

use super::dir_entry::{DirEntryImage, DirEntrySlot, LOG_FILE_ENTRY_SECTOR, LOG_FILE_FIRST_CLUSTER};
use super::volume::VolumeGeometry;
use super::SECTOR_LEN;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

/// 32-bit FAT entries per FAT sector.
const FAT_ENTRIES_PER_SECTOR: u32 = 128;
/// The end-of-chain marker terminating the file's cluster chain.
const END_OF_CHAIN: u32 = 0x0FFF_FFFF;

/// The single managed log file.
///
/// Created by [`locate_or_create`](Self::locate_or_create) after a
/// successful mount; its in-memory size matches the on-card directory entry
/// at every flush point.
pub struct LogFile {
    geometry: VolumeGeometry,
    size: u32,
}

impl LogFile {
    /// Read the managed directory slot and adopt the file, provisioning it
    /// first if this card has never seen the logger.
    ///
    /// Provisioning writes the fixed entry image with size zero and
    /// terminates the file's chain at its first cluster in every FAT copy.
    pub fn locate_or_create<L>(
        geometry: VolumeGeometry,
        card: &mut SdCard<L>,
    ) -> Result<Self, Error>
    where
        L: SerialLink,
    {
        let mut file = Self { geometry, size: 0 };

        let mut raw = [0u8; 32];
        let raw_len = raw.len();
        card.read_sector(Some(&mut raw), file.entry_sector()?, 0, raw_len)?;
        let slot = DirEntrySlot::new(&raw);

        if DirEntryImage::with_size(0).matches(&slot) {
            file.size = slot.file_size();
            debug!("Log file found, size {}", file.size);
        } else {
            debug!("Log file not provisioned yet, creating it");
            file.update_dir_entry(card)?;
            file.extend_fat_chain(card)?;
        }
        Ok(file)
    }

    /// The file's current size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The mounted volume's geometry.
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Append bytes to the file.
    ///
    /// Works one sector at a time: opens a staged write at each sector
    /// boundary (extending the FAT chain first when the boundary is also a
    /// cluster boundary), streams what fits, and on completing a sector
    /// finalizes it and persists the new size into the directory entry.
    pub fn append<L>(&mut self, card: &mut SdCard<L>, data: &[u8]) -> Result<(), Error>
    where
        L: SerialLink,
    {
        let mut data = data;
        let cluster_len = self.geometry.sectors_per_cluster as u32 * SECTOR_LEN;

        while !data.is_empty() {
            if self.size % SECTOR_LEN == 0 {
                if self.size % cluster_len == 0 {
                    self.extend_fat_chain(card)?;
                }
                card.start_sector_write(self.current_data_sector())?;
            }

            let room = (SECTOR_LEN - self.size % SECTOR_LEN) as usize;
            let chunk = room.min(data.len());
            card.write_bytes(&data[..chunk])?;
            data = &data[chunk..];
            self.size += chunk as u32;

            if self.size % SECTOR_LEN == 0 {
                // Durability checkpoint after every full sector.
                card.finish_sector_write()?;
                self.update_dir_entry(card)?;
            }
        }
        Ok(())
    }

    /// Pad the open sector with spaces and a final newline, then persist the
    /// rounded-up size. A no-op when the size is already sector-aligned.
    pub fn close<L>(&mut self, card: &mut SdCard<L>) -> Result<(), Error>
    where
        L: SerialLink,
    {
        if self.size % SECTOR_LEN == 0 {
            return Ok(());
        }

        let padding = 511 - self.size % SECTOR_LEN;
        for _ in 0..padding {
            card.write_bytes(b" ")?;
        }
        card.write_bytes(b"\n")?;
        card.finish_sector_write()?;

        self.size = (self.size & !(SECTOR_LEN - 1)) + SECTOR_LEN;
        self.update_dir_entry(card)
    }

    /// Sector of the root directory holding the managed entry.
    fn entry_sector(&self) -> Result<u32, Error> {
        let cluster_start = self
            .geometry
            .cluster_to_sector(self.geometry.root_dir_cluster)
            .ok_or(Error::NoFilesystem)?;
        Ok(cluster_start + LOG_FILE_ENTRY_SECTOR)
    }

    /// Data sector the next appended byte lands in.
    fn current_data_sector(&self) -> u32 {
        self.geometry.data_start_sector
            + (LOG_FILE_FIRST_CLUSTER - 2) * self.geometry.sectors_per_cluster as u32
            + self.size / SECTOR_LEN
    }

    /// Rewrite the managed directory entry with the current size.
    ///
    /// The entry is the first slot of its sector and the rest of the sector
    /// is zero-filled by the staged-write finalize.
    fn update_dir_entry<L>(&self, card: &mut SdCard<L>) -> Result<(), Error>
    where
        L: SerialLink,
    {
        card.start_sector_write(self.entry_sector()?)?;
        card.write_bytes(DirEntryImage::with_size(self.size).bytes())?;
        card.finish_sector_write()?;
        Ok(())
    }

    /// Extend the file's cluster chain up to the cluster currently being
    /// written, in every FAT copy.
    fn extend_fat_chain<L>(&self, card: &mut SdCard<L>) -> Result<(), Error>
    where
        L: SerialLink,
    {
        for copy in 0..self.geometry.fat_copies {
            self.extend_fat_copy(card, copy)?;
        }
        Ok(())
    }

    /// Rewrite one FAT copy's sector for the current cluster: a run of
    /// entries each pointing at the next cluster, terminated by the
    /// end-of-chain marker. When the current cluster crosses into a new FAT
    /// sector, the previous sector is rewritten first so its last entry
    /// points onward instead of terminating the chain.
    fn extend_fat_copy<L>(&self, card: &mut SdCard<L>, copy: u8) -> Result<(), Error>
    where
        L: SerialLink,
    {
        let cluster_len = self.geometry.sectors_per_cluster as u32 * SECTOR_LEN;
        let cluster = LOG_FILE_FIRST_CLUSTER + (self.size + 1) / cluster_len;
        let copy_start = self.geometry.fat_start_sector + self.geometry.sectors_per_fat * copy as u32;

        if cluster % FAT_ENTRIES_PER_SECTOR == 0 && cluster != 0 {
            let prev_cluster = cluster - FAT_ENTRIES_PER_SECTOR;
            card.start_sector_write(copy_start + prev_cluster / FAT_ENTRIES_PER_SECTOR)?;
            let mut entry = prev_cluster & !(FAT_ENTRIES_PER_SECTOR - 1);
            for _ in 0..FAT_ENTRIES_PER_SECTOR {
                entry += 1;
                card.write_bytes(&entry.to_le_bytes())?;
            }
            card.finish_sector_write()?;
        }

        card.start_sector_write(copy_start + cluster / FAT_ENTRIES_PER_SECTOR)?;
        let mut entry = cluster & !(FAT_ENTRIES_PER_SECTOR - 1);
        for _ in 0..cluster % FAT_ENTRIES_PER_SECTOR {
            entry += 1;
            card.write_bytes(&entry.to_le_bytes())?;
        }
        card.write_bytes(&END_OF_CHAIN.to_le_bytes())?;
        // Finalize zero-fills the remaining entries of the FAT sector.
        card.finish_sector_write()?;
        Ok(())
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
