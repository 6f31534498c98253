//! The managed file's directory entry.
//!
//! The log file is pre-provisioned at a fixed directory slot with a fixed
//! name, attributes and starting cluster; only the size field of its 32-byte
//! entry is ever rewritten.

bitflags::bitflags! {
    /// FAT directory-entry attribute bits.
    pub struct Attributes: u8 {
        const READ_ONLY = (1 << 0);
        const HIDDEN = (1 << 1);
        const SYSTEM = (1 << 2);
        const VOLUME_ID = (1 << 3);
        const DIRECTORY = (1 << 4);
        const ARCHIVE = (1 << 5);
    }
}

/// The cluster the log file starts at. One FAT sector's worth of clusters
/// in, so the file's chain begins exactly at the second FAT sector.
pub const LOG_FILE_FIRST_CLUSTER: u32 = 128;

/// Sector of the root directory cluster holding the managed entry (the
/// entry is the first slot of that sector).
pub const LOG_FILE_ENTRY_SECTOR: u32 = 1;

/// A borrowed view over a raw 32-byte directory record.
pub struct DirEntrySlot<'a> {
    data: &'a [u8],
}

impl<'a> DirEntrySlot<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn data(&self) -> &[u8] {
        self.data
    }

    pub fn name(&self) -> &[u8] {
        &self.data[0..DirEntryImage::NAME_LEN]
    }

    define_field!(file_size, u32, 28);
}

/// The managed file's fixed 32-byte directory entry image.
///
/// Name `LOG.TXT`, archive attribute, first cluster
/// [`LOG_FILE_FIRST_CLUSTER`], baked creation and modification timestamps.
/// Everything except the size field is constant.
pub struct DirEntryImage {
    bytes: [u8; 32],
}

impl DirEntryImage {
    /// Length of the name + extension comparison prefix.
    pub const NAME_LEN: usize = 11;

    #[rustfmt::skip]
    const TEMPLATE: [u8; 32] = [
        0x4C, 0x4F, 0x47, 0x20, 0x20, 0x20, 0x20, 0x20, // name "LOG"
        0x54, 0x58, 0x54,                               // extension "TXT"
        0x20,                                           // attributes
        0x00,                                           // reserved
        0xBC,                                           // creation time, 10 ms units
        0x47, 0xAD, 0xF4, 0x4E,                         // creation time/date
        0xF4, 0x4E,                                     // last access date
        0x00, 0x00,                                     // first cluster, high word
        0x48, 0xAD, 0xF4, 0x4E,                         // modification time/date
        LOG_FILE_FIRST_CLUSTER as u8, 0x00,             // first cluster, low word
        0x00, 0x00, 0x00, 0x00,                         // file size
    ];

    /// Build the entry image carrying the given file size.
    pub fn with_size(size: u32) -> Self {
        let mut image = Self {
            bytes: Self::TEMPLATE,
        };
        image.set_file_size(size);
        image
    }

    /// The raw 32 bytes, as written to the card.
    pub fn bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// The 11-byte name + extension field.
    pub fn name(&self) -> &[u8] {
        &self.bytes[0..Self::NAME_LEN]
    }

    /// Whether a raw directory record holds the managed file.
    pub fn matches(&self, slot: &DirEntrySlot) -> bool {
        slot.name() == self.name()
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.bytes[11])
    }

    pub fn first_cluster(&self) -> u32 {
        let high = self.fst_clus_hi() as u32;
        let low = self.fst_clus_lo() as u32;
        high << 16 | low
    }

    fn data(&self) -> &[u8] {
        &self.bytes
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    define_field!(fst_clus_hi, u16, 20);
    define_field!(fst_clus_lo, u16, 26);
    define_field!(file_size, set_file_size, u32, 28);
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
