//! A synthetic card for exercising the full stack without hardware.
//!
//! `FakeCard` implements [`SerialLink`] and emulates the card side of the
//! serial protocol byte-by-byte: command frames, R1/R7 responses, data
//! tokens, staged writes and the OCR, backed by a sparse in-memory sector
//! map. Sectors never written read as zeros.

use std::collections::{BTreeMap, VecDeque};

use crate::link::SerialLink;
use crate::sdcard::proto::*;
use crate::sdcard::{CardKind, Error as SdError};
use crate::{ClockSource, DateTime, Error, SdCard, SdLogger};

/// Which card personality the fake plays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FakeKind {
    /// SDv2, high capacity, block addressed
    Sd2Hc,
    /// SDv2, standard capacity, byte addressed
    Sd2Sc,
    /// SDv1, byte addressed
    Sd1,
    /// MMC version 3, byte addressed
    Mmc3,
    /// Answers the reset command but never leaves the idle state
    StuckIdle,
}

/// Polls the fake lets ACMD41/CMD1 spin before reporting ready.
const READY_AFTER_POLLS: u32 = 2;

enum Phase {
    Idle,
    AwaitDataToken { sector: u32 },
    Data { sector: u32, bytes: Vec<u8> },
}

pub(crate) struct FakeCard {
    kind: FakeKind,
    memory: BTreeMap<u32, [u8; 512]>,
    selected: bool,
    out: VecDeque<u8>,
    frame: Vec<u8>,
    phase: Phase,
    ready_countdown: u32,
    /// Reject single-block reads with an error response.
    pub(crate) fail_reads: bool,
    /// Reset commands seen; one per initialization attempt.
    pub(crate) reset_count: u32,
    /// Total bytes exchanged in either direction.
    pub(crate) exchanges: u64,
    /// Whether the most recent exchange happened with the card deselected.
    pub(crate) last_exchange_deselected: bool,
}

impl FakeCard {
    pub(crate) fn new(kind: FakeKind) -> Self {
        Self {
            kind,
            memory: BTreeMap::new(),
            selected: false,
            out: VecDeque::new(),
            frame: Vec::new(),
            phase: Phase::Idle,
            ready_countdown: READY_AFTER_POLLS,
            fail_reads: false,
            reset_count: 0,
            exchanges: 0,
            last_exchange_deselected: false,
        }
    }

    pub(crate) fn sector(&self, index: u32) -> [u8; 512] {
        self.memory.get(&index).copied().unwrap_or([0u8; 512])
    }

    pub(crate) fn set_sector(&mut self, index: u32, data: [u8; 512]) {
        self.memory.insert(index, data);
    }

    pub(crate) fn patch(&mut self, index: u32, offset: usize, bytes: &[u8]) {
        let mut sector = self.sector(index);
        sector[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.set_sector(index, sector);
    }

    fn block_addressed(&self) -> bool {
        self.kind == FakeKind::Sd2Hc
    }

    fn arg_to_sector(&self, arg: u32) -> u32 {
        if self.block_addressed() {
            arg
        } else {
            assert_eq!(arg % 512, 0, "byte address not sector aligned");
            arg / 512
        }
    }

    fn execute_command(&mut self) {
        let cmd = self.frame[0] & 0x3F;
        let arg = u32::from_be_bytes([self.frame[1], self.frame[2], self.frame[3], self.frame[4]]);
        self.frame.clear();

        // A real card needs a byte or two before the response appears; make
        // the driver's response poll do some work.
        self.out.push_back(0xFF);

        match cmd {
            CMD0 => {
                self.reset_count += 1;
                self.ready_countdown = READY_AFTER_POLLS;
                self.out.push_back(R1_IDLE_STATE);
            }
            CMD8 => match self.kind {
                FakeKind::Sd2Hc | FakeKind::Sd2Sc | FakeKind::StuckIdle => {
                    self.out.push_back(R1_IDLE_STATE);
                    // R7: echo of the voltage range and check pattern.
                    self.out.extend([0x00, 0x00, 0x01, 0xAA]);
                }
                FakeKind::Sd1 | FakeKind::Mmc3 => {
                    // Illegal command while idle.
                    self.out.push_back(0x05);
                }
            },
            CMD55 => {
                let response = if self.kind == FakeKind::Mmc3 {
                    0x05
                } else {
                    R1_IDLE_STATE
                };
                self.out.push_back(response);
            }
            41 | CMD1 => {
                let response = if self.kind == FakeKind::StuckIdle {
                    R1_IDLE_STATE
                } else if self.ready_countdown > 0 {
                    self.ready_countdown -= 1;
                    R1_IDLE_STATE
                } else {
                    R1_READY_STATE
                };
                self.out.push_back(response);
            }
            CMD58 => {
                self.out.push_back(R1_READY_STATE);
                let ocr0 = if self.block_addressed() { 0xC0 } else { 0x80 };
                self.out.extend([ocr0, 0xFF, 0x80, 0x00]);
            }
            CMD16 => {
                assert_eq!(arg, 512);
                self.out.push_back(R1_READY_STATE);
            }
            CMD17 => {
                if self.fail_reads {
                    self.out.push_back(0x04);
                    return;
                }
                self.out.push_back(R1_READY_STATE);
                let sector = self.arg_to_sector(arg);
                self.out.push_back(0xFF);
                self.out.push_back(DATA_START_TOKEN);
                let data = self.sector(sector);
                self.out.extend(data.iter().copied());
                // CRC; the driver clocks it through and ignores it.
                self.out.extend([0x55, 0xAA]);
            }
            CMD24 => {
                self.out.push_back(R1_READY_STATE);
                self.phase = Phase::AwaitDataToken {
                    sector: self.arg_to_sector(arg),
                };
            }
            _ => panic!("unexpected command {}", cmd),
        }
    }

    fn accept_byte(&mut self, byte: u8) {
        if let Phase::AwaitDataToken { sector } = self.phase {
            if byte == DATA_START_TOKEN {
                self.phase = Phase::Data {
                    sector,
                    bytes: Vec::new(),
                };
            }
            return;
        }

        if let Phase::Data {
            sector,
            ref mut bytes,
        } = self.phase
        {
            bytes.push(byte);
            if bytes.len() == 512 + 2 {
                let mut data = [0u8; 512];
                data.copy_from_slice(&bytes[..512]);
                self.set_sector(sector, data);
                self.phase = Phase::Idle;
                // Data response, one busy byte, then ready.
                self.out.extend([DATA_RES_ACCEPTED, 0x00, 0xFF]);
            }
            return;
        }

        // Idle: collect a 6-byte command frame. The start byte carries the
        // 0b01 marker in its top bits.
        if !self.frame.is_empty() {
            self.frame.push(byte);
            if self.frame.len() == 6 {
                self.execute_command();
            }
        } else if byte & 0xC0 == 0x40 {
            self.frame.push(byte);
        }
    }
}

impl SerialLink for FakeCard {
    type Error = core::convert::Infallible;

    fn select(&mut self) -> Result<(), Self::Error> {
        self.selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        // Deselecting aborts whatever the card was saying or receiving.
        self.selected = false;
        self.out.clear();
        self.frame.clear();
        self.phase = Phase::Idle;
        Ok(())
    }

    fn send_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.exchanges += 1;
        self.last_exchange_deselected = !self.selected;
        if self.selected {
            self.accept_byte(byte);
        }
        Ok(())
    }

    fn receive_byte(&mut self) -> Result<u8, Self::Error> {
        self.exchanges += 1;
        self.last_exchange_deselected = !self.selected;
        if self.selected {
            Ok(self.out.pop_front().unwrap_or(0xFF))
        } else {
            Ok(0xFF)
        }
    }
}

// ****************************************************************************
//
// Test volume geometry
//
// ****************************************************************************

pub(crate) const SECTORS_PER_CLUSTER: u8 = 4;
pub(crate) const RESERVED_SECTORS: u16 = 32;
pub(crate) const FAT_COPIES: u8 = 2;
pub(crate) const SECTORS_PER_FAT: u32 = 512;
pub(crate) const ROOT_CLUSTER: u32 = 2;
/// Exactly 0xFFF7 FAT entries, the smallest count that still mounts.
pub(crate) const TOTAL_SECTORS: u32 =
    (0xFFF7 - 2) * SECTORS_PER_CLUSTER as u32 + RESERVED_SECTORS as u32 + FAT_COPIES as u32 * SECTORS_PER_FAT;

pub(crate) const FAT_START: u32 = RESERVED_SECTORS as u32;
pub(crate) const DATA_START: u32 = FAT_START + FAT_COPIES as u32 * SECTORS_PER_FAT;
/// The managed entry: first slot of the second sector of the root cluster.
pub(crate) const ENTRY_SECTOR: u32 = DATA_START + 1;
/// First data sector of the log file's fixed starting cluster (128).
pub(crate) const FIRST_LOG_SECTOR: u32 = DATA_START + 126 * SECTORS_PER_CLUSTER as u32;
pub(crate) const CLUSTER_LEN: u32 = SECTORS_PER_CLUSTER as u32 * 512;

/// Lay down a FAT32 boot sector at `boot_sector`.
pub(crate) fn format_volume_at(card: &mut FakeCard, boot_sector: u32, total_sectors: u32) {
    let mut boot = [0u8; 512];
    boot[13] = SECTORS_PER_CLUSTER;
    boot[14..16].copy_from_slice(&RESERVED_SECTORS.to_le_bytes());
    boot[16] = FAT_COPIES;
    boot[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    boot[36..40].copy_from_slice(&SECTORS_PER_FAT.to_le_bytes());
    boot[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
    boot[82..90].copy_from_slice(b"FAT32   ");
    boot[510] = 0x55;
    boot[511] = 0xAA;
    card.set_sector(boot_sector, boot);
}

/// A freshly formatted, never-logged-to card.
pub(crate) fn formatted(kind: FakeKind) -> FakeCard {
    let mut card = FakeCard::new(kind);
    format_volume_at(&mut card, 0, TOTAL_SECTORS);
    card
}

/// FAT entry for `cluster` as stored on the card, for the given FAT copy.
pub(crate) fn fat_entry(card: &FakeCard, copy: u8, cluster: u32) -> u32 {
    let sector = FAT_START + SECTORS_PER_FAT * copy as u32 + cluster / 128;
    let offset = (cluster % 128) as usize * 4;
    let data = card.sector(sector);
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

// ****************************************************************************
//
// Card protocol tests
//
// ****************************************************************************

fn init_card(kind: FakeKind) -> (FakeCard, CardKind) {
    let mut fake = formatted(kind);
    let detected = {
        let mut card = SdCard::new(&mut fake);
        card.initialize().unwrap();
        card.card_kind().unwrap()
    };
    (fake, detected)
}

#[test]
fn initialize_classifies_sd2_high_capacity() {
    let (_, kind) = init_card(FakeKind::Sd2Hc);
    assert_eq!(
        kind,
        CardKind::Sd2 {
            block_addressed: true
        }
    );
}

#[test]
fn initialize_classifies_sd2_standard_capacity() {
    let (_, kind) = init_card(FakeKind::Sd2Sc);
    assert_eq!(
        kind,
        CardKind::Sd2 {
            block_addressed: false
        }
    );
}

#[test]
fn initialize_classifies_sd1() {
    let (_, kind) = init_card(FakeKind::Sd1);
    assert_eq!(kind, CardKind::Sd1);
}

#[test]
fn initialize_classifies_mmc3() {
    let (_, kind) = init_card(FakeKind::Mmc3);
    assert_eq!(kind, CardKind::Mmc3);
}

#[test]
fn initialize_times_out_on_card_stuck_in_idle() {
    let mut fake = FakeCard::new(FakeKind::StuckIdle);
    let mut card = SdCard::new(&mut fake);
    assert_eq!(card.initialize(), Err(SdError::TimeoutACommand(41)));
    assert_eq!(card.card_kind(), None);
}

#[test]
fn read_sector_partial_reads_and_drains_bus() {
    let mut fake = formatted(FakeKind::Sd2Hc);
    let mut pattern = [0u8; 512];
    for (i, byte) in pattern.iter_mut().enumerate() {
        *byte = i as u8;
    }
    fake.set_sector(5, pattern);

    let mut card = SdCard::new(&mut fake);
    card.initialize().unwrap();

    let mut buffer = [0u8; 16];
    card.read_sector(Some(&mut buffer), 5, 100, 16).unwrap();
    assert_eq!(&buffer[..], &pattern[100..116]);

    // Discard mode clocks the sector through without storing it.
    card.read_sector(None, 5, 0, 512).unwrap();

    let fake = card.release();
    assert!(!fake.selected);
    assert!(fake.last_exchange_deselected);
}

#[test]
fn read_sector_failure_still_drains_bus() {
    let mut fake = formatted(FakeKind::Sd2Hc);
    // Initialization issues no reads, so the flag can be set up front.
    fake.fail_reads = true;

    let mut card = SdCard::new(&mut fake);
    card.initialize().unwrap();

    let mut buffer = [0u8; 4];
    assert_eq!(
        card.read_sector(Some(&mut buffer), 0, 0, 4),
        Err(SdError::ReadError)
    );

    let fake = card.release();
    assert!(!fake.selected);
    assert!(fake.last_exchange_deselected);
}

#[test]
fn byte_addressed_cards_scale_sector_addresses() {
    // The fake asserts that byte addresses are sector aligned and divides
    // them back down, so a successful mount on a byte-addressed card proves
    // the conversion.
    let mut fake = formatted(FakeKind::Sd1);
    let mut logger = SdLogger::new(&mut fake);
    logger.init().unwrap();
    assert_eq!(logger.size(), Some(0));
}

// ****************************************************************************
//
// Session tests
//
// ****************************************************************************

struct FixedClock(Option<DateTime>);

impl ClockSource for FixedClock {
    fn read_current_time(&mut self) -> Option<DateTime> {
        self.0
    }
}

#[test]
fn init_exhausts_three_attempts_on_a_stuck_card() {
    let mut fake = FakeCard::new(FakeKind::StuckIdle);
    {
        let mut logger = SdLogger::new(&mut fake);
        assert_eq!(logger.init(), Err(Error::NotReady));
    }
    // One reset command per mount attempt.
    assert_eq!(fake.reset_count, 3);
}

#[test]
fn append_before_init_is_not_enabled() {
    let mut fake = FakeCard::new(FakeKind::Sd2Hc);
    {
        let mut logger = SdLogger::new(&mut fake);
        assert_eq!(logger.append(b"x"), Err(Error::NotEnabled));
        assert_eq!(logger.write_byte(b'x'), Err(Error::NotEnabled));
        assert_eq!(logger.close(), Err(Error::NotEnabled));
    }
    // Usage errors never attempt I/O.
    assert_eq!(fake.exchanges, 0);
}

#[test]
fn write_byte_appends_a_single_byte() {
    let mut fake = formatted(FakeKind::Sd2Hc);
    {
        let mut logger = SdLogger::new(&mut fake);
        logger.init().unwrap();
        for &byte in b"ok\n" {
            logger.write_byte(byte).unwrap();
        }
        assert_eq!(logger.size(), Some(3));
        logger.close().unwrap();
    }
    let data = fake.sector(FIRST_LOG_SECTOR);
    assert_eq!(&data[..3], b"ok\n");
}

#[test]
fn write_timestamp_formats_and_stamps() {
    let mut fake = formatted(FakeKind::Sd2Hc);
    {
        let clock = FixedClock(Some(DateTime {
            day: 5,
            month: 11,
            year: 2025,
            hour: 9,
            minute: 7,
            second: 3,
        }));
        let mut logger = SdLogger::with_clock(&mut fake, clock);
        logger.init().unwrap();
        assert!(logger.write_timestamp());
        assert_eq!(logger.size(), Some(20));
        logger.close().unwrap();
    }
    let data = fake.sector(FIRST_LOG_SECTOR);
    assert_eq!(&data[..20], b"05-11-2025 09:07:03 ");
}

#[test]
fn write_timestamp_without_clock_is_vacuous() {
    let mut fake = formatted(FakeKind::Sd2Hc);
    let mut logger = SdLogger::new(&mut fake);
    logger.init().unwrap();
    assert!(logger.write_timestamp());
    assert_eq!(logger.size(), Some(0));
}

#[test]
fn write_timestamp_reports_an_absent_clock() {
    let mut fake = formatted(FakeKind::Sd2Hc);
    let mut logger = SdLogger::with_clock(&mut fake, FixedClock(None));
    logger.init().unwrap();
    assert!(!logger.write_timestamp());
    assert_eq!(logger.size(), Some(0));
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
