//! embedded-sdlog - SD/MMC protocol definitions
//!
//! Command indices and marker bytes for the card's serial protocol. An
//! application-specific command carries the `APP_CMD_MARKER` bit and is sent
//! as the CMD55 + CMD pair.

/// GO_IDLE_STATE - reset the card to idle state
pub const CMD0: u8 = 0;
/// SEND_OP_COND - initialize an MMC card
pub const CMD1: u8 = 1;
/// SEND_IF_COND - probe voltage range and check pattern
pub const CMD8: u8 = 8;
/// SET_BLOCKLEN - fix the block length, in bytes
pub const CMD16: u8 = 16;
/// READ_SINGLE_BLOCK - read one block of data
pub const CMD17: u8 = 17;
/// WRITE_BLOCK - write one block of data
pub const CMD24: u8 = 24;
/// APP_CMD - prefix for an application-specific command
pub const CMD55: u8 = 55;
/// READ_OCR - read the operation-condition register
pub const CMD58: u8 = 58;
/// APP_SEND_OP_COND - initialize an SD card
pub const ACMD41: u8 = APP_CMD_MARKER | 41;

/// Flags a command index as application-specific.
pub const APP_CMD_MARKER: u8 = 0x80;

/// R1 response: card is in idle state
pub const R1_IDLE_STATE: u8 = 0x01;
/// R1 response: card has left idle state and is ready
pub const R1_READY_STATE: u8 = 0x00;

/// Marks the start of a data block during sector transfer
pub const DATA_START_TOKEN: u8 = 0xFE;
/// Mask covering the status bits of a data response token
pub const DATA_RES_MASK: u8 = 0x1F;
/// Data response token: data accepted
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// Valid CRC byte for CMD0 with argument 0
pub const CMD0_CRC: u8 = 0x95;
/// Valid CRC byte for CMD8 with argument 0x1AA
pub const CMD8_CRC: u8 = 0x87;
/// Dummy CRC + stop bit, used while the card runs with CRC disabled
pub const DUMMY_CRC: u8 = 0x01;

/// Argument to CMD8: 2.7-3.6V range plus the 0xAA check pattern
pub const CMD8_CHECK_ARG: u32 = 0x1AA;
/// ACMD41 argument bit announcing high-capacity support
pub const ACMD41_HCS: u32 = 1 << 30;
/// OCR bit (first response byte) flagging a block-addressed card
pub const OCR_CCS: u8 = 0x40;

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
