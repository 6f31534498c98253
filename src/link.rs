//! embedded-sdlog - Serial link support
//!
//! The card protocol layer talks to the card through the [`SerialLink`]
//! trait: one byte per call, no framing, no buffering. [`BitBangLink`] is the
//! supplied implementation, shifting bits over four GPIO pins for targets
//! without a free hardware SPI peripheral.

use embedded_hal::digital::v2::{InputPin, OutputPin};

/// Raw bit-level transport to the card.
///
/// Implementations must shift bytes MSB-first and must keep the data-out line
/// high while receiving, which is what the card expects between frames.
pub trait SerialLink {
    /// The errors the link can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Assert the card's select line.
    fn select(&mut self) -> Result<(), Self::Error>;
    /// Deassert the card's select line.
    fn deselect(&mut self) -> Result<(), Self::Error>;
    /// Shift one byte out to the card.
    fn send_byte(&mut self, byte: u8) -> Result<(), Self::Error>;
    /// Shift one byte in from the card.
    fn receive_byte(&mut self) -> Result<u8, Self::Error>;
}

impl<T> SerialLink for &mut T
where
    T: SerialLink,
{
    type Error = T::Error;

    fn select(&mut self) -> Result<(), Self::Error> {
        (*self).select()
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        (*self).deselect()
    }

    fn send_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        (*self).send_byte(byte)
    }

    fn receive_byte(&mut self) -> Result<u8, Self::Error> {
        (*self).receive_byte()
    }
}

/// A pin operation failed.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GpioError;

/// A [`SerialLink`] bit-banged over four GPIO pins.
///
/// Clock idles low (SPI mode 0): data is set up while the clock is low and
/// the card samples on the rising edge. Any pins will do, which is the point
/// of bit-banging.
pub struct BitBangLink<Sck, Mosi, Miso, Cs> {
    sck: Sck,
    mosi: Mosi,
    miso: Miso,
    cs: Cs,
}

impl<Sck, Mosi, Miso, Cs> BitBangLink<Sck, Mosi, Miso, Cs>
where
    Sck: OutputPin,
    Mosi: OutputPin,
    Miso: InputPin,
    Cs: OutputPin,
{
    /// Build a link from the four pins. The pins must already be configured
    /// (clock and data-out as push-pull outputs, data-in as an input).
    pub fn new(sck: Sck, mosi: Mosi, miso: Miso, cs: Cs) -> Self {
        Self {
            sck,
            mosi,
            miso,
            cs,
        }
    }

    /// Release the pins.
    pub fn free(self) -> (Sck, Mosi, Miso, Cs) {
        (self.sck, self.mosi, self.miso, self.cs)
    }

    fn clock_pulse(&mut self) -> Result<(), GpioError> {
        self.sck.set_high().map_err(|_| GpioError)?;
        self.sck.set_low().map_err(|_| GpioError)
    }
}

impl<Sck, Mosi, Miso, Cs> SerialLink for BitBangLink<Sck, Mosi, Miso, Cs>
where
    Sck: OutputPin,
    Mosi: OutputPin,
    Miso: InputPin,
    Cs: OutputPin,
{
    type Error = GpioError;

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(|_| GpioError)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        self.cs.set_high().map_err(|_| GpioError)
    }

    fn send_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        for bit in (0..8).rev() {
            if (byte >> bit) & 1 != 0 {
                self.mosi.set_high().map_err(|_| GpioError)?;
            } else {
                self.mosi.set_low().map_err(|_| GpioError)?;
            }
            self.clock_pulse()?;
        }
        Ok(())
    }

    fn receive_byte(&mut self) -> Result<u8, Self::Error> {
        // Keep the data-out line high while clocking a byte in.
        self.mosi.set_high().map_err(|_| GpioError)?;
        let mut byte = 0;
        for _ in 0..8 {
            self.sck.set_high().map_err(|_| GpioError)?;
            byte <<= 1;
            if self.miso.is_high().map_err(|_| GpioError)? {
                byte |= 1;
            }
            self.sck.set_low().map_err(|_| GpioError)?;
        }
        Ok(byte)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
