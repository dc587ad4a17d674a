use embedded_hal::i2c as hal_i2c;
use embedded_hal::spi as hal_spi;

/// Blanket trait for the byte-stream side of a Click board (usually a UART).
///
/// Implemented for every type that provides `embedded_io::{Read, ReadReady, Write}`.  The read
/// side never blocks: [`Transport::receive`] returns 0 when nothing is pending.
pub trait Transport {
    type BusError;

    /// Write all of `bytes` and flush.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), Self::BusError>;

    /// Read whatever is immediately available into `buf`, returning the number of bytes read.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::BusError>;
}

impl<T> Transport for T
where
    T: embedded_io::Read + embedded_io::ReadReady + embedded_io::Write,
{
    type BusError = T::Error;

    fn transmit(&mut self, bytes: &[u8]) -> Result<(), Self::BusError> {
        embedded_io::Write::write_all(self, bytes)?;
        embedded_io::Write::flush(self)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::BusError> {
        if buf.is_empty() || !self.read_ready()? {
            return Ok(0);
        }
        self.read(buf)
    }
}

/// Blanket trait for types implementing `i2c::I2c`
pub trait I2cBus: hal_i2c::I2c {
    type BusError: From<<Self as hal_i2c::ErrorType>::Error>;
}

impl<T> I2cBus for T
where
    T: hal_i2c::I2c,
{
    type BusError = T::Error;
}

/// Blanket trait for types implementing `spi::SpiDevice`
pub trait SpiBus: hal_spi::SpiDevice {
    type BusError: From<<Self as hal_spi::ErrorType>::Error>;
}

impl<T> SpiBus for T
where
    T: hal_spi::SpiDevice,
{
    type BusError = T::Error;
}

/// Register-pointer access to a chip, independent of whether it sits on I2C or SPI.
///
/// Every register-level driver in this crate talks to its chip through this trait, so the
/// per-device code only carries its register map.
pub trait RegisterBus {
    type BusError;

    fn write_reg<R: Into<u8>>(&mut self, reg: R, value: u8) -> Result<(), Self::BusError>;

    /// Read `buf.len()` consecutive registers starting at `reg`.
    fn read_regs<R: Into<u8>>(&mut self, reg: R, buf: &mut [u8]) -> Result<(), Self::BusError>;

    /// Send a bare command byte without payload.
    fn write_command(&mut self, cmd: u8) -> Result<(), Self::BusError>;

    fn read_reg<R: Into<u8>>(&mut self, reg: R) -> Result<u8, Self::BusError> {
        let mut buf = [0x00];
        self.read_regs(reg, &mut buf)?;
        Ok(buf[0])
    }

    fn update_reg<R: Into<u8>>(
        &mut self,
        reg: R,
        mask_set: u8,
        mask_clear: u8,
    ) -> Result<(), Self::BusError> {
        let reg = reg.into();
        let mut val = self.read_reg(reg)?;
        val |= mask_set;
        val &= !mask_clear;
        self.write_reg(reg, val)
    }
}

/// I2C device with an 8-bit register pointer.
pub struct I2cRegisters<I2C> {
    i2c: I2C,
    addr: u8,
    auto_increment: u8,
}

impl<I2C> I2cRegisters<I2C> {
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self {
            i2c,
            addr,
            auto_increment: 0x00,
        }
    }

    /// Flag OR-ed into the register pointer for reads longer than one byte.
    pub fn with_auto_increment(mut self, flag: u8) -> Self {
        self.auto_increment = flag;
        self
    }

    pub fn address(&self) -> u8 {
        self.addr
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2cBus> RegisterBus for I2cRegisters<I2C> {
    type BusError = I2C::BusError;

    fn write_reg<R: Into<u8>>(&mut self, reg: R, value: u8) -> Result<(), Self::BusError> {
        self.i2c.write(self.addr, &[reg.into(), value])?;
        Ok(())
    }

    fn read_regs<R: Into<u8>>(&mut self, reg: R, buf: &mut [u8]) -> Result<(), Self::BusError> {
        let mut reg = reg.into();
        if buf.len() > 1 {
            reg |= self.auto_increment;
        }
        self.i2c.write_read(self.addr, &[reg], buf)?;
        Ok(())
    }

    fn write_command(&mut self, cmd: u8) -> Result<(), Self::BusError> {
        self.i2c.write(self.addr, &[cmd])?;
        Ok(())
    }
}

/// SPI device addressed by a leading register byte.
///
/// Reads set `read_flag` in the register byte and, for multi-byte reads, `multi_flag` as well.
pub struct SpiRegisters<SPI> {
    spi: SPI,
    read_flag: u8,
    multi_flag: u8,
}

impl<SPI> SpiRegisters<SPI> {
    pub fn new(spi: SPI, read_flag: u8, multi_flag: u8) -> Self {
        Self {
            spi,
            read_flag,
            multi_flag,
        }
    }

    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiBus> RegisterBus for SpiRegisters<SPI> {
    type BusError = SPI::BusError;

    fn write_reg<R: Into<u8>>(&mut self, reg: R, value: u8) -> Result<(), Self::BusError> {
        self.spi.write(&[reg.into() & !self.read_flag, value])?;
        Ok(())
    }

    fn read_regs<R: Into<u8>>(&mut self, reg: R, buf: &mut [u8]) -> Result<(), Self::BusError> {
        let mut header = reg.into() | self.read_flag;
        if buf.len() > 1 {
            header |= self.multi_flag;
        }
        let write = [header];
        let mut ops = [
            hal_spi::Operation::Write(&write),
            hal_spi::Operation::Read(buf),
        ];
        self.spi.transaction(&mut ops)?;
        Ok(())
    }

    fn write_command(&mut self, cmd: u8) -> Result<(), Self::BusError> {
        self.spi.write(&[cmd])?;
        Ok(())
    }
}
