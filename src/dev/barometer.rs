//! Support for the Barometer Click (ST `LPS25HB` "MEMS pressure sensor: 260-1260 hPa absolute
//! digital output barometer")
//!
//! The chip is reachable over I2C (address `0x5C`/`0x5D` depending on SA0) or 4-wire SPI.  Both
//! buses go through [`RegisterBus`], so the driver code is the same for either.
use crate::bus::{I2cRegisters, RegisterBus, SpiRegisters};
use crate::Error;

/// Value of `WHO_AM_I` for the LPS25HB.
pub const DEVICE_ID: u8 = 0xbd;

/// I2C address with SA0 tied low.
pub const I2C_ADDRESS: u8 = 0x5c;

const I2C_AUTO_INCREMENT: u8 = 0x80;
const SPI_READ: u8 = 0x80;
const SPI_MULTI: u8 = 0x40;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Regs {
    RefPressXl = 0x08,
    WhoAmI = 0x0f,
    ResConf = 0x10,
    CtrlReg1 = 0x20,
    CtrlReg2 = 0x21,
    StatusReg = 0x27,
    PressOutXl = 0x28,
    TempOutL = 0x2b,
}

impl From<Regs> for u8 {
    fn from(r: Regs) -> u8 {
        r as u8
    }
}

// CTRL_REG1
const PD: u8 = 1 << 7;
const ODR_MASK: u8 = 0b111 << 4;
const BDU: u8 = 1 << 2;

// CTRL_REG2
const BOOT: u8 = 1 << 7;
const SWRESET: u8 = 1 << 2;
const ONE_SHOT: u8 = 1 << 0;

// STATUS_REG
const P_DA: u8 = 1 << 1;
const T_DA: u8 = 1 << 0;

/// Output data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRate {
    /// Conversions only on [`Barometer::trigger_one_shot`].
    OneShot = 0b000,
    Hz1 = 0b001,
    Hz7 = 0b010,
    Hz12_5 = 0b011,
    Hz25 = 0b100,
}

/// Barometer Click driver
pub struct Barometer<B> {
    regs: B,
}

impl<I2C> Barometer<I2cRegisters<I2C>>
where
    I2C: crate::I2cBus,
{
    /// Create a driver for the chip on I2C, `sa0` selecting address `0x5D` over `0x5C`.
    pub fn new_i2c(i2c: I2C, sa0: bool) -> Self {
        let regs = I2cRegisters::new(i2c, I2C_ADDRESS | sa0 as u8)
            .with_auto_increment(I2C_AUTO_INCREMENT);
        Self { regs }
    }
}

impl<SPI> Barometer<SpiRegisters<SPI>>
where
    SPI: crate::SpiBus,
{
    pub fn new_spi(spi: SPI) -> Self {
        Self {
            regs: SpiRegisters::new(spi, SPI_READ, SPI_MULTI),
        }
    }
}

impl<B: RegisterBus> Barometer<B> {
    pub fn release(self) -> B {
        self.regs
    }

    pub fn who_am_i(&mut self) -> Result<u8, Error<B::BusError>> {
        Ok(self.regs.read_reg(Regs::WhoAmI)?)
    }

    /// Check the device id and power the chip up at `rate` with block data update enabled.
    pub fn init(&mut self, rate: DataRate) -> Result<(), Error<B::BusError>> {
        let id = self.who_am_i()?;
        if id != DEVICE_ID {
            log::warn!("LPS25HB: unexpected WHO_AM_I {:#04x}", id);
            return Err(Error::InvalidDevice);
        }
        self.regs
            .write_reg(Regs::CtrlReg1, PD | (rate as u8) << 4 | BDU)?;
        Ok(())
    }

    pub fn set_data_rate(&mut self, rate: DataRate) -> Result<(), Error<B::BusError>> {
        self.regs
            .update_reg(Regs::CtrlReg1, (rate as u8) << 4, ODR_MASK & !((rate as u8) << 4))?;
        Ok(())
    }

    pub fn power_down(&mut self) -> Result<(), Error<B::BusError>> {
        self.regs.update_reg(Regs::CtrlReg1, 0, PD)?;
        Ok(())
    }

    /// Reload trimming values and reset the user registers to their defaults.
    pub fn software_reset(&mut self) -> Result<(), Error<B::BusError>> {
        self.regs
            .write_reg(Regs::CtrlReg2, BOOT | SWRESET)?;
        Ok(())
    }

    /// Start a single conversion; only meaningful with [`DataRate::OneShot`].
    pub fn trigger_one_shot(&mut self) -> Result<(), Error<B::BusError>> {
        self.regs.update_reg(Regs::CtrlReg2, ONE_SHOT, 0)?;
        Ok(())
    }

    /// Returns `(pressure_ready, temperature_ready)`.
    pub fn data_ready(&mut self) -> Result<(bool, bool), Error<B::BusError>> {
        let status = self.regs.read_reg(Regs::StatusReg)?;
        Ok((status & P_DA != 0, status & T_DA != 0))
    }

    /// Raw 24-bit two's complement pressure sample.
    pub fn read_pressure_raw(&mut self) -> Result<i32, Error<B::BusError>> {
        let mut buf = [0u8; 3];
        self.regs.read_regs(Regs::PressOutXl, &mut buf)?;
        // sign-extend from 24 bits
        Ok(i32::from_le_bytes([0, buf[0], buf[1], buf[2]]) >> 8)
    }

    /// Pressure in hPa.
    pub fn read_pressure(&mut self) -> Result<f32, Error<B::BusError>> {
        Ok(self.read_pressure_raw()? as f32 / 4096.0)
    }

    pub fn read_temperature_raw(&mut self) -> Result<i16, Error<B::BusError>> {
        let mut buf = [0u8; 2];
        self.regs.read_regs(Regs::TempOutL, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    /// Temperature in °C.
    pub fn read_temperature(&mut self) -> Result<f32, Error<B::BusError>> {
        Ok(42.5 + self.read_temperature_raw()? as f32 / 480.0)
    }
}

#[cfg(test)]
mod tests {
    use super::DataRate;
    use crate::Error;
    use embedded_hal_mock::eh1::{i2c as mock_i2c, spi as mock_spi};

    #[test]
    fn barometer_i2c() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x5d, vec![0x0f], vec![0xbd]),
            mock_i2c::Transaction::write(0x5d, vec![0x20, 0xc4]),
            mock_i2c::Transaction::write_read(0x5d, vec![0x27], vec![0x03]),
            // 0x3f5000 / 4096 = 1013.0 hPa
            mock_i2c::Transaction::write_read(0x5d, vec![0xa8], vec![0x00, 0x50, 0x3f]),
            // -4800 / 480 = -10 => 32.5 °C
            mock_i2c::Transaction::write_read(0x5d, vec![0xab], vec![0x40, 0xed]),
            mock_i2c::Transaction::write_read(0x5d, vec![0x20], vec![0xc4]),
            mock_i2c::Transaction::write(0x5d, vec![0x20, 0x44]),
        ];
        let mut bus = mock_i2c::Mock::new(&expectations);

        let mut baro = super::Barometer::new_i2c(bus.clone(), true);
        baro.init(DataRate::Hz25).unwrap();
        assert_eq!(baro.data_ready().unwrap(), (true, true));
        assert_eq!(baro.read_pressure().unwrap(), 1013.0);
        assert_eq!(baro.read_temperature().unwrap(), 32.5);
        baro.power_down().unwrap();

        bus.done();
    }

    #[test]
    fn barometer_wrong_device() {
        let expectations = [mock_i2c::Transaction::write_read(
            0x5c,
            vec![0x0f],
            vec![0xb1],
        )];
        let mut bus = mock_i2c::Mock::new(&expectations);

        let mut baro = super::Barometer::new_i2c(bus.clone(), false);
        assert_eq!(baro.init(DataRate::Hz1), Err(Error::InvalidDevice));

        bus.done();
    }

    #[test]
    fn barometer_spi() {
        let expectations = [
            // data rate change keeps PD and BDU
            mock_spi::Transaction::transaction_start(),
            mock_spi::Transaction::write_vec(vec![0xa0]),
            mock_spi::Transaction::read(0xc4),
            mock_spi::Transaction::transaction_end(),
            mock_spi::Transaction::transaction_start(),
            mock_spi::Transaction::write_vec(vec![0x20, 0x94]),
            mock_spi::Transaction::transaction_end(),
            // negative pressure sample is sign-extended
            mock_spi::Transaction::transaction_start(),
            mock_spi::Transaction::write_vec(vec![0xe8]),
            mock_spi::Transaction::read_vec(vec![0xff, 0xff, 0xff]),
            mock_spi::Transaction::transaction_end(),
            mock_spi::Transaction::transaction_start(),
            mock_spi::Transaction::write_vec(vec![0x21, 0x84]),
            mock_spi::Transaction::transaction_end(),
        ];
        let mut bus = mock_spi::Mock::new(&expectations);

        let mut baro = super::Barometer::new_spi(bus.clone());
        baro.set_data_rate(DataRate::Hz1).unwrap();
        assert_eq!(baro.read_pressure_raw().unwrap(), -1);
        baro.software_reset().unwrap();

        bus.done();
    }
}
