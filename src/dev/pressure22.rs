//! Support for the Pressure 22 Click (TE `MS5837-02BA` "Ultra-small, gel-filled, pressure sensor
//! with stainless steel cap")
//!
//! The chip has no register map: every access is a one-byte command, optionally followed by a
//! read.  Factory calibration lives in a 7-word PROM protected by a 4-bit CRC.  Raw 24-bit samples
//! are compensated in integer arithmetic as described in the datasheet, including the
//! second-order correction below 20 °C.
use embedded_hal::delay::DelayNs;

use crate::bus::{I2cRegisters, RegisterBus};
use crate::Error;

pub const I2C_ADDRESS: u8 = 0x76;

const CMD_RESET: u8 = 0x1e;
const CMD_ADC_READ: u8 = 0x00;
const CMD_CONVERT_D1: u8 = 0x40;
const CMD_CONVERT_D2: u8 = 0x50;
const CMD_PROM_READ: u8 = 0xa0;

const PROM_WORDS: usize = 7;
const RESET_DELAY_MS: u32 = 3;

/// ADC oversampling ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Oversampling {
    Osr256 = 0,
    Osr512 = 1,
    Osr1024 = 2,
    Osr2048 = 3,
    Osr4096 = 4,
    Osr8192 = 5,
}

impl Oversampling {
    fn command_offset(self) -> u8 {
        2 * self as u8
    }

    /// Worst-case conversion time, rounded up.
    fn conversion_ms(self) -> u32 {
        match self {
            Oversampling::Osr256 => 1,
            Oversampling::Osr512 => 2,
            Oversampling::Osr1024 => 3,
            Oversampling::Osr2048 => 5,
            Oversampling::Osr4096 => 9,
            Oversampling::Osr8192 => 18,
        }
    }
}

/// Compensated reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Temperature in 0.01 °C.
    pub temperature: i32,
    /// Pressure in 0.01 mbar.
    pub pressure: i32,
}

impl Measurement {
    pub fn temperature_celsius(&self) -> f32 {
        self.temperature as f32 / 100.0
    }

    pub fn pressure_mbar(&self) -> f32 {
        self.pressure as f32 / 100.0
    }
}

/// Pressure 22 Click driver
pub struct Pressure22<I2C, D> {
    regs: I2cRegisters<I2C>,
    delay: D,
    prom: [u16; PROM_WORDS],
    osr: Oversampling,
}

impl<I2C, D> Pressure22<I2C, D>
where
    I2C: crate::I2cBus,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            regs: I2cRegisters::new(i2c, I2C_ADDRESS),
            delay,
            prom: [0; PROM_WORDS],
            osr: Oversampling::Osr8192,
        }
    }

    pub fn release(self) -> (I2C, D) {
        (self.regs.release(), self.delay)
    }

    /// Reset the chip and load its calibration PROM.
    pub fn init(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.reset()?;
        self.read_prom()
    }

    pub fn reset(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.regs.write_command(CMD_RESET)?;
        self.delay.delay_ms(RESET_DELAY_MS);
        Ok(())
    }

    /// Read the calibration words and check them against the CRC in word 0.
    pub fn read_prom(&mut self) -> Result<(), Error<I2C::BusError>> {
        let mut prom = [0u16; PROM_WORDS];
        for (i, word) in prom.iter_mut().enumerate() {
            let mut buf = [0u8; 2];
            self.regs
                .read_regs(CMD_PROM_READ + 2 * i as u8, &mut buf)?;
            *word = u16::from_be_bytes(buf);
        }

        let expected = (prom[0] >> 12) as u8;
        let actual = crc4(&prom);
        if expected != actual {
            log::warn!(
                "MS5837: PROM crc mismatch (stored {:#x}, computed {:#x})",
                expected,
                actual
            );
            return Err(Error::Crc);
        }
        self.prom = prom;
        Ok(())
    }

    pub fn calibration(&self) -> &[u16; PROM_WORDS] {
        &self.prom
    }

    pub fn set_oversampling(&mut self, osr: Oversampling) {
        self.osr = osr;
    }

    fn convert(&mut self, cmd: u8) -> Result<u32, Error<I2C::BusError>> {
        self.regs.write_command(cmd + self.osr.command_offset())?;
        self.delay.delay_ms(self.osr.conversion_ms());
        let mut buf = [0u8; 3];
        self.regs.read_regs(CMD_ADC_READ, &mut buf)?;
        Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
    }

    /// Run a pressure and a temperature conversion and compensate the result.
    pub fn measure(&mut self) -> Result<Measurement, Error<I2C::BusError>> {
        let d1 = self.convert(CMD_CONVERT_D1)?;
        let d2 = self.convert(CMD_CONVERT_D2)?;
        Ok(compensate(&self.prom, d1, d2))
    }
}

/// CRC-4 over the PROM, with the CRC nibble of word 0 masked out.
fn crc4(prom: &[u16; PROM_WORDS]) -> u8 {
    let mut words = [0u16; PROM_WORDS + 1];
    words[..PROM_WORDS].copy_from_slice(prom);
    words[0] &= 0x0fff;

    let mut rem: u16 = 0;
    for cnt in 0..16 {
        let word = words[cnt >> 1];
        rem ^= if cnt % 2 == 1 { word & 0x00ff } else { word >> 8 };
        for _ in 0..8 {
            rem = if rem & 0x8000 != 0 {
                (rem << 1) ^ 0x3000
            } else {
                rem << 1
            };
        }
    }
    ((rem >> 12) & 0x0f) as u8
}

/// First- and second-order compensation for the 02BA variant.
fn compensate(prom: &[u16; PROM_WORDS], d1: u32, d2: u32) -> Measurement {
    let c = |i: usize| i64::from(prom[i]);
    let d1 = i64::from(d1);
    let d2 = i64::from(d2);

    let dt = d2 - c(5) * (1 << 8);
    let temp = 2000 + dt * c(6) / (1 << 23);
    let mut off = c(2) * (1 << 17) + c(4) * dt / (1 << 6);
    let mut sens = c(1) * (1 << 16) + c(3) * dt / (1 << 7);

    let mut temp_i = 0;
    if temp < 2000 {
        let cold = (temp - 2000) * (temp - 2000);
        temp_i = 11 * dt * dt / (1i64 << 35);
        off -= 31 * cold / (1 << 3);
        sens -= 63 * cold / (1 << 5);
    }

    let pressure = (d1 * sens / (1 << 21) - off) / (1 << 15);
    Measurement {
        temperature: (temp - temp_i) as i32,
        pressure: pressure as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::{Measurement, Oversampling, Pressure22};
    use crate::test_util::CountingDelay;
    use crate::Error;
    use embedded_hal_mock::eh1::i2c as mock_i2c;

    const PROM: [u16; 7] = [0x8000, 0xb524, 0xabcd, 0x7183, 0x6cc2, 0x7b41, 0x6e05];

    fn prom_transactions(word0: [u8; 2]) -> Vec<mock_i2c::Transaction> {
        let mut t = vec![mock_i2c::Transaction::write_read(0x76, vec![0xa0], word0.to_vec())];
        for (i, w) in PROM.iter().enumerate().skip(1) {
            t.push(mock_i2c::Transaction::write_read(
                0x76,
                vec![0xa0 + 2 * i as u8],
                w.to_be_bytes().to_vec(),
            ));
        }
        t
    }

    #[test]
    fn pressure22() {
        let mut expectations = vec![mock_i2c::Transaction::write(0x76, vec![0x1e])];
        expectations.extend(prom_transactions([0x80, 0x00]));
        expectations.extend([
            mock_i2c::Transaction::write(0x76, vec![0x4a]),
            mock_i2c::Transaction::write_read(0x76, vec![0x00], vec![0x62, 0xa7, 0xa4]),
            mock_i2c::Transaction::write(0x76, vec![0x5a]),
            mock_i2c::Transaction::write_read(0x76, vec![0x00], vec![0x7b, 0x41, 0x44]),
            // OSR 256
            mock_i2c::Transaction::write(0x76, vec![0x40]),
            mock_i2c::Transaction::write_read(0x76, vec![0x00], vec![0x62, 0xa7, 0xa4]),
            mock_i2c::Transaction::write(0x76, vec![0x50]),
            mock_i2c::Transaction::write_read(0x76, vec![0x00], vec![0x79, 0xba, 0xa4]),
        ]);
        let mut bus = mock_i2c::Mock::new(&expectations);

        let mut sensor = Pressure22::new(bus.clone(), CountingDelay::new());
        sensor.init().unwrap();
        assert_eq!(sensor.calibration(), &PROM);

        let m = sensor.measure().unwrap();
        assert_eq!(
            m,
            Measurement {
                temperature: 2000,
                pressure: 110002
            }
        );
        assert_eq!(m.temperature_celsius(), 20.0);

        sensor.set_oversampling(Oversampling::Osr256);
        let cold = sensor.measure().unwrap();
        assert_eq!(
            cold,
            Measurement {
                temperature: 1662,
                pressure: 109187
            }
        );

        let (_, delay) = sensor.release();
        assert_eq!(delay.total_ms(), 3 + 2 * 18 + 2 * 1);
        bus.done();
    }

    #[test]
    fn pressure22_prom_crc_mismatch() {
        let mut expectations = vec![mock_i2c::Transaction::write(0x76, vec![0x1e])];
        expectations.extend(prom_transactions([0x70, 0x00]));
        let mut bus = mock_i2c::Mock::new(&expectations);

        let mut sensor = Pressure22::new(bus.clone(), CountingDelay::new());
        assert_eq!(sensor.init(), Err(Error::Crc));
        assert_eq!(sensor.calibration(), &[0; 7]);

        bus.done();
    }

    #[test]
    fn crc4_ignores_stored_nibble() {
        let mut prom = PROM;
        assert_eq!(super::crc4(&prom), 0x8);
        prom[0] = 0x0000;
        assert_eq!(super::crc4(&prom), 0x8);
        prom[6] ^= 1;
        assert_ne!(super::crc4(&prom), 0x8);
    }
}
