//! Support for the HVAC Click (Sensirion `SCD41` CO2 sensor, with an optional `SPS30` particulate
//! matter sensor on the same bus)
//!
//! Sensirion parts use 16-bit commands instead of registers.  Every 16-bit word on the wire, in
//! either direction, is followed by a CRC-8 (polynomial 0x31, init 0xFF).
//!
//! ```
//! # use embedded_hal_mock::eh1::i2c::Mock;
//! # struct Delay;
//! # impl embedded_hal::delay::DelayNs for Delay { fn delay_ns(&mut self, _ns: u32) {} }
//! # let mut i2c = Mock::new(&[]);
//! use click_drivers::dev::hvac::Hvac;
//!
//! let hvac = Hvac::new(i2c.clone(), Delay);
//! let (_i2c, _delay) = hvac.release();
//! # i2c.done();
//! ```
use crc::{Crc, CRC_8_NRSC_5};
use embedded_hal::delay::DelayNs;

use crate::Error;

pub const SCD41_ADDRESS: u8 = 0x62;
pub const SPS30_ADDRESS: u8 = 0x69;

const CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_NRSC_5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scd41 {
    StartPeriodicMeasurement = 0x21b1,
    ReadMeasurement = 0xec05,
    StopPeriodicMeasurement = 0x3f86,
    GetDataReadyStatus = 0xe4b8,
    GetSerialNumber = 0x3682,
    MeasureSingleShot = 0x219d,
    Reinit = 0x3646,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sps30 {
    StartMeasurement = 0x0010,
    StopMeasurement = 0x0104,
    ReadDataReady = 0x0202,
    ReadMeasuredValues = 0x0300,
    StartFanCleaning = 0x5607,
    Reset = 0xd304,
}

impl From<Scd41> for u16 {
    fn from(c: Scd41) -> u16 {
        c as u16
    }
}

impl From<Sps30> for u16 {
    fn from(c: Sps30) -> u16 {
        c as u16
    }
}

/// SPS30 output format argument: big-endian IEEE-754 floats.
const SPS30_FLOAT_FORMAT: u16 = 0x0300;

/// CO2, temperature and humidity from the SCD41.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AirQuality {
    /// CO2 concentration in ppm.
    pub co2: u16,
    /// Temperature in °C.
    pub temperature: f32,
    /// Relative humidity in %.
    pub humidity: f32,
}

/// Particulate matter reading from the SPS30.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Particulates {
    /// Mass concentration PM1.0, PM2.5, PM4.0, PM10 in µg/m³.
    pub mass_pm1_0: f32,
    pub mass_pm2_5: f32,
    pub mass_pm4_0: f32,
    pub mass_pm10: f32,
    /// Number concentration PM0.5, PM1.0, PM2.5, PM4.0, PM10 in #/cm³.
    pub number_pm0_5: f32,
    pub number_pm1_0: f32,
    pub number_pm2_5: f32,
    pub number_pm4_0: f32,
    pub number_pm10: f32,
    /// Typical particle size in µm.
    pub typical_size: f32,
}

/// HVAC Click driver
pub struct Hvac<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C, D> Hvac<I2C, D>
where
    I2C: crate::I2cBus,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn write_command(
        &mut self,
        addr: u8,
        cmd: u16,
        arg: Option<u16>,
    ) -> Result<(), Error<I2C::BusError>> {
        let mut buf = [0u8; 5];
        buf[..2].copy_from_slice(&cmd.to_be_bytes());
        let len = match arg {
            Some(arg) => {
                let word = arg.to_be_bytes();
                buf[2..4].copy_from_slice(&word);
                buf[4] = CRC.checksum(&word);
                5
            }
            None => 2,
        };
        self.i2c
            .write(addr, &buf[..len])
            .map_err(|e| Error::Io(I2C::BusError::from(e)))
    }

    /// Send `cmd`, wait `exec_ms`, then read `out.len()` CRC-protected words.
    fn read_words(
        &mut self,
        addr: u8,
        cmd: u16,
        exec_ms: u32,
        out: &mut [u16],
    ) -> Result<(), Error<I2C::BusError>> {
        let mut raw = [0u8; 60];
        let Some(raw) = raw.get_mut(..3 * out.len()) else {
            return Err(Error::InvalidParameter);
        };

        self.write_command(addr, cmd, None)?;
        self.delay.delay_ms(exec_ms);
        self.i2c.read(addr, raw).map_err(|e| Error::Io(I2C::BusError::from(e)))?;

        for (word, chunk) in out.iter_mut().zip(raw.chunks_exact(3)) {
            if CRC.checksum(&chunk[..2]) != chunk[2] {
                log::warn!("sensirion {:#04x}: crc mismatch in reply to {:#06x}", addr, cmd);
                return Err(Error::Crc);
            }
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(())
    }

    pub fn scd41_start_periodic_measurement(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(SCD41_ADDRESS, Scd41::StartPeriodicMeasurement.into(), None)
    }

    pub fn scd41_stop_periodic_measurement(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(SCD41_ADDRESS, Scd41::StopPeriodicMeasurement.into(), None)?;
        self.delay.delay_ms(500);
        Ok(())
    }

    /// Re-read the user settings from EEPROM.  Periodic measurement must be stopped.
    pub fn scd41_reinit(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(SCD41_ADDRESS, Scd41::Reinit.into(), None)?;
        self.delay.delay_ms(30);
        Ok(())
    }

    /// Trigger one measurement in idle mode; the result is available after 5 s.
    pub fn scd41_measure_single_shot(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(SCD41_ADDRESS, Scd41::MeasureSingleShot.into(), None)
    }

    pub fn scd41_data_ready(&mut self) -> Result<bool, Error<I2C::BusError>> {
        let mut status = [0u16];
        self.read_words(
            SCD41_ADDRESS,
            Scd41::GetDataReadyStatus.into(),
            1,
            &mut status,
        )?;
        Ok(status[0] & 0x07ff != 0)
    }

    /// 48-bit serial number.
    pub fn scd41_serial_number(&mut self) -> Result<u64, Error<I2C::BusError>> {
        let mut words = [0u16; 3];
        self.read_words(SCD41_ADDRESS, Scd41::GetSerialNumber.into(), 1, &mut words)?;
        Ok(words
            .iter()
            .fold(0u64, |acc, &w| (acc << 16) | u64::from(w)))
    }

    /// Read the latest measurement, or [`Error::NotReady`] if none is pending.
    pub fn scd41_read_measurement(&mut self) -> Result<AirQuality, Error<I2C::BusError>> {
        if !self.scd41_data_ready()? {
            return Err(Error::NotReady);
        }
        let mut words = [0u16; 3];
        self.read_words(SCD41_ADDRESS, Scd41::ReadMeasurement.into(), 1, &mut words)?;
        Ok(AirQuality {
            co2: words[0],
            temperature: -45.0 + 175.0 * f32::from(words[1]) / 65535.0,
            humidity: 100.0 * f32::from(words[2]) / 65535.0,
        })
    }

    /// Start continuous measurement with float output.
    pub fn sps30_start_measurement(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(
            SPS30_ADDRESS,
            Sps30::StartMeasurement.into(),
            Some(SPS30_FLOAT_FORMAT),
        )?;
        self.delay.delay_ms(20);
        Ok(())
    }

    pub fn sps30_stop_measurement(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(SPS30_ADDRESS, Sps30::StopMeasurement.into(), None)?;
        self.delay.delay_ms(20);
        Ok(())
    }

    pub fn sps30_start_fan_cleaning(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(SPS30_ADDRESS, Sps30::StartFanCleaning.into(), None)
    }

    pub fn sps30_reset(&mut self) -> Result<(), Error<I2C::BusError>> {
        self.write_command(SPS30_ADDRESS, Sps30::Reset.into(), None)?;
        self.delay.delay_ms(100);
        Ok(())
    }

    pub fn sps30_data_ready(&mut self) -> Result<bool, Error<I2C::BusError>> {
        let mut flag = [0u16];
        self.read_words(SPS30_ADDRESS, Sps30::ReadDataReady.into(), 0, &mut flag)?;
        Ok(flag[0] & 0x00ff == 0x01)
    }

    /// Read the latest measurement, or [`Error::NotReady`] if none is pending.
    pub fn sps30_read_measurement(&mut self) -> Result<Particulates, Error<I2C::BusError>> {
        if !self.sps30_data_ready()? {
            return Err(Error::NotReady);
        }
        let mut words = [0u16; 20];
        self.read_words(
            SPS30_ADDRESS,
            Sps30::ReadMeasuredValues.into(),
            0,
            &mut words,
        )?;

        let mut values = [0f32; 10];
        for (value, pair) in values.iter_mut().zip(words.chunks_exact(2)) {
            *value = f32::from_bits(u32::from(pair[0]) << 16 | u32::from(pair[1]));
        }
        Ok(Particulates {
            mass_pm1_0: values[0],
            mass_pm2_5: values[1],
            mass_pm4_0: values[2],
            mass_pm10: values[3],
            number_pm0_5: values[4],
            number_pm1_0: values[5],
            number_pm2_5: values[6],
            number_pm4_0: values[7],
            number_pm10: values[8],
            typical_size: values[9],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Hvac;
    use crate::test_util::CountingDelay;
    use crate::Error;
    use embedded_hal_mock::eh1::i2c as mock_i2c;

    #[test]
    fn sensirion_crc() {
        assert_eq!(super::CRC.checksum(&[0xbe, 0xef]), 0x92);
    }

    #[test]
    fn scd41() {
        let expectations = [
            mock_i2c::Transaction::write(0x62, vec![0x21, 0xb1]),
            // not ready yet
            mock_i2c::Transaction::write(0x62, vec![0xe4, 0xb8]),
            mock_i2c::Transaction::read(0x62, vec![0x80, 0x00, 0xa2]),
            mock_i2c::Transaction::write(0x62, vec![0xe4, 0xb8]),
            mock_i2c::Transaction::read(0x62, vec![0x80, 0x06, 0x04]),
            mock_i2c::Transaction::write(0x62, vec![0xec, 0x05]),
            mock_i2c::Transaction::read(
                0x62,
                vec![0x01, 0xf4, 0x33, 0x66, 0x66, 0x93, 0x80, 0x00, 0xa2],
            ),
            mock_i2c::Transaction::write(0x62, vec![0x3f, 0x86]),
        ];
        let mut bus = mock_i2c::Mock::new(&expectations);

        let mut hvac = Hvac::new(bus.clone(), CountingDelay::new());
        hvac.scd41_start_periodic_measurement().unwrap();
        assert_eq!(hvac.scd41_read_measurement(), Err(Error::NotReady));

        let m = hvac.scd41_read_measurement().unwrap();
        assert_eq!(m.co2, 500);
        assert_eq!(m.temperature, 25.0);
        assert!((m.humidity - 50.0).abs() < 0.01);

        hvac.scd41_stop_periodic_measurement().unwrap();

        let (_, delay) = hvac.release();
        assert_eq!(delay.total_ms(), 3 + 500);
        bus.done();
    }

    #[test]
    fn scd41_crc_mismatch() {
        let expectations = [
            mock_i2c::Transaction::write(0x62, vec![0x36, 0x82]),
            mock_i2c::Transaction::read(
                0x62,
                vec![0x01, 0xf4, 0x33, 0x66, 0x66, 0x00, 0x80, 0x00, 0xa2],
            ),
        ];
        let mut bus = mock_i2c::Mock::new(&expectations);

        let mut hvac = Hvac::new(bus.clone(), CountingDelay::new());
        assert_eq!(hvac.scd41_serial_number(), Err(Error::Crc));

        bus.done();
    }

    #[test]
    fn sps30() {
        let expectations = [
            mock_i2c::Transaction::write(0x69, vec![0x00, 0x10, 0x03, 0x00, 0xac]),
            mock_i2c::Transaction::write(0x69, vec![0x02, 0x02]),
            mock_i2c::Transaction::read(0x69, vec![0x00, 0x01, 0xb0]),
            mock_i2c::Transaction::write(0x69, vec![0x03, 0x00]),
            mock_i2c::Transaction::read(
                0x69,
                vec![
                    0x3f, 0x80, 0xd0, 0x00, 0x00, 0x81, 0x40, 0x20, 0x8e, 0x00, 0x00, 0x81, 0x40,
                    0x40, 0x35, 0x00, 0x00, 0x81, 0x40, 0x80, 0x72, 0x00, 0x00, 0x81, 0x41, 0x20,
                    0x7a, 0x00, 0x00, 0x81, 0x41, 0x40, 0xc1, 0x00, 0x00, 0x81, 0x41, 0x50, 0x82,
                    0x00, 0x00, 0x81, 0x41, 0x60, 0x47, 0x00, 0x00, 0x81, 0x3f, 0x00, 0xaa, 0x00,
                    0x00, 0x81, 0x3f, 0xa0, 0x56, 0x00, 0x00, 0x81,
                ],
            ),
            mock_i2c::Transaction::write(0x69, vec![0x01, 0x04]),
            mock_i2c::Transaction::write(0x69, vec![0xd3, 0x04]),
        ];
        let mut bus = mock_i2c::Mock::new(&expectations);

        let mut hvac = Hvac::new(bus.clone(), CountingDelay::new());
        hvac.sps30_start_measurement().unwrap();

        let pm = hvac.sps30_read_measurement().unwrap();
        assert_eq!(pm.mass_pm1_0, 1.0);
        assert_eq!(pm.mass_pm2_5, 2.5);
        assert_eq!(pm.mass_pm10, 4.0);
        assert_eq!(pm.number_pm0_5, 10.0);
        assert_eq!(pm.number_pm10, 0.5);
        assert_eq!(pm.typical_size, 1.25);

        hvac.sps30_stop_measurement().unwrap();
        hvac.sps30_reset().unwrap();

        bus.done();
    }
}
