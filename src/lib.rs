//! Drivers for MikroE Click boards.
//!
//! Modem Clicks are driven through the line-oriented [`at::AtClient`] over any
//! `embedded_io` UART; sensor Clicks use `embedded_hal` I2C or SPI.
#![cfg_attr(not(test), no_std)]

pub mod at;
mod bus;
pub mod dev;
mod error;
pub mod line;

#[cfg(test)]
mod test_util;

pub use bus::{I2cBus, I2cRegisters, RegisterBus, SpiBus, SpiRegisters, Transport};
pub use error::Error;
pub use line::LineBuffer;

pub use dev::barometer::Barometer;
pub use dev::bluetooth2::Bluetooth2;
pub use dev::esp8684::Esp8684;
pub use dev::hvac::Hvac;
pub use dev::pressure22::Pressure22;
pub use dev::rak4630::Rak4630;
pub use dev::wifi_nora::WifiNora;
