//! The device module contains the drivers for each of the supported Click boards.
//!
//! The modem Clicks ([`bluetooth2`], [`esp8684`], [`rak4630`], [`wifi_nora`]) are thin layers of
//! command tables over [`crate::at::AtClient`].  The sensor Clicks talk to their chip through
//! [`crate::RegisterBus`] or, for command-oriented Sensirion parts, directly over I2C.
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

pub mod barometer;
pub mod bluetooth2;
pub mod esp8684;
pub mod hvac;
pub mod pressure22;
pub mod rak4630;
pub mod wifi_nora;

/// Hold an active-low reset line low for `low_ms`, then release it.
pub(crate) fn pulse_reset<P, D>(pin: &mut P, delay: &mut D, low_ms: u32) -> Result<(), P::Error>
where
    P: OutputPin,
    D: DelayNs,
{
    pin.set_low()?;
    delay.delay_ms(low_ms);
    pin.set_high()
}
