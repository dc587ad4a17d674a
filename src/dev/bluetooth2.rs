//! Support for the Bluetooth 2 Click (Silicon Labs WT41 with iWRAP firmware)
//!
//! iWRAP separates command and parameters with a space instead of `=`.  After a reset the module
//! prints its version banner followed by `READY.`.
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::at::{AtClient, Config, ERROR};
use crate::{Error, Transport};

pub const CMD_AT: &str = "AT";
pub const CMD_RESET: &str = "RESET";
pub const CMD_FACTORY_RESET: &str = "SET RESET";
pub const CMD_SET_NAME: &str = "SET BT NAME";
pub const CMD_SET_AUTH: &str = "SET BT AUTH *";
pub const CMD_SET_SSP: &str = "SET BT SSP";
pub const CMD_SET_ECHO: &str = "SET CONTROL ECHO";
pub const CMD_SET_PROFILE_SPP: &str = "SET PROFILE SPP";
pub const CMD_CALL: &str = "CALL";
pub const CMD_CLOSE: &str = "CLOSE";

pub const RSP_OK: &str = "OK";
pub const RSP_READY: &str = "READY.";
pub const RSP_CONNECT: &str = "CONNECT";
pub const RSP_NO_CARRIER: &str = "NO CARRIER";

/// Longest device name iWRAP accepts.
pub const MAX_NAME_LEN: usize = 140;
/// Longest PIN code iWRAP accepts.
pub const MAX_PIN_LEN: usize = 16;

pub const RX_BUFFER_LEN: usize = 200;

pub const BOOT_TIMEOUT_MS: u32 = 3_000;
pub const CALL_TIMEOUT_MS: u32 = 15_000;

pub const CONFIG: Config = Config::new()
    .param_separator(" ")
    .error_markers(&[ERROR])
    .timeout_ms(1_000)
    .max_command_len(CMD_SET_NAME.len() + MAX_NAME_LEN + 2)
    .drop_nul(true);

pub type Client<T, D> = AtClient<T, D, RX_BUFFER_LEN>;

/// Secure Simple Pairing I/O capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SspCapabilities {
    DisplayOnly = 0,
    DisplayYesNo = 1,
    KeyboardOnly = 2,
    NoInputNoOutput = 3,
}

/// Bluetooth 2 Click driver
pub struct Bluetooth2<T, D, RST> {
    client: Client<T, D>,
    rst: RST,
}

impl<T, D, RST> Bluetooth2<T, D, RST>
where
    T: Transport,
    D: DelayNs,
    RST: OutputPin,
{
    pub fn new(uart: T, delay: D, rst: RST) -> Self {
        Self {
            client: AtClient::new(uart, delay, CONFIG),
            rst,
        }
    }

    pub fn client(&mut self) -> &mut Client<T, D> {
        &mut self.client
    }

    pub fn release(self) -> (T, D, RST) {
        let (uart, delay) = self.client.release();
        (uart, delay, self.rst)
    }

    /// Pulse the reset line and wait for `READY.`.
    pub fn reset(&mut self) -> Result<(), Error<T::BusError>> {
        if super::pulse_reset(&mut self.rst, self.client.delay_mut(), 10).is_err() {
            return Err(Error::Pin);
        }
        self.client.clear();
        self.client.await_response_for(RSP_READY, BOOT_TIMEOUT_MS)
    }

    pub fn software_reset(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_RESET)?;
        self.client.await_response_for(RSP_READY, BOOT_TIMEOUT_MS)
    }

    /// Restore factory settings, which also reboots the module.
    pub fn factory_reset(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_FACTORY_RESET)?;
        self.client.await_response_for(RSP_READY, BOOT_TIMEOUT_MS)
    }

    pub fn check_communication(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_AT)?;
        self.client.await_response(RSP_OK)
    }

    /// Set the friendly name, at most [`MAX_NAME_LEN`] bytes.
    ///
    /// Longer names are rejected before anything is sent.
    pub fn set_device_name(&mut self, name: &str) -> Result<(), Error<T::BusError>> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::CommandTooLong);
        }
        self.client.send_cmd_with_param(CMD_SET_NAME, name)?;
        self.client.await_response(RSP_OK)
    }

    /// Set the legacy pairing PIN (1 to 16 digits).
    pub fn set_pin_code(&mut self, pin: &str) -> Result<(), Error<T::BusError>> {
        if pin.is_empty() || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidParameter);
        }
        if pin.len() > MAX_PIN_LEN {
            return Err(Error::CommandTooLong);
        }
        self.client.send_cmd_with_param(CMD_SET_AUTH, pin)?;
        self.client.await_response(RSP_OK)
    }

    pub fn set_ssp(
        &mut self,
        capabilities: SspCapabilities,
        mitm: bool,
    ) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd_fmt(
            CMD_SET_SSP,
            format_args!("{} {}", capabilities as u8, mitm as u8),
        )?;
        self.client.await_response(RSP_OK)
    }

    /// Set the iWRAP echo mask (bit 0: banner, bit 1: command echo, bit 2: events).
    pub fn set_echo_mode(&mut self, mask: u8) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_SET_ECHO, format_args!("{}", mask & 0x07))?;
        self.client.await_response(RSP_OK)
    }

    pub fn enable_spp(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd_with_param(CMD_SET_PROFILE_SPP, "ON")?;
        self.client.await_response(RSP_OK)
    }

    /// Open an RFCOMM (SPP) link to the device at `address` (`xx:xx:xx:xx:xx:xx`).
    pub fn call(&mut self, address: &str) -> Result<(), Error<T::BusError>> {
        if !is_bd_address(address) {
            return Err(Error::InvalidParameter);
        }
        self.client
            .send_cmd_fmt(CMD_CALL, format_args!("{} 1101 RFCOMM", address))?;
        self.client.await_response_for(RSP_CONNECT, CALL_TIMEOUT_MS)
    }

    pub fn close_link(&mut self, link: u8) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd_fmt(CMD_CLOSE, format_args!("{}", link))?;
        self.client.await_response(RSP_NO_CARRIER)
    }

    /// Transmit bytes over an open link in data mode.
    pub fn send_data(&mut self, data: &[u8]) -> Result<(), Error<T::BusError>> {
        self.client.send_raw(data)
    }
}

fn is_bd_address(address: &str) -> bool {
    address.len() == 17
        && address.split(':').count() == 6
        && address
            .split(':')
            .all(|octet| octet.len() == 2 && octet.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::{Bluetooth2, SspCapabilities};
    use crate::test_util::{CountingDelay, ScriptedUart};
    use crate::Error;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    fn bt(chunks: &[&str], rst: &PinMock) -> Bluetooth2<ScriptedUart, CountingDelay, PinMock> {
        Bluetooth2::new(ScriptedUart::new(chunks), CountingDelay::new(), rst.clone())
    }

    #[test]
    fn reset_and_configure() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ];
        let mut rst = PinMock::new(&expectations);
        let mut dev = bt(
            &[
                "WRAP THOR AI (6.2.0 build 1122)\r\n",
                "READY.\r\n",
                "OK.\r\n",
                "OK.\r\n",
                "OK.\r\n",
                "OK.\r\n",
            ],
            &rst,
        );

        dev.reset().unwrap();
        dev.set_device_name("Bluetooth 2 Click").unwrap();
        dev.set_pin_code("1234").unwrap();
        dev.set_ssp(SspCapabilities::DisplayYesNo, false).unwrap();
        dev.enable_spp().unwrap();

        let (uart, _, _) = dev.release();
        assert_eq!(
            uart.written_str(),
            "SET BT NAME Bluetooth 2 Click\r\n\
             SET BT AUTH * 1234\r\n\
             SET BT SSP 1 0\r\n\
             SET PROFILE SPP ON\r\n"
        );
        rst.done();
    }

    #[test]
    fn longest_name_is_accepted() {
        let mut rst = PinMock::new(&[]);
        let mut dev = bt(&["OK.\r\n"], &rst);

        let name = "n".repeat(super::MAX_NAME_LEN);
        dev.set_device_name(&name).unwrap();

        let (uart, _, _) = dev.release();
        assert_eq!(uart.written().len(), "SET BT NAME ".len() + 140 + 2);
        rst.done();
    }

    #[test]
    fn long_name_never_reaches_the_uart() {
        let mut rst = PinMock::new(&[]);
        let mut dev = bt(&[], &rst);

        let name = "n".repeat(super::MAX_NAME_LEN + 1);
        assert_eq!(dev.set_device_name(&name), Err(Error::CommandTooLong));

        let (uart, _, _) = dev.release();
        assert!(uart.written().is_empty());
        rst.done();
    }

    #[test]
    fn syntax_error() {
        let mut rst = PinMock::new(&[]);
        let mut dev = bt(&["SYNTAX ERROR\r\n"], &rst);
        assert_eq!(dev.check_communication(), Err(Error::Protocol));
        rst.done();
    }

    #[test]
    fn invalid_parameters() {
        let mut rst = PinMock::new(&[]);
        let mut dev = bt(&[], &rst);
        assert_eq!(dev.set_pin_code("12a4"), Err(Error::InvalidParameter));
        assert_eq!(
            dev.set_pin_code("12345678901234567"),
            Err(Error::CommandTooLong)
        );
        assert_eq!(dev.call("00:07:80"), Err(Error::InvalidParameter));
        rst.done();
    }

    #[test]
    fn call_and_close() {
        let mut rst = PinMock::new(&[]);
        let mut dev = bt(
            &["CALL 0\r\n", "", "CONNECT 0 RFCOMM 1\r\n", "NO CARRIER 0 ERROR 0\r\n"],
            &rst,
        );
        dev.call("00:07:80:12:34:56").unwrap();
        dev.send_data(b"ping").unwrap();
        dev.close_link(0).unwrap();

        let (uart, _, _) = dev.release();
        assert_eq!(
            uart.written_str(),
            "CALL 00:07:80:12:34:56 1101 RFCOMM\r\npingCLOSE 0\r\n"
        );
        rst.done();
    }
}
