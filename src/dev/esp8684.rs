//! Support for the ESP8684 Click (Espressif ESP8684 running ESP-AT firmware)
//!
//! The module boots into AT mode and announces itself with `ready`.  All exchanges are terminated
//! by `OK` or `ERROR`; data sent with `AT+CIPSEND` follows a `>` prompt and is acknowledged with
//! `SEND OK`.  Incoming socket data arrives unsolicited as `+IPD,<len>:<payload>`.
//!
//! ```
//! # use click_drivers::dev::esp8684::{Esp8684, Protocol, WifiMode};
//! # use embedded_hal_mock::eh1::digital::Mock as PinMock;
//! # struct Uart;
//! # impl embedded_io::ErrorType for Uart { type Error = core::convert::Infallible; }
//! # impl embedded_io::ReadReady for Uart { fn read_ready(&mut self) -> Result<bool, Self::Error> { Ok(true) } }
//! # impl embedded_io::Read for Uart {
//! #     fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
//! #         buf[..6].copy_from_slice(b"\r\nOK\r\n"); Ok(6)
//! #     }
//! # }
//! # impl embedded_io::Write for Uart {
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct Delay;
//! # impl embedded_hal::delay::DelayNs for Delay { fn delay_ns(&mut self, _ns: u32) {} }
//! # let mut rst = PinMock::new(&[]);
//! let mut esp = Esp8684::new(Uart, Delay, rst.clone());
//!
//! esp.check_communication().unwrap();
//! esp.set_wifi_mode(WifiMode::Station).unwrap();
//! esp.connect_to_ap("MikroE Public", "mikroe.guest").unwrap();
//! esp.open_connection(Protocol::Tcp, "192.168.1.10", 1234).unwrap();
//! # rst.done();
//! ```
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::at::{self, AtClient, Config, Scan};
use crate::{Error, Transport};

pub const CMD_AT: &str = "AT";
pub const CMD_RESTORE: &str = "AT+RESTORE";
pub const CMD_RESET: &str = "AT+RST";
pub const CMD_VERSION: &str = "AT+GMR";
pub const CMD_ECHO_ON: &str = "ATE1";
pub const CMD_ECHO_OFF: &str = "ATE0";
pub const CMD_WIFI_MODE: &str = "AT+CWMODE";
pub const CMD_JOIN_AP: &str = "AT+CWJAP";
pub const CMD_QUIT_AP: &str = "AT+CWQAP";
pub const CMD_LOCAL_IP: &str = "AT+CIFSR";
pub const CMD_MULTIPLE_CONNECTIONS: &str = "AT+CIPMUX";
pub const CMD_START_CONNECTION: &str = "AT+CIPSTART";
pub const CMD_SEND: &str = "AT+CIPSEND";
pub const CMD_CLOSE: &str = "AT+CIPCLOSE";

pub const RSP_OK: &str = "OK";
pub const RSP_READY: &str = "ready";
pub const RSP_PROMPT: &str = ">";
pub const RSP_SEND_OK: &str = "SEND OK";
pub const RSP_IPD: &str = "+IPD,";
pub const RSP_STATION_IP: &str = "+CIFSR:STAIP,";

pub const RX_BUFFER_LEN: usize = 600;

pub const BOOT_TIMEOUT_MS: u32 = 5_000;
pub const CONNECT_TIMEOUT_MS: u32 = 20_000;

pub const CONFIG: Config = Config::new()
    .timeout_ms(2_000)
    .max_command_len(128)
    .drop_nul(true);

pub type Client<T, D> = AtClient<T, D, RX_BUFFER_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiMode {
    Off = 0,
    Station = 1,
    SoftAp = 2,
    StationSoftAp = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// ESP8684 Click driver
pub struct Esp8684<T, D, RST> {
    client: Client<T, D>,
    rst: RST,
}

impl<T, D, RST> Esp8684<T, D, RST>
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

    /// Direct access to the AT client for commands without a wrapper.
    pub fn client(&mut self) -> &mut Client<T, D> {
        &mut self.client
    }

    pub fn release(self) -> (T, D, RST) {
        let (uart, delay) = self.client.release();
        (uart, delay, self.rst)
    }

    /// Pulse the reset line and wait for the `ready` banner.
    pub fn reset(&mut self) -> Result<(), Error<T::BusError>> {
        if super::pulse_reset(&mut self.rst, self.client.delay_mut(), 100).is_err() {
            return Err(Error::Pin);
        }
        self.client.clear();
        self.client.await_response_for(RSP_READY, BOOT_TIMEOUT_MS)
    }

    /// Restart the firmware with `AT+RST`.
    pub fn software_reset(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_RESET)?;
        self.client.await_response(RSP_OK)?;
        self.client.await_response_for(RSP_READY, BOOT_TIMEOUT_MS)
    }

    /// Restore factory settings; the module reboots afterwards.
    pub fn factory_reset(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_RESTORE)?;
        self.client.await_response(RSP_OK)?;
        self.client.await_response_for(RSP_READY, BOOT_TIMEOUT_MS)
    }

    pub fn check_communication(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_AT)?;
        self.client.await_response(RSP_OK)
    }

    pub fn set_echo(&mut self, enable: bool) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd(if enable { CMD_ECHO_ON } else { CMD_ECHO_OFF })?;
        self.client.await_response(RSP_OK)
    }

    /// Raw `AT+GMR` response (AT, SDK and compile-time versions).
    pub fn firmware_version(&mut self) -> Result<&str, Error<T::BusError>> {
        self.client.send_cmd(CMD_VERSION)?;
        self.client.await_response(RSP_OK)?;
        self.client.last_response_str().ok_or(Error::Unknown)
    }

    pub fn set_wifi_mode(&mut self, mode: WifiMode) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_WIFI_MODE, format_args!("{}", mode as u8))?;
        self.client.await_response(RSP_OK)
    }

    /// Join an access point in station mode.
    pub fn connect_to_ap(
        &mut self,
        ssid: &str,
        password: &str,
    ) -> Result<(), Error<T::BusError>> {
        if ssid.contains('"') || password.contains('"') {
            return Err(Error::InvalidParameter);
        }
        self.client
            .send_cmd_fmt(CMD_JOIN_AP, format_args!("\"{}\",\"{}\"", ssid, password))?;
        self.client.await_response_for(RSP_OK, CONNECT_TIMEOUT_MS)
    }

    pub fn disconnect_from_ap(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_QUIT_AP)?;
        self.client.await_response(RSP_OK)
    }

    /// Station IP address as reported by `AT+CIFSR`.
    pub fn local_ip(&mut self) -> Result<&str, Error<T::BusError>> {
        self.client.send_cmd(CMD_LOCAL_IP)?;
        self.client.await_response(RSP_OK)?;
        at::field_after(self.client.last_response(), RSP_STATION_IP)
            .map(|ip| ip.trim_matches('"'))
            .ok_or(Error::Unknown)
    }

    pub fn set_multiple_connections(&mut self, enable: bool) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_MULTIPLE_CONNECTIONS, format_args!("{}", enable as u8))?;
        self.client.await_response(RSP_OK)
    }

    /// Open a single TCP or UDP connection to `host:port`.
    pub fn open_connection(
        &mut self,
        protocol: Protocol,
        host: &str,
        port: u16,
    ) -> Result<(), Error<T::BusError>> {
        if host.contains('"') {
            return Err(Error::InvalidParameter);
        }
        self.client.send_cmd_fmt(
            CMD_START_CONNECTION,
            format_args!("\"{}\",\"{}\",{}", protocol.as_str(), host, port),
        )?;
        self.client.await_response_for(RSP_OK, CONNECT_TIMEOUT_MS)
    }

    /// Send `data` over the open connection.
    pub fn send_data(&mut self, data: &[u8]) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_SEND, format_args!("{}", data.len()))?;
        self.client.await_response(RSP_PROMPT)?;
        self.client.send_raw(data)?;
        self.client.await_response(RSP_SEND_OK)
    }

    /// Wait for an `+IPD` notification and return its payload.
    ///
    /// The payload is binary: NUL bytes are kept for the duration of the call, and an `ERROR`
    /// inside the payload does not end the wait.
    pub fn receive_data(&mut self, timeout_ms: u32) -> Result<&[u8], Error<T::BusError>> {
        let drop_nul = self.client.config().drop_nul;
        self.client.config_mut().drop_nul = false;
        let result = self.client.await_scan(timeout_ms, scan_ipd);
        self.client.config_mut().drop_nul = drop_nul;
        result?;

        let response = self.client.last_response();
        let Some((start, len)) = ipd_payload(response) else {
            return Err(Error::Unknown);
        };
        Ok(&response[start..start + len])
    }

    pub fn close_connection(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_CLOSE)?;
        self.client.await_response(RSP_OK)
    }
}

fn scan_ipd(buf: &[u8]) -> Scan {
    match crate::line::find(buf, RSP_IPD.as_bytes()) {
        Some(_) if ipd_payload(buf).is_some() => Scan::Done,
        Some(start) => Scan::Open(start),
        None => Scan::Pending,
    }
}

/// Locate a complete `+IPD,[<link>,]<len>:<payload>` frame, returning payload offset and length.
fn ipd_payload(buf: &[u8]) -> Option<(usize, usize)> {
    let header = crate::line::find(buf, RSP_IPD.as_bytes())? + RSP_IPD.len();
    let colon = header + buf[header..].iter().position(|&b| b == b':')?;
    let fields = core::str::from_utf8(&buf[header..colon]).ok()?;
    let len: usize = fields.rsplit(',').next()?.trim().parse().ok()?;
    let start = colon + 1;
    if buf.len() < start + len {
        return None;
    }
    Some((start, len))
}
