//! Support for the WiFi NORA Click (u-blox NORA-W36 running u-connectXpress)
//!
//! Commands are terminated with a bare `\r`.  Asynchronous results are reported as `+UE...`
//! events, e.g. `+UEWSNU` once the station interface has an IP address or `+UESOC:<id>` once a
//! socket is connected.  Anything unexpected still in the buffer when a wait expires is reported
//! as [`Error::Unknown`].
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::at::{self, AtClient, Config};
use crate::line::find;
use crate::{Error, Transport};

pub const CMD_AT: &str = "AT";
pub const CMD_ECHO_OFF: &str = "ATE0";
pub const CMD_FACTORY_RESET: &str = "AT+USYFR";
pub const CMD_REBOOT: &str = "AT+CPWROFF";
pub const CMD_VERSION: &str = "AT+CGMR";
pub const CMD_STATION_SSID: &str = "AT+UWSCP";
pub const CMD_STATION_WPA: &str = "AT+UWSSW";
pub const CMD_STATION_CONNECT: &str = "AT+UWSC";
pub const CMD_STATION_DISCONNECT: &str = "AT+UWSDC";
pub const CMD_SOCKET_CREATE: &str = "AT+USOCR";
pub const CMD_SOCKET_CONNECT: &str = "AT+USOC";
pub const CMD_SOCKET_WRITE: &str = "AT+USOWS";
pub const CMD_SOCKET_READ: &str = "AT+USORS";
pub const CMD_SOCKET_CLOSE: &str = "AT+USOCL";

pub const RSP_OK: &str = "OK";
pub const RSP_STARTUP: &str = "+STARTUP";
pub const EVT_NETWORK_UP: &str = "+UEWSNU";
pub const EVT_SOCKET_CONNECTED: &str = "+UESOC:";
pub const RSP_SOCKET_CREATED: &str = "+USOCR:";
pub const RSP_SOCKET_READ: &str = "+USORS:";

/// Only one station configuration slot is used.
const WLAN_HANDLE: u8 = 0;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 63;

pub const RX_BUFFER_LEN: usize = 300;

pub const BOOT_TIMEOUT_MS: u32 = 3_000;
pub const CONNECT_TIMEOUT_MS: u32 = 20_000;

pub const CONFIG: Config = Config::new()
    .terminator("\r")
    .timeout_ms(1_000)
    .max_command_len(128)
    .drop_nul(true)
    .unknown_on_residue(true);

pub type Client<T, D> = AtClient<T, D, RX_BUFFER_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketProtocol {
    Tcp = 6,
    Udp = 17,
}

/// WiFi NORA Click driver
pub struct WifiNora<T, D, RST> {
    client: Client<T, D>,
    rst: RST,
}

impl<T, D, RST> WifiNora<T, D, RST>
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

    /// Pulse the reset line and wait for `+STARTUP`.
    pub fn reset(&mut self) -> Result<(), Error<T::BusError>> {
        if super::pulse_reset(&mut self.rst, self.client.delay_mut(), 100).is_err() {
            return Err(Error::Pin);
        }
        self.client.clear();
        self.client.await_response_for(RSP_STARTUP, BOOT_TIMEOUT_MS)
    }

    pub fn software_reset(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_REBOOT)?;
        self.client.await_response(RSP_OK)?;
        self.client.await_response_for(RSP_STARTUP, BOOT_TIMEOUT_MS)
    }

    /// Erase the stored configuration.  Takes effect after the next reset.
    pub fn factory_reset(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_FACTORY_RESET)?;
        self.client.await_response(RSP_OK)
    }

    pub fn check_communication(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_AT)?;
        self.client.await_response(RSP_OK)
    }

    pub fn disable_echo(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_ECHO_OFF)?;
        self.client.await_response(RSP_OK)
    }

    /// Software version as reported by `AT+CGMR`, without quotes.
    pub fn firmware_version(&mut self) -> Result<&str, Error<T::BusError>> {
        self.client.send_cmd(CMD_VERSION)?;
        self.client.await_response(RSP_OK)?;
        let Some(response) = self.client.last_response_str() else {
            return Err(Error::Unknown);
        };
        response
            .split(|c| c == '\r' || c == '\n')
            .map(str::trim)
            .find(|line| !line.is_empty() && *line != CMD_VERSION && *line != RSP_OK)
            .map(|line| line.trim_matches('"'))
            .ok_or(Error::Unknown)
    }

    /// Configure the station for a WPA2 network and connect.
    ///
    /// Returns once the module reports the network as up.
    pub fn connect_to_ap(&mut self, ssid: &str, password: &str) -> Result<(), Error<T::BusError>> {
        if ssid.is_empty() || ssid.len() > MAX_SSID_LEN || password.len() > MAX_PASSWORD_LEN {
            return Err(Error::InvalidParameter);
        }
        if ssid.contains('"') || password.contains('"') {
            return Err(Error::InvalidParameter);
        }

        self.client.send_cmd_fmt(
            CMD_STATION_SSID,
            format_args!("{},\"{}\"", WLAN_HANDLE, ssid),
        )?;
        self.client.await_response(RSP_OK)?;

        // WPA threshold 0: WPA2 or better
        self.client.send_cmd_fmt(
            CMD_STATION_WPA,
            format_args!("{},\"{}\",0", WLAN_HANDLE, password),
        )?;
        self.client.await_response(RSP_OK)?;

        self.client
            .send_cmd_fmt(CMD_STATION_CONNECT, format_args!("{}", WLAN_HANDLE))?;
        self.client.await_response(RSP_OK)?;
        if find(self.client.last_response(), EVT_NETWORK_UP.as_bytes()).is_some() {
            return Ok(());
        }
        self.client
            .await_response_for(EVT_NETWORK_UP, CONNECT_TIMEOUT_MS)
    }

    pub fn disconnect_from_ap(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_STATION_DISCONNECT)?;
        self.client.await_response(RSP_OK)
    }

    /// Create a socket and return its handle.
    pub fn create_socket(&mut self, protocol: SocketProtocol) -> Result<u8, Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_SOCKET_CREATE, format_args!("{}", protocol as u8))?;
        self.client.await_response(RSP_OK)?;
        at::field_after(self.client.last_response(), RSP_SOCKET_CREATED)
            .and_then(|id| id.trim().parse().ok())
            .ok_or(Error::Unknown)
    }

    /// Connect socket `id` to `host:port` and wait for `+UESOC:<id>`.
    pub fn connect_socket(
        &mut self,
        id: u8,
        host: &str,
        port: u16,
    ) -> Result<(), Error<T::BusError>> {
        if host.is_empty() || host.contains('"') {
            return Err(Error::InvalidParameter);
        }
        self.client.send_cmd_fmt(
            CMD_SOCKET_CONNECT,
            format_args!("{},\"{}\",{}", id, host, port),
        )?;
        self.client.await_response(RSP_OK)?;
        if socket_event(self.client.last_response(), EVT_SOCKET_CONNECTED, id) {
            return Ok(());
        }
        self.client.await_until(CONNECT_TIMEOUT_MS, |rx| {
            socket_event(rx, EVT_SOCKET_CONNECTED, id)
        })
    }

    /// Write a string to socket `id` in string mode.
    pub fn write_socket(&mut self, id: u8, data: &str) -> Result<(), Error<T::BusError>> {
        if data.contains('"') || data.contains('\r') {
            return Err(Error::InvalidParameter);
        }
        self.client
            .send_cmd_fmt(CMD_SOCKET_WRITE, format_args!("{},\"{}\"", id, data))?;
        self.client.await_response(RSP_OK)
    }

    /// Read up to `len` bytes of pending data from socket `id` in string mode.
    ///
    /// Returns the payload between the quotes of `+USORS:<id>,<len>,"<data>"`.
    pub fn read_socket(&mut self, id: u8, len: u16) -> Result<&str, Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_SOCKET_READ, format_args!("{},{}", id, len))?;
        self.client.await_response(RSP_OK)?;
        at::field_after(self.client.last_response(), RSP_SOCKET_READ)
            .and_then(parse_string_read)
            .ok_or(Error::Unknown)
    }

    pub fn close_socket(&mut self, id: u8) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_SOCKET_CLOSE, format_args!("{}", id))?;
        self.client.await_response(RSP_OK)
    }
}

/// Parse `<id>,<len>,"<data>"`, checking that `len` matches the payload.
fn parse_string_read(fields: &str) -> Option<&str> {
    let mut parts = fields.splitn(3, ',');
    let _id = parts.next();
    let count: usize = parts.next()?.parse().ok()?;
    let data = parts.next()?.strip_prefix('"')?.strip_suffix('"')?;
    (data.len() == count).then_some(data)
}

/// True once `<event><id>` has been received up to its line end.
fn socket_event(rx: &[u8], event: &str, id: u8) -> bool {
    let Some(start) = find(rx, event.as_bytes()) else {
        return false;
    };
    let rest = &rx[start + event.len()..];
    let Some(end) = rest.iter().position(|&b| b == b'\r' || b == b'\n') else {
        return false;
    };
    core::str::from_utf8(&rest[..end])
        .ok()
        .and_then(|s| s.trim().parse::<u8>().ok())
        == Some(id)
}

#[cfg(test)]
mod tests {
    use super::{SocketProtocol, WifiNora};
    use crate::test_util::{CountingDelay, ScriptedUart};
    use crate::Error;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    fn nora(chunks: &[&str], rst: &PinMock) -> WifiNora<ScriptedUart, CountingDelay, PinMock> {
        WifiNora::new(ScriptedUart::new(chunks), CountingDelay::new(), rst.clone())
    }

    #[test]
    fn reset_waits_for_startup() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ];
        let mut rst = PinMock::new(&expectations);
        let mut dev = nora(&["", "", "\r\n+STARTUP\r\n", "\"3.1.0-017\"\r\nOK\r\n"], &rst);

        dev.reset().unwrap();
        assert_eq!(dev.firmware_version().unwrap(), "3.1.0-017");

        let (uart, _, _) = dev.release();
        assert_eq!(uart.written_str(), "AT+CGMR\r");
        rst.done();
    }

    #[test]
    fn station_and_socket_session() {
        let mut rst = PinMock::new(&[]);
        let mut dev = nora(
            &[
                "OK\r\n",
                "OK\r\n",
                "OK\r\n",
                "OK\r\n",
                "",
                "+UEWSNU\r\n",
                "+USOCR:0\r\nOK\r\n",
                "OK\r\n",
                "+UESOC:",
                "0\r\n",
                "OK\r\n",
                "+USORS:0,5,\"hello\"\r\nOK\r\n",
                "OK\r\n",
            ],
            &rst,
        );

        dev.disable_echo().unwrap();
        dev.connect_to_ap("MikroE Public", "mikroe.guest").unwrap();
        let id = dev.create_socket(SocketProtocol::Tcp).unwrap();
        assert_eq!(id, 0);
        dev.connect_socket(id, "192.168.1.10", 1234).unwrap();
        dev.write_socket(id, "ping").unwrap();
        assert_eq!(dev.read_socket(id, 64).unwrap(), "hello");
        dev.close_socket(id).unwrap();

        let (uart, _, _) = dev.release();
        assert_eq!(
            uart.written_str(),
            "ATE0\r\
             AT+UWSCP=0,\"MikroE Public\"\r\
             AT+UWSSW=0,\"mikroe.guest\",0\r\
             AT+UWSC=0\r\
             AT+USOCR=6\r\
             AT+USOC=0,\"192.168.1.10\",1234\r\
             AT+USOWS=0,\"ping\"\r\
             AT+USORS=0,64\r\
             AT+USOCL=0\r"
        );
        rst.done();
    }

    #[test]
    fn unexpected_reply_is_unknown() {
        let mut rst = PinMock::new(&[]);
        let mut dev = nora(&["+UUWLD:0\r\n"], &rst);
        assert_eq!(dev.check_communication(), Err(Error::Unknown));

        // quiet line is a plain timeout
        assert_eq!(dev.check_communication(), Err(Error::Timeout));
        rst.done();
    }

    #[test]
    fn error_reply() {
        let mut rst = PinMock::new(&[]);
        let mut dev = nora(&["ERROR\r\n"], &rst);
        assert_eq!(dev.close_socket(3), Err(Error::Protocol));
        rst.done();
    }

    #[test]
    fn invalid_parameters() {
        let mut rst = PinMock::new(&[]);
        let mut dev = nora(&[], &rst);
        assert_eq!(dev.connect_to_ap("", "pwd"), Err(Error::InvalidParameter));
        assert_eq!(
            dev.connect_to_ap(&"s".repeat(33), "pwd"),
            Err(Error::InvalidParameter)
        );
        assert_eq!(dev.write_socket(0, "a\"b"), Err(Error::InvalidParameter));

        let (uart, _, _) = dev.release();
        assert!(uart.written().is_empty());
        rst.done();
    }

    #[test]
    fn socket_event_matches_handle() {
        assert!(super::socket_event(b"+UESOC:1\r\n", "+UESOC:", 1));
        assert!(!super::socket_event(b"+UESOC:1\r\n", "+UESOC:", 2));
        assert!(!super::socket_event(b"+UESOC:1", "+UESOC:", 1));
    }
}
