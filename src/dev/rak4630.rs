//! Support for the RAK4630 LoRa Click (RAKwireless RAK4630 running RUI3 firmware)
//!
//! RUI3 queries end in `=?` and failures are reported with one of several `AT_*_ERROR` codes
//! instead of a plain `ERROR`.  Network results arrive later as `+EVT:` notifications.
//!
//! The module works either as a LoRaWAN end device ([`NetworkMode::LoRaWan`]) or in
//! point-to-point mode ([`NetworkMode::P2p`]).
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::at::{self, AtClient, Config};
use crate::line::find;
use crate::{Error, Transport};

pub const CMD_AT: &str = "AT";
pub const CMD_RESET: &str = "ATZ";
pub const CMD_VERSION: &str = "AT+VER";
pub const CMD_NETWORK_MODE: &str = "AT+NWM";
pub const CMD_JOIN_MODE: &str = "AT+NJM";
pub const CMD_DEV_EUI: &str = "AT+DEVEUI";
pub const CMD_APP_EUI: &str = "AT+APPEUI";
pub const CMD_APP_KEY: &str = "AT+APPKEY";
pub const CMD_BAND: &str = "AT+BAND";
pub const CMD_JOIN: &str = "AT+JOIN";
pub const CMD_SEND: &str = "AT+SEND";
pub const CMD_P2P_CONFIG: &str = "AT+P2P";
pub const CMD_P2P_SEND: &str = "AT+PSEND";
pub const CMD_P2P_RECEIVE: &str = "AT+PRECV";

pub const RSP_OK: &str = "OK";
pub const EVT_JOINED: &str = "+EVT:JOINED";
pub const EVT_JOIN_FAILED: &str = "+EVT:JOIN_FAILED";
pub const EVT_P2P_TX_DONE: &str = "+EVT:TXP2P DONE";
pub const EVT_P2P_RX: &str = "+EVT:RXP2P";
pub const EVT_P2P_RX_TIMEOUT: &str = "+EVT:RXP2P RECEIVE TIMEOUT";

/// Error codes reported by RUI3.
pub const ERROR_MARKERS: &[&str] = &[
    "AT_ERROR",
    "AT_PARAM_ERROR",
    "AT_BUSY_ERROR",
    "AT_TEST_PARAM_OVERFLOW",
    "AT_NO_NETWORK_JOINED",
];

/// Largest LoRa payload the module can carry.
pub const MAX_PAYLOAD_LEN: usize = 242;

pub const RX_BUFFER_LEN: usize = 600;

pub const BOOT_DELAY_MS: u32 = 1_000;
pub const JOIN_TIMEOUT_MS: u32 = 60_000;

pub const CONFIG: Config = Config::new()
    .query_suffix("=?")
    .error_markers(ERROR_MARKERS)
    .timeout_ms(3_000)
    // AT+SEND=<port>:<hex payload>
    .max_command_len(CMD_SEND.len() + 4 + 2 * MAX_PAYLOAD_LEN + 2)
    .drop_nul(true);

pub type Client<T, D> = AtClient<T, D, RX_BUFFER_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkMode {
    P2p = 0,
    LoRaWan = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinMode {
    Abp = 0,
    Otaa = 1,
}

/// LoRaWAN regional band plans, numbered as RUI3 expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Band {
    Eu433 = 0,
    Cn470 = 1,
    Ru864 = 2,
    In865 = 3,
    Eu868 = 4,
    Us915 = 5,
    Au915 = 6,
    Kr920 = 7,
    As923 = 8,
}

/// Point-to-point radio settings for `AT+P2P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct P2pConfig {
    pub frequency_hz: u32,
    pub spreading_factor: u8,
    pub bandwidth_khz: u16,
    /// Coding rate 4/5 .. 4/8 as 0..3.
    pub coding_rate: u8,
    pub preamble_len: u16,
    pub tx_power_dbm: u8,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 868_000_000,
            spreading_factor: 7,
            bandwidth_khz: 125,
            coding_rate: 0,
            preamble_len: 8,
            tx_power_dbm: 14,
        }
    }
}

/// A frame received in P2P mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P2pPacket {
    pub rssi: i16,
    pub snr: i8,
    pub len: usize,
}

/// RAK4630 Click driver
pub struct Rak4630<T, D, RST> {
    client: Client<T, D>,
    rst: RST,
}

impl<T, D, RST> Rak4630<T, D, RST>
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

    /// Pulse the reset line, give the firmware time to boot and drop its banner.
    pub fn reset(&mut self) -> Result<(), Error<T::BusError>> {
        if super::pulse_reset(&mut self.rst, self.client.delay_mut(), 100).is_err() {
            return Err(Error::Pin);
        }
        self.client.delay_mut().delay_ms(BOOT_DELAY_MS);
        self.client.discard_input(BOOT_DELAY_MS)
    }

    /// Reboot via `ATZ`.  RUI3 does not acknowledge the command.
    pub fn software_reset(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_RESET)?;
        self.client.delay_mut().delay_ms(BOOT_DELAY_MS);
        self.client.discard_input(BOOT_DELAY_MS)
    }

    pub fn check_communication(&mut self) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd(CMD_AT)?;
        self.client.await_response(RSP_OK)
    }

    /// Firmware version string, e.g. `RUI_4.0.6_RAK4631`.
    pub fn firmware_version(&mut self) -> Result<&str, Error<T::BusError>> {
        self.client.send_cmd_query(CMD_VERSION)?;
        self.client.await_response(RSP_OK)?;
        at::field_after(self.client.last_response(), "AT+VER=").ok_or(Error::Unknown)
    }

    /// Switch between P2P and LoRaWAN.  The module restarts when the mode changes.
    pub fn set_network_mode(&mut self, mode: NetworkMode) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_NETWORK_MODE, format_args!("{}", mode as u8))?;
        self.client.await_response(RSP_OK)
    }

    pub fn set_join_mode(&mut self, mode: JoinMode) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_JOIN_MODE, format_args!("{}", mode as u8))?;
        self.client.await_response(RSP_OK)
    }

    pub fn set_band(&mut self, band: Band) -> Result<(), Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_BAND, format_args!("{}", band as u8))?;
        self.client.await_response(RSP_OK)
    }

    pub fn set_device_eui(&mut self, eui: &[u8; 8]) -> Result<(), Error<T::BusError>> {
        self.set_key(CMD_DEV_EUI, eui)
    }

    pub fn set_app_eui(&mut self, eui: &[u8; 8]) -> Result<(), Error<T::BusError>> {
        self.set_key(CMD_APP_EUI, eui)
    }

    pub fn set_app_key(&mut self, key: &[u8; 16]) -> Result<(), Error<T::BusError>> {
        self.set_key(CMD_APP_KEY, key)
    }

    fn set_key(&mut self, cmd: &str, key: &[u8]) -> Result<(), Error<T::BusError>> {
        let mut buf = [0u8; 32];
        let Some(hex) = encode_upper(key, &mut buf) else {
            return Err(Error::InvalidParameter);
        };
        self.client.send_cmd_with_param(cmd, hex)?;
        self.client.await_response(RSP_OK)
    }

    /// Start an OTAA join and wait for its outcome.
    ///
    /// A `+EVT:JOIN_FAILED_*` notification is reported as [`Error::Protocol`].
    pub fn join(&mut self, attempts: u8) -> Result<(), Error<T::BusError>> {
        // join now, no auto-join, 10 s between attempts
        self.client
            .send_cmd_fmt(CMD_JOIN, format_args!("1:0:10:{}", attempts))?;
        self.client.await_response(RSP_OK)?;
        if !join_finished(self.client.last_response()) {
            self.client.await_until(JOIN_TIMEOUT_MS, join_finished)?;
        }
        if find(self.client.last_response(), EVT_JOINED.as_bytes()).is_some() {
            Ok(())
        } else {
            Err(Error::Protocol)
        }
    }

    /// Send an unconfirmed uplink on `port`.
    pub fn send(&mut self, port: u8, payload: &[u8]) -> Result<(), Error<T::BusError>> {
        if port == 0 || port > 223 {
            return Err(Error::InvalidParameter);
        }
        let mut buf = [0u8; 2 * MAX_PAYLOAD_LEN];
        let Some(hex) = encode_upper(payload, &mut buf) else {
            return Err(Error::InvalidParameter);
        };
        self.client
            .send_cmd_fmt(CMD_SEND, format_args!("{}:{}", port, hex))?;
        self.client.await_response(RSP_OK)
    }

    pub fn configure_p2p(&mut self, config: &P2pConfig) -> Result<(), Error<T::BusError>> {
        self.client.send_cmd_fmt(
            CMD_P2P_CONFIG,
            format_args!(
                "{}:{}:{}:{}:{}:{}",
                config.frequency_hz,
                config.spreading_factor,
                config.bandwidth_khz,
                config.coding_rate,
                config.preamble_len,
                config.tx_power_dbm
            ),
        )?;
        self.client.await_response(RSP_OK)
    }

    pub fn p2p_send(&mut self, payload: &[u8]) -> Result<(), Error<T::BusError>> {
        let mut buf = [0u8; 2 * MAX_PAYLOAD_LEN];
        let hex = match encode_upper(payload, &mut buf) {
            Some(hex) if !hex.is_empty() => hex,
            _ => return Err(Error::InvalidParameter),
        };
        self.client.send_cmd_with_param(CMD_P2P_SEND, hex)?;
        self.client.await_response(RSP_OK)?;
        self.client.await_response(EVT_P2P_TX_DONE)
    }

    /// Listen for one P2P frame for up to `window_ms` and decode it into `buf`.
    ///
    /// `buf` is only written when a well-formed frame was received.
    pub fn p2p_receive(
        &mut self,
        window_ms: u16,
        buf: &mut [u8],
    ) -> Result<P2pPacket, Error<T::BusError>> {
        self.client
            .send_cmd_fmt(CMD_P2P_RECEIVE, format_args!("{}", window_ms))?;
        self.client.await_response(RSP_OK)?;
        self.client
            .await_until(u32::from(window_ms) + 1_000, |rx| complete_event(rx, EVT_P2P_RX))?;

        let response = self.client.last_response();
        if find(response, EVT_P2P_RX_TIMEOUT.as_bytes()).is_some() {
            return Err(Error::Timeout);
        }
        let Some(event) = at::field_after(response, "+EVT:RXP2P:") else {
            return Err(Error::Unknown);
        };
        parse_p2p_event(event, buf).ok_or(Error::Unknown)
    }
}

fn join_finished(rx: &[u8]) -> bool {
    find(rx, EVT_JOINED.as_bytes()).is_some() || find(rx, EVT_JOIN_FAILED.as_bytes()).is_some()
}

/// True once `event` has been received up to its line end.
fn complete_event(buf: &[u8], event: &str) -> bool {
    match find(buf, event.as_bytes()) {
        Some(start) => buf[start..].contains(&b'\n'),
        None => false,
    }
}

/// Parse `<rssi>:<snr>:<hex payload>`.
fn parse_p2p_event(event: &str, buf: &mut [u8]) -> Option<P2pPacket> {
    let mut fields = event.splitn(3, ':');
    let rssi = fields.next()?.parse().ok()?;
    let snr = fields.next()?.parse().ok()?;
    let len = decode_hex(fields.next()?.trim(), buf)?;
    Some(P2pPacket { rssi, snr, len })
}

/// Decode `text` into the front of `out`.  `out` is left untouched if `text` is not valid hex.
fn decode_hex(text: &str, out: &mut [u8]) -> Option<usize> {
    let len = text.len() / 2;
    if text.len() % 2 != 0 || len > out.len() || len > MAX_PAYLOAD_LEN {
        return None;
    }
    let mut scratch = [0u8; MAX_PAYLOAD_LEN];
    hex::decode_to_slice(text, &mut scratch[..len]).ok()?;
    out[..len].copy_from_slice(&scratch[..len]);
    Some(len)
}

/// Upper-case hex of `bytes`, rendered into `out`.  `None` if `out` is too small.
fn encode_upper<'a>(bytes: &[u8], out: &'a mut [u8]) -> Option<&'a str> {
    let out = out.get_mut(..2 * bytes.len())?;
    hex::encode_to_slice(bytes, out).ok()?;
    out.make_ascii_uppercase();
    core::str::from_utf8(out).ok()
}
