//! Line-oriented AT-command client.
//!
//! The four modem Clicks in this crate (Bluetooth 2, ESP8684, RAK4630, WiFi NORA) all speak a
//! variant of the same protocol: an ASCII command line goes out, and free-form response lines
//! come back until a known token (`OK`, `ready`, `+EVT:JOINED`, ...) or an error marker shows
//! up.  [`AtClient`] implements that exchange once; the device modules only carry their command
//! tables and a [`Config`].
//!
//! ## Example
//! ```
//! # use click_drivers::at::{AtClient, Config};
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
//! # let (uart, delay) = (Uart, Delay);
//! let mut modem: AtClient<_, _, 256> = AtClient::new(uart, delay, Config::new());
//!
//! modem.send_cmd_with_param("AT+CWMODE", "1").unwrap();
//! modem.await_response("OK").unwrap();
//! ```
use core::fmt;

use embedded_hal::delay::DelayNs;
use log::{debug, trace, warn};

use crate::line::{find, Escaped, LineBuffer};
use crate::{Error, Transport};

/// Number of bytes pulled from the transport per [`AtClient::process`] call.
pub const RX_CHUNK: usize = 64;

/// Generic failure marker used by most AT dialects.
pub const ERROR: &str = "ERROR";

/// Protocol settings for one AT dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Appended to every command line.
    pub terminator: &'static str,
    /// Placed between mnemonic and parameter.
    pub param_separator: &'static str,
    /// Appended to the mnemonic for queries.
    pub query_suffix: &'static str,
    /// Substrings that terminate an exchange as [`Error::Protocol`].
    pub error_markers: &'static [&'static str],
    /// Default budget for [`AtClient::await_response`].
    pub timeout_ms: u32,
    /// Sleep between two reads while waiting for a response.
    pub poll_interval_ms: u32,
    /// Longest command line that may be sent, counting mnemonic, parameter and terminator.  The
    /// separator and query suffix are not counted.
    pub max_command_len: usize,
    /// Discard 0x00 bytes while accumulating.
    pub drop_nul: bool,
    /// Report [`Error::Unknown`] instead of [`Error::Timeout`] when the budget expires with
    /// unrecognized data in the buffer.
    pub unknown_on_residue: bool,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            terminator: "\r\n",
            param_separator: "=",
            query_suffix: "?",
            error_markers: &[ERROR],
            timeout_ms: 5_000,
            poll_interval_ms: 1,
            max_command_len: 100,
            drop_nul: false,
            unknown_on_residue: false,
        }
    }

    pub const fn terminator(mut self, terminator: &'static str) -> Self {
        self.terminator = terminator;
        self
    }

    pub const fn param_separator(mut self, separator: &'static str) -> Self {
        self.param_separator = separator;
        self
    }

    pub const fn query_suffix(mut self, suffix: &'static str) -> Self {
        self.query_suffix = suffix;
        self
    }

    pub const fn error_markers(mut self, markers: &'static [&'static str]) -> Self {
        self.error_markers = markers;
        self
    }

    pub const fn timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub const fn poll_interval_ms(mut self, interval_ms: u32) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub const fn max_command_len(mut self, len: usize) -> Self {
        self.max_command_len = len;
        self
    }

    pub const fn drop_nul(mut self, drop: bool) -> Self {
        self.drop_nul = drop;
        self
    }

    pub const fn unknown_on_residue(mut self, enable: bool) -> Self {
        self.unknown_on_residue = enable;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Verdict of the predicate passed to [`AtClient::await_scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// The awaited response is complete.
    Done,
    /// Not there yet.
    Pending,
    /// A length-delimited frame starting at this offset is still arriving.  Its bytes are not
    /// checked for error markers.
    Open(usize),
}

/// Outcome of a single [`AtClient::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProcessStatus {
    /// Bytes were read; carries how many were stored.
    DataRead(usize),
    NoData,
}

/// AT-command client over a byte transport with an `N`-byte line buffer.
pub struct AtClient<T, D, const N: usize> {
    transport: T,
    delay: D,
    config: Config,
    rx: LineBuffer<N>,
    last: LineBuffer<N>,
}

impl<T, D, const N: usize> AtClient<T, D, N>
where
    T: Transport,
    D: DelayNs,
{
    pub fn new(transport: T, delay: D, config: Config) -> Self {
        Self {
            transport,
            delay,
            config,
            rx: LineBuffer::new(),
            last: LineBuffer::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Write `mnemonic` followed by the terminator.
    pub fn send_cmd(&mut self, mnemonic: &str) -> Result<(), Error<T::BusError>> {
        self.write_line(mnemonic, "", None)
    }

    /// Write `mnemonic`, the parameter separator, `param` and the terminator.
    pub fn send_cmd_with_param(
        &mut self,
        mnemonic: &str,
        param: &str,
    ) -> Result<(), Error<T::BusError>> {
        let separator = self.config.param_separator;
        self.write_line(mnemonic, separator, Some(format_args!("{}", param)))
    }

    /// Like [`send_cmd_with_param`](Self::send_cmd_with_param) with a formatted parameter.
    ///
    /// The formatted length is measured before anything is written, so an oversized parameter
    /// never reaches the transport.
    pub fn send_cmd_fmt(
        &mut self,
        mnemonic: &str,
        param: fmt::Arguments<'_>,
    ) -> Result<(), Error<T::BusError>> {
        let separator = self.config.param_separator;
        self.write_line(mnemonic, separator, Some(param))
    }

    /// Write `mnemonic`, the query suffix and the terminator.
    pub fn send_cmd_query(&mut self, mnemonic: &str) -> Result<(), Error<T::BusError>> {
        let suffix = self.config.query_suffix;
        self.write_line(mnemonic, suffix, None)
    }

    /// Write payload bytes verbatim, without terminator or length limit.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error<T::BusError>> {
        debug!("> {} raw bytes", bytes.len());
        self.transport.transmit(bytes)?;
        Ok(())
    }

    fn write_line(
        &mut self,
        mnemonic: &str,
        suffix: &str,
        param: Option<fmt::Arguments<'_>>,
    ) -> Result<(), Error<T::BusError>> {
        let mut param_len = LenCounter(0);
        if let Some(args) = param {
            if fmt::write(&mut param_len, args).is_err() {
                return Err(Error::CommandTooLong);
            }
        }
        let len = mnemonic.len() + param_len.0 + self.config.terminator.len();
        if len > self.config.max_command_len {
            warn!(
                "command {} is {} bytes, limit is {}",
                mnemonic, len, self.config.max_command_len
            );
            return Err(Error::CommandTooLong);
        }

        match param {
            Some(args) => debug!("> {}{}{}", mnemonic, suffix, args),
            None => debug!("> {}{}", mnemonic, suffix),
        }

        self.transport.transmit(mnemonic.as_bytes())?;
        self.transport.transmit(suffix.as_bytes())?;
        if let Some(args) = param {
            let mut writer = TxWriter {
                transport: &mut self.transport,
                error: None,
            };
            if fmt::write(&mut writer, args).is_err() {
                return Err(writer.error.map_or(Error::CommandTooLong, Error::Io));
            }
        }
        self.transport.transmit(self.config.terminator.as_bytes())?;
        Ok(())
    }

    /// Move whatever the transport has pending into the line buffer without blocking.
    ///
    /// Returns [`Error::Overflow`] (with the line buffer cleared) if the data did not fit.
    pub fn process(&mut self) -> Result<ProcessStatus, Error<T::BusError>> {
        let mut chunk = [0u8; RX_CHUNK];
        let n = self.transport.receive(&mut chunk)?;
        if n == 0 {
            return Ok(ProcessStatus::NoData);
        }
        trace!("< {}", Escaped(&chunk[..n]));

        match self.rx.append(&chunk[..n], self.config.drop_nul) {
            Ok(stored) => Ok(ProcessStatus::DataRead(stored)),
            Err(_) => {
                warn!("rx buffer overflow ({} bytes), discarding", N);
                Err(Error::Overflow)
            }
        }
    }

    /// Poll until `target` shows up in the line buffer, using the configured timeout.
    pub fn await_response(&mut self, target: &str) -> Result<(), Error<T::BusError>> {
        let timeout_ms = self.config.timeout_ms;
        self.await_response_for(target, timeout_ms)
    }

    /// Poll until `target` shows up in the line buffer or `timeout_ms` elapses.
    ///
    /// Each iteration accumulates pending bytes, then looks for `target`, then for the error
    /// markers, then checks the budget.  A buffer holding both `target` and an error marker
    /// therefore counts as a match.
    ///
    /// On every outcome except [`Error::Overflow`] the buffer content is moved to
    /// [`last_response`](Self::last_response) and the line buffer is left empty.
    pub fn await_response_for(
        &mut self,
        target: &str,
        timeout_ms: u32,
    ) -> Result<(), Error<T::BusError>> {
        self.await_until(timeout_ms, |buf| find(buf, target.as_bytes()).is_some())
    }

    /// Same polling rules as [`await_response_for`](Self::await_response_for), with the target
    /// test replaced by `done`, which sees the whole line buffer on every iteration.
    pub fn await_until<F>(
        &mut self,
        timeout_ms: u32,
        mut done: F,
    ) -> Result<(), Error<T::BusError>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        self.await_scan(timeout_ms, |buf| {
            if done(buf) {
                Scan::Done
            } else {
                Scan::Pending
            }
        })
    }

    /// Like [`await_until`](Self::await_until), for responses that carry binary payloads.
    ///
    /// While `scan` reports [`Scan::Open`], error markers are only searched for in front of the
    /// open frame, so payload bytes that happen to spell a marker do not end the wait.
    pub fn await_scan<F>(
        &mut self,
        timeout_ms: u32,
        mut scan: F,
    ) -> Result<(), Error<T::BusError>>
    where
        F: FnMut(&[u8]) -> Scan,
    {
        let step = self.config.poll_interval_ms.max(1);
        let mut elapsed_ms: u32 = 0;

        loop {
            self.process()?;

            let buf = self.rx.as_bytes();
            let checked = match scan(buf) {
                Scan::Done => {
                    self.finish();
                    return Ok(());
                }
                Scan::Pending => buf,
                Scan::Open(start) => &buf[..start.min(buf.len())],
            };

            if self
                .config
                .error_markers
                .iter()
                .any(|m| find(checked, m.as_bytes()).is_some())
            {
                self.finish();
                return Err(Error::Protocol);
            }

            if elapsed_ms >= timeout_ms {
                let residue = !self.rx.is_empty();
                warn!("no response after {} ms", elapsed_ms);
                self.finish();
                return Err(if residue && self.config.unknown_on_residue {
                    Error::Unknown
                } else {
                    Error::Timeout
                });
            }

            self.delay.delay_ms(step);
            elapsed_ms = elapsed_ms.saturating_add(step);
        }
    }

    fn finish(&mut self) {
        debug!("< {}", Escaped(self.rx.as_bytes()));
        self.rx.move_into(&mut self.last);
    }

    /// Bytes accumulated so far in the current exchange.
    pub fn buffer(&self) -> &[u8] {
        self.rx.as_bytes()
    }

    /// Read and throw away whatever the transport sends until it goes quiet.
    ///
    /// Gives up with [`Error::Timeout`] if the line is still busy after `budget_ms`.  The line
    /// buffer is empty afterwards either way.
    pub fn discard_input(&mut self, budget_ms: u32) -> Result<(), Error<T::BusError>> {
        let step = self.config.poll_interval_ms.max(1);
        let mut elapsed_ms: u32 = 0;

        let result = loop {
            match self.process() {
                Ok(ProcessStatus::NoData) => break Ok(()),
                Ok(ProcessStatus::DataRead(_)) | Err(Error::Overflow) => {}
                Err(e) => break Err(e),
            }
            if elapsed_ms >= budget_ms {
                warn!("input still arriving after {} ms", elapsed_ms);
                break Err(Error::Timeout);
            }
            self.delay.delay_ms(step);
            elapsed_ms = elapsed_ms.saturating_add(step);
        };
        self.rx.clear();
        result
    }

    /// Discard the current line buffer.
    pub fn clear(&mut self) {
        self.rx.clear();
    }

    /// Everything received during the last completed exchange.
    pub fn last_response(&self) -> &[u8] {
        self.last.as_bytes()
    }

    pub fn last_response_str(&self) -> Option<&str> {
        self.last.as_str()
    }

    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }
}

struct LenCounter(usize);

impl fmt::Write for LenCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

struct TxWriter<'a, T: Transport> {
    transport: &'a mut T,
    error: Option<T::BusError>,
}

impl<T: Transport> fmt::Write for TxWriter<'_, T> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.transport.transmit(s.as_bytes()).map_err(|e| {
            self.error = Some(e);
            fmt::Error
        })
    }
}

/// Extract the text between `prefix` and the end of its line, e.g. the value of `+CIFSR:STAIP,`.
pub fn field_after<'a>(response: &'a [u8], prefix: &str) -> Option<&'a str> {
    let start = find(response, prefix.as_bytes())? + prefix.len();
    let rest = &response[start..];
    let end = rest
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(rest.len());
    core::str::from_utf8(&rest[..end]).ok()
}
