//! Test doubles for the UART side of the AT-command drivers.
//!
//! `embedded-hal-mock` covers I2C, SPI and GPIO but has no `embedded-io` mock, so the scripted
//! UART lives here.
use std::collections::VecDeque;
use std::vec::Vec;

/// UART that hands out one scripted chunk per ready poll.
///
/// An empty chunk makes exactly one `read_ready()` call report "nothing pending".  Once the
/// script runs out the line stays quiet, unless the UART was built with
/// [`streaming`](Self::streaming).
pub struct ScriptedUart {
    rx: VecDeque<Vec<u8>>,
    tx: Vec<u8>,
    fail_writes: bool,
    endless: Option<Vec<u8>>,
}

impl ScriptedUart {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            rx: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            tx: Vec::new(),
            fail_writes: false,
            endless: None,
        }
    }

    /// A line that never stops sending `chunk`.
    pub fn streaming(chunk: &[u8]) -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            fail_writes: false,
            endless: Some(chunk.to_vec()),
        }
    }

    pub fn failing() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            fail_writes: true,
            endless: None,
        }
    }

    pub fn written(&self) -> &[u8] {
        &self.tx
    }

    pub fn written_str(&self) -> &str {
        core::str::from_utf8(&self.tx).unwrap()
    }
}

impl embedded_io::ErrorType for ScriptedUart {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io::ReadReady for ScriptedUart {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        match self.rx.front() {
            Some(chunk) if chunk.is_empty() => {
                self.rx.pop_front();
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(self.endless.is_some()),
        }
    }
}

impl embedded_io::Read for ScriptedUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(chunk) = self.rx.front_mut() else {
            let Some(endless) = &self.endless else {
                return Ok(0);
            };
            let n = buf.len().min(endless.len());
            buf[..n].copy_from_slice(&endless[..n]);
            return Ok(n);
        };
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            self.rx.pop_front();
        }
        Ok(n)
    }
}

impl embedded_io::Write for ScriptedUart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_writes {
            return Err(embedded_io::ErrorKind::BrokenPipe);
        }
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// `DelayNs` that only records how long it was asked to sleep.
#[derive(Default)]
pub struct CountingDelay {
    pub total_ns: u64,
}

impl CountingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl embedded_hal::delay::DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
