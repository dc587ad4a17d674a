use core::fmt;

/// Error returned by every driver in this crate.
///
/// `E` is the error type of the underlying bus (UART, I2C or SPI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The transport or bus failed.
    Io(E),
    /// A command line would not fit the configured command length; nothing was sent.
    CommandTooLong,
    /// The line buffer ran out of space and was cleared.
    Overflow,
    /// Neither the expected response nor an error marker arrived in time.
    Timeout,
    /// The device answered with one of its error markers.
    Protocol,
    /// The timeout expired with unrecognized data left in the line buffer.
    Unknown,
    /// A checksum transmitted by the device did not match.
    Crc,
    /// The device identified itself as something else.
    InvalidDevice,
    /// The device has no new measurement available yet.
    NotReady,
    /// An argument cannot be expressed in the device's command syntax.
    InvalidParameter,
    /// Driving a control GPIO (reset, wake) failed.
    Pin,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::Io(e)
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "bus error: {:?}", e),
            Error::CommandTooLong => f.write_str("command too long"),
            Error::Overflow => f.write_str("line buffer overflow"),
            Error::Timeout => f.write_str("response timeout"),
            Error::Protocol => f.write_str("device reported an error"),
            Error::Unknown => f.write_str("unrecognized response"),
            Error::Crc => f.write_str("checksum mismatch"),
            Error::InvalidDevice => f.write_str("unexpected device id"),
            Error::NotReady => f.write_str("no data ready"),
            Error::InvalidParameter => f.write_str("invalid parameter"),
            Error::Pin => f.write_str("control pin error"),
        }
    }
}
