use core::fmt;

/// Errors returned by the wire codec.
///
/// Protocol-level failures observed at runtime (CRC mismatch, PHY loss, duplicates) are
/// *not* errors; they are counted in [`crate::stats::ConnectionStats`] and handled by the
/// link layer's own retry machinery.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Packet specified an invalid length value or was too short.
    InvalidLength,

    /// Invalid value supplied for a field.
    InvalidValue,

    /// Unexpectedly reached the end of a buffer while reading or writing.
    Eof,

    /// Parsing didn't consume the entire buffer.
    IncompleteParse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::InvalidLength => "invalid length value specified",
            Error::InvalidValue => "invalid value for field",
            Error::Eof => "end of buffer",
            Error::IncompleteParse => "excess data in buffer",
        })
    }
}

impl std::error::Error for Error {}
