use crate::command::NO_RESPONSE;

/// Protocol-level failure behind an [`Error::Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// The card never answered within the response polling budget, or could
    /// not be reselected.
    NoResponse,
    /// The card answered a command with error bits set in R1.
    Command { index: u8, r1: u8 },
    /// A data phase started with something other than the start-block token.
    Token(u8),
    /// Wait-ready or the start-block token exceeded its bound.
    Timeout,
    /// The data-response token did not report "accepted".
    WriteRejected(u8),
    /// Received block failed CRC16 verification.
    DataCrc { expected: u16, actual: u16 },
    /// The card cannot perform the requested operation.
    Unsupported,
}

impl Fault {
    pub(crate) fn from_r1(index: u8, r1: u8) -> Self {
        if r1 == NO_RESPONSE {
            Self::NoResponse
        } else {
            Self::Command { index, r1 }
        }
    }
}

/// Error returned by the block-device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The card or the bus failed the operation.
    Device(Fault),
    /// Write attempted on a write-protected card.
    WriteProtected,
    /// The drive is not initialized.
    NotReady,
    /// Zero sector count, short buffer or unknown control code.
    Parameter,
}

impl From<Fault> for Error {
    fn from(value: Fault) -> Self {
        Self::Device(value)
    }
}

impl Error {
    pub fn code(&self) -> ResultCode {
        match self {
            Error::Device(_) => ResultCode::Error,
            Error::WriteProtected => ResultCode::WriteProtected,
            Error::NotReady => ResultCode::NotReady,
            Error::Parameter => ResultCode::ParameterError,
        }
    }
}

/// Flat result code for callers that speak the classic disk-I/O numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResultCode {
    Ok = 0,
    Error = 1,
    WriteProtected = 2,
    NotReady = 3,
    ParameterError = 4,
}

impl From<Result<(), Error>> for ResultCode {
    fn from(value: Result<(), Error>) -> Self {
        match value {
            Ok(()) => ResultCode::Ok,
            Err(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_no_response() {
        assert_eq!(Fault::from_r1(17, 0xFF), Fault::NoResponse);
        assert_eq!(Fault::from_r1(17, 0x04), Fault::Command { index: 17, r1: 0x04 });
    }

    #[test]
    fn result_codes() {
        assert_eq!(ResultCode::from(Ok(())), ResultCode::Ok);
        assert_eq!(ResultCode::from(Err(Error::Device(Fault::Timeout))), ResultCode::Error);
        assert_eq!(ResultCode::from(Err(Error::Parameter)), ResultCode::ParameterError);
        assert_eq!(Error::NotReady.code() as u8, 3);
    }
}
