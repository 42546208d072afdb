use std::error::Error;
use std::fmt;
use std::io;

/// Errors happening while trying to send packets to the network.
#[derive(Debug)]
pub enum TxError {
    /// The outgoing device has not been opened, or has already been shut
    /// down.
    DeviceDown,

    /// The payload does not fit in the given protocol. Either larger than
    /// the device MTU or larger than a 16 bit length field can express.
    TooLargePayload,

    /// The link-layer address of the next hop is not known yet. The packet
    /// was dropped and a resolution request has been sent, so a retry a
    /// short while later may succeed.
    UnresolvedLink,

    /// There was an `io::Error` during transmission.
    Io(io::Error),

    /// Any other error not covered by the more specific enum variants.
    Other(String),
}

impl From<io::Error> for TxError {
    fn from(e: io::Error) -> Self {
        TxError::Io(e)
    }
}

impl From<TxError> for io::Error {
    fn from(e: TxError) -> Self {
        match e {
            TxError::Io(io_e) => io_e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use crate::TxError::*;
        match *self {
            DeviceDown => write!(fmt, "device is down"),
            TooLargePayload => write!(fmt, "too large payload"),
            UnresolvedLink => write!(fmt, "link address not resolved"),
            Io(ref e) => write!(fmt, "IO error: {}", e),
            Other(ref s) => write!(fmt, "{}", s),
        }
    }
}

impl Error for TxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        if let TxError::Io(ref e) = *self {
            Some(e)
        } else {
            None
        }
    }
}

/// Type binding for the type of `Result` that a send path returns.
pub type TxResult = Result<(), TxError>;

/// Reason an incoming packet was discarded. Ingress never propagates these
/// to the application; they are logged and counted.
#[derive(Debug, Eq, PartialEq)]
pub enum RxError {
    /// Nothing is listening for this packet, so it is silently discarded.
    NoListener(String),

    /// The packet contains an invalid checksum.
    InvalidChecksum,

    /// The length of the packet does not match the requirements or header
    /// content of a protocol.
    InvalidLength,

    /// Other packet content is invalid or unsupported.
    InvalidContent,

    /// The protocol input queue is full, the newest entry is dropped.
    QueueFull,
}

impl fmt::Display for RxError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use crate::RxError::*;
        match *self {
            NoListener(ref s) => write!(fmt, "no listener for packet: {}", s),
            InvalidChecksum => write!(fmt, "invalid checksum in packet"),
            InvalidLength => write!(fmt, "invalid length in packet"),
            InvalidContent => write!(fmt, "invalid content in packet"),
            QueueFull => write!(fmt, "input queue full"),
        }
    }
}

impl Error for RxError {}

/// Simple type definition for the return type of ingress functions.
pub type RxResult = Result<(), RxError>;
