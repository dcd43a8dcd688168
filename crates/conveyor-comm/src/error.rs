use conveyor_base::EndPoint;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
};

/// A failure of the transport. Every call site logs these and carries on: only
/// [`ChannelError::BindConflict`] is fatal, and only at startup.
#[derive(Debug)]
pub enum ChannelError {
    /// No listener could be reached at the address.
    Unreachable { address: EndPoint, source: io::Error },
    /// A connection was made but writing to it or reading the acknowledgment failed. The
    /// connection has been dropped.
    Transmit {
        address: EndPoint,
        source: anyhow::Error,
    },
    /// The receiver acknowledged the transmission negatively.
    Refused { address: EndPoint },
    /// Another listener already owns the address.
    BindConflict { address: EndPoint, source: io::Error },
    /// The channel was closed. Returned by every receive after a close.
    Closed,
    /// A file to be sent couldn't be read from local storage.
    LocalFile {
        name: String,
        source: anyhow::Error,
    },
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { address, source } => {
                write!(f, "no listener reachable at {address}: {source}")
            }
            Self::Transmit { address, source } => {
                write!(f, "transmission to {address} failed: {source:#}")
            }
            Self::Refused { address } => write!(f, "{address} refused the transmission"),
            Self::BindConflict { address, source } => {
                write!(f, "can't listen on {address}: {source}")
            }
            Self::Closed => write!(f, "channel closed"),
            Self::LocalFile { name, source } => {
                write!(f, "can't read {name:?} for sending: {source:#}")
            }
        }
    }
}

impl Error for ChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unreachable { source, .. } | Self::BindConflict { source, .. } => Some(source),
            Self::Transmit { source, .. } | Self::LocalFile { source, .. } => Some(&**source),
            Self::Refused { .. } | Self::Closed => None,
        }
    }
}
