use thiserror::Error;

use crate::link::LinkError;
use crate::types::WireError;

/// Why a datagram was dropped instead of delivered or forwarded. These are
/// never propagated out of inbound dispatch; they feed the drop counters.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("malformed datagram: {0}")]
    MalformedDatagram(WireError),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("no route to network {0}")]
    NoRoute(u16),

    #[error("hop limit exceeded")]
    HopLimitExceeded,

    #[error("link transmit failed: {0}")]
    LinkTransmitFailed(#[from] LinkError),
}

impl From<WireError> for DeliveryError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::ChecksumMismatch => Self::ChecksumMismatch,
            other => Self::MalformedDatagram(other),
        }
    }
}
