use thiserror::Error;

/// Errors produced while decoding wire formats. Decoders never panic on
/// hostile input; anything that does not parse comes back as one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("not enough bytes")]
    Truncated,

    #[error("embedded length does not match the buffer")]
    LengthMismatch,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid {0} field")]
    InvalidField(&'static str),
}

macro_rules! ensure_remaining {
    ($buf:expr, $len:expr) => {
        if $buf.remaining() < $len {
            return Err(crate::types::WireError::Truncated);
        }
    };
}
pub(crate) use ensure_remaining;

mod aarp;
mod addr;
mod ddp;
mod elap;
mod llap;
mod nbp;
mod rtmp;
mod zip;
mod zone;

pub use aarp::*;
pub use addr::*;
pub use ddp::*;
pub use elap::*;
pub use llap::*;
pub use nbp::*;
pub use rtmp::*;
pub use zip::*;
pub use zone::*;
