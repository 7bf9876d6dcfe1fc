use frame_bus::BusError;
use resize_proto::ProtoError;
use thiserror::Error;

use crate::document::FrameId;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("malformed {attribute} options on frame {frame}: {source}")]
    MalformedOptions {
        frame: FrameId,
        attribute: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame bus error: {0}")]
    Bus(#[from] BusError),
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
}

pub type ResizeResult<T> = Result<T, ResizeError>;
