//! Wire contract between an embedded document and the page hosting it.
//! Kept in its own crate so both sides (and non-Rust hosts) agree on one
//! definition of the size announcement.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Discriminator value carried by every size announcement.
pub const RESIZE_KIND: &str = "RESIZE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    #[serde(rename = "RESIZE")]
    Resize,
}

/// `{ "kind": "RESIZE", "width": <number>, "height": <number> }`
///
/// Encoded through serde; decoded by hand in [`SizeAnnouncement::decode`]
/// so the legacy `type` key and foreign traffic are told apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizeAnnouncement {
    pub kind: MessageKind,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("payload is not json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not an object")]
    NotAnObject,
    #[error("missing or foreign discriminator")]
    ForeignKind,
    #[error("invalid dimension {field}")]
    InvalidDimension { field: &'static str },
}

impl SizeAnnouncement {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            kind: MessageKind::Resize,
            width,
            height,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a payload seen on a shared transport. Any message that is not
    /// a well-formed size announcement yields an error the caller is expected
    /// to ignore.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_slice(payload)?;
        let object = value.as_object().ok_or(ProtoError::NotAnObject)?;

        let kind = object
            .get("kind")
            .or_else(|| object.get("type"))
            .and_then(Value::as_str);
        if kind != Some(RESIZE_KIND) {
            return Err(ProtoError::ForeignKind);
        }

        Ok(Self {
            kind: MessageKind::Resize,
            width: dimension(object.get("width"), "width")?,
            height: dimension(object.get("height"), "height")?,
        })
    }
}

fn dimension(value: Option<&Value>, field: &'static str) -> Result<f64, ProtoError> {
    value
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or(ProtoError::InvalidDimension { field })
}
