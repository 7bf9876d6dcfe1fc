use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MIN_WIDTH: f64 = 300.0;
pub const DEFAULT_MAX_WIDTH: f64 = 1200.0;
pub const DEFAULT_MIN_HEIGHT: f64 = 400.0;
pub const DEFAULT_MAX_HEIGHT: f64 = 2000.0;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Box dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f64,
    pub height: f64,
}

impl FrameSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn css_width(&self) -> String {
        format!("{}px", self.width)
    }

    pub fn css_height(&self) -> String {
        format!("{}px", self.height)
    }
}

/// Fully resolved constraints for one registration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeOptions {
    pub min_width: f64,
    pub max_width: f64,
    pub min_height: f64,
    pub max_height: f64,
    pub debounce: Duration,
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            min_width: DEFAULT_MIN_WIDTH,
            max_width: DEFAULT_MAX_WIDTH,
            min_height: DEFAULT_MIN_HEIGHT,
            max_height: DEFAULT_MAX_HEIGHT,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl ResizeOptions {
    /// Returns a copy with every field set in `patch` taking precedence.
    pub fn merged(&self, patch: &ResizeOptionsPatch) -> Self {
        Self {
            min_width: patch.min_width.unwrap_or(self.min_width),
            max_width: patch.max_width.unwrap_or(self.max_width),
            min_height: patch.min_height.unwrap_or(self.min_height),
            max_height: patch.max_height.unwrap_or(self.max_height),
            debounce: patch.debounce().unwrap_or(self.debounce),
        }
    }

    /// Clamps each dimension into its bounds. When a minimum exceeds its
    /// maximum the minimum wins.
    pub fn clamp(&self, size: FrameSize) -> FrameSize {
        FrameSize {
            width: size.width.min(self.max_width).max(self.min_width),
            height: size.height.min(self.max_height).max(self.min_height),
        }
    }
}

/// Partial options as supplied per call or declared on an element.
///
/// Deserializes from the camelCase object used in `data-iframe-resize`;
/// `resizeInterval` is accepted for `debounceMs`, which wins when both
/// are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeOptionsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<f64>,
    #[serde(
        default,
        alias = "resizeInterval",
        skip_serializing_if = "Option::is_none"
    )]
    pub debounce_ms: Option<f64>,
}

impl ResizeOptionsPatch {
    /// Parses a declarative attribute value. An empty value (a bare
    /// attribute) or `null` means "no overrides"; anything other than a JSON
    /// object is malformed.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<Value>(trimmed)? {
            Value::Null => Ok(Self::default()),
            Value::Object(mut fields) => {
                if fields.contains_key("debounceMs") {
                    fields.remove("resizeInterval");
                }
                serde_json::from_value(Value::Object(fields))
            }
            other => Err(serde_json::Error::custom(format!(
                "expected an options object, found {}",
                json_kind(&other)
            ))),
        }
    }

    fn debounce(&self) -> Option<Duration> {
        self.debounce_ms
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| Duration::from_micros((ms * 1000.0).round() as u64))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Controller-wide settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerConfig {
    /// Baseline every registration is merged over.
    pub defaults: ResizeOptions,
    /// Sender origins accepted by the controller. Empty accepts any origin;
    /// the sender context is still checked.
    pub allowed_origins: Vec<String>,
}

impl ControllerConfig {
    /// Builds controller defaults from overrides. Every field the patch sets,
    /// zero included, replaces the built-in default.
    pub fn with_overrides(patch: &ResizeOptionsPatch) -> Self {
        Self {
            defaults: ResizeOptions::default().merged(patch),
            allowed_origins: Vec::new(),
        }
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    pub fn accepts_origin(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == origin)
    }
}
