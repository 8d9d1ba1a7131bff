use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the remote end should fit an image into the requested dimensions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Leave the decision to the server.
    #[default]
    Default,
    /// Crop the image to fill the requested dimensions.
    Crop,
    /// Pad the image to fit the requested dimensions.
    Pad,
    /// Scale the image, possibly changing its aspect ratio.
    Scale,
}

impl ResizeMode {
    pub fn is_default(self) -> bool {
        self == Self::Default
    }

    /// The name of the mode as it appears in request keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Crop => "Crop",
            Self::Pad => "Pad",
            Self::Scale => "Scale",
        }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resize mode `{0}`, expected one of: default, crop, pad, scale")]
pub struct UnknownResizeMode(String);

impl FromStr for ResizeMode {
    type Err = UnknownResizeMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "crop" => Ok(Self::Crop),
            "pad" => Ok(Self::Pad),
            "scale" => Ok(Self::Scale),
            _ => Err(UnknownResizeMode(s.to_owned())),
        }
    }
}

/// Options that select a particular rendition of a remote image.
///
/// Two requests for the same url with different options are different images as far as caching
/// and request deduplication are concerned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resize_mode: ResizeMode,
}

impl ImageOptions {
    /// No size constraints and the default resize mode.
    pub const EMPTY: Self = Self {
        width: None,
        height: None,
        resize_mode: ResizeMode::Default,
    };

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_resize_mode(mut self, resize_mode: ResizeMode) -> Self {
        self.resize_mode = resize_mode;
        self
    }

    /// The options as `(name, value)` pairs, skipping unset values.
    ///
    /// The order and naming matches the segments of a [`RequestKey`](crate::caching::RequestKey).
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(width) = self.width {
            pairs.push(("w", width.to_string()));
        }
        if let Some(height) = self.height {
            pairs.push(("h", height.to_string()));
        }
        if !self.resize_mode.is_default() {
            pairs.push(("mode", self.resize_mode.as_str().to_ascii_lowercase()));
        }
        pairs
    }
}
