use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A sensor output size in pixels.
///
/// ## Wire format
///
/// The camera writes the selected resolution as a `[width, height]` pair and
/// the list of available resolutions as `"WxH"` strings:
///
/// ```text
/// "resolution": {
///   "selected": [720, 480],
///   "available": ["128x96", "160x120", ...]
/// }
/// ```
///
/// Deserialization accepts either form in either position. Serialization
/// writes a pair; lists go through [`as_text`] to keep the string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WxH` string.
    ///
    /// ## Examples
    ///
    /// ```
    /// use picam::settings::Resolution;
    ///
    /// let r = Resolution::parse("1280x720").unwrap();
    /// assert_eq!((r.width, r.height), (1280, 720));
    ///
    /// assert!(Resolution::parse("1280").is_none());
    /// assert!(Resolution::parse("x720").is_none());
    /// ```
    pub fn parse(text: &str) -> Option<Self> {
        let (w, h) = text.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse().ok()?;
        let height = h.trim().parse().ok()?;
        Some(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("expected WxH, got {s:?}"))
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.width, self.height).serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResolutionRepr {
    Pair(u32, u32),
    Text(String),
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ResolutionRepr::deserialize(deserializer)? {
            ResolutionRepr::Pair(width, height) => Ok(Self { width, height }),
            ResolutionRepr::Text(text) => Self::parse(&text)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid resolution {text:?}"))),
        }
    }
}

/// Serialize a list of resolutions as `"WxH"` strings.
pub mod as_text {
    use super::Resolution;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(list: &[Resolution], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(list.iter().map(ToString::to_string))
    }
}
