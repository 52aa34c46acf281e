//! The camera's settings document.
//!
//! The camera owns its configuration; this side keeps a mirror of the last
//! document the camera acknowledged. A document maps parameter names to one
//! of a few parameter kinds:
//!
//! | Kind | Wire shape | Example |
//! |------|------------|---------|
//! | [`Parameter::Toggle`] | `true` | `servos.enable` |
//! | [`Parameter::Scalar`] | `{"min", "max", "value"}` | `brightness` |
//! | [`Parameter::Resolution`] | `{"selected": [w, h], "available": ["WxH", ...]}` | `resolution` |
//! | [`Parameter::Enumerated`] | `{"selected", "available": [...]}` | `awb_mode`, `iso` |
//! | [`Parameter::Group`] | nested object | `servos` |
//!
//! Nested parameters are addressed with dotted paths (`servos.pan`).
//!
//! ## Validation
//!
//! Writes through [`SettingsDocument::assign`] and the `set_*` methods check
//! the parameter exists and has the right kind, but they do NOT check the
//! value against its domain. The camera validates on
//! [`update_settings`](crate::CameraSession::update_settings) and answers
//! with its authoritative document, which replaces the local one.
//! [`SettingsDocument::validate`] is available to callers that want to look
//! before they send.

mod defaults;
pub mod resolution;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};
pub use resolution::Resolution;

/// One entry of an enumerated parameter: the camera uses text for modes and
/// integers for ISO.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Choice {
    Number(i64),
    Text(String),
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Choice {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Choice {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Choice {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// Keys the camera sends that this side does not model, such as a `step`.
/// They are kept so a resubmitted document carries them back unchanged.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// A numeric setting with an inclusive range.
///
/// Whole numbers go back on the wire as integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedScalar {
    #[serde(serialize_with = "whole_as_integer")]
    pub min: f64,
    #[serde(serialize_with = "whole_as_integer")]
    pub max: f64,
    #[serde(serialize_with = "whole_as_integer")]
    pub value: f64,
    #[serde(flatten)]
    pub extra: Extra,
}

impl BoundedScalar {
    pub fn new(min: f64, max: f64, value: f64) -> Self {
        Self {
            min,
            max,
            value,
            extra: Extra::new(),
        }
    }

    pub fn in_range(&self) -> bool {
        self.min <= self.value && self.value <= self.max
    }
}

fn whole_as_integer<S: serde::Serializer>(n: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serializer.serialize_i64(*n as i64)
    } else {
        serializer.serialize_f64(*n)
    }
}

/// A pick from a fixed list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enumerated {
    pub selected: Choice,
    pub available: Vec<Choice>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A pick from the sensor's supported output sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionChoice {
    pub selected: Resolution,
    #[serde(serialize_with = "resolution::as_text::serialize")]
    pub available: Vec<Resolution>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A single setting, or a group of them.
///
/// Deserialization tries the variants in declaration order, so the
/// resolution shape (whose `selected` is a pair) is matched before the
/// generic enumerated shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameter {
    Toggle(bool),
    Scalar(BoundedScalar),
    Resolution(ResolutionChoice),
    Enumerated(Enumerated),
    Group(BTreeMap<String, Parameter>),
}

impl Parameter {
    /// Short human-readable name of the kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Toggle(_) => "toggle",
            Self::Scalar(_) => "scalar",
            Self::Resolution(_) => "resolution",
            Self::Enumerated(_) => "choice",
            Self::Group(_) => "group",
        }
    }

    /// Current value rendered for display.
    pub fn current(&self) -> Option<String> {
        match self {
            Self::Toggle(on) => Some(on.to_string()),
            Self::Scalar(s) => Some(s.value.to_string()),
            Self::Resolution(r) => Some(r.selected.to_string()),
            Self::Enumerated(e) => Some(e.selected.to_string()),
            Self::Group(_) => None,
        }
    }
}

/// A current value that lies outside its declared domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainViolation {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for DomainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Parameter name to parameter, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument {
    parameters: BTreeMap<String, Parameter>,
}

impl SettingsDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// The document a freshly booted camera reports.
    pub fn picam_defaults() -> Self {
        defaults::picam()
    }

    pub fn insert(&mut self, name: &str, parameter: Parameter) -> Option<Parameter> {
        self.parameters.insert(name.to_string(), parameter)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Top-level parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every non-group parameter with its dotted path, depth first.
    pub fn leaves(&self) -> Vec<(String, &Parameter)> {
        fn walk<'a>(prefix: &str, map: &'a BTreeMap<String, Parameter>, out: &mut Vec<(String, &'a Parameter)>) {
            for (name, param) in map {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                match param {
                    Parameter::Group(children) => walk(&path, children, out),
                    leaf => out.push((path, leaf)),
                }
            }
        }

        let mut out = Vec::new();
        walk("", &self.parameters, &mut out);
        out
    }

    /// Look up a parameter by dotted path.
    pub fn get(&self, path: &str) -> Option<&Parameter> {
        let mut segments = path.split('.');
        let mut current = self.parameters.get(segments.next()?)?;
        for segment in segments {
            match current {
                Parameter::Group(children) => current = children.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Parameter> {
        let mut segments = path.split('.');
        let mut current = self.parameters.get_mut(segments.next()?)?;
        for segment in segments {
            current = match current {
                Parameter::Group(children) => children.get_mut(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn lookup_mut(&mut self, path: &str) -> Result<&mut Parameter> {
        self.get_mut(path)
            .ok_or_else(|| CameraError::UnknownParameter(path.to_string()))
    }

    /// Write the desired value of a scalar. The range is not enforced.
    pub fn set_value(&mut self, path: &str, value: impl Into<f64>) -> Result<()> {
        match self.lookup_mut(path)? {
            Parameter::Scalar(s) => {
                s.value = value.into();
                Ok(())
            }
            _ => Err(kind_error(path, "scalar")),
        }
    }

    /// Select an enumerated choice. Membership in `available` is not enforced.
    pub fn select(&mut self, path: &str, choice: impl Into<Choice>) -> Result<()> {
        match self.lookup_mut(path)? {
            Parameter::Enumerated(e) => {
                e.selected = choice.into();
                Ok(())
            }
            _ => Err(kind_error(path, "choice")),
        }
    }

    pub fn select_resolution(&mut self, path: &str, resolution: Resolution) -> Result<()> {
        match self.lookup_mut(path)? {
            Parameter::Resolution(r) => {
                r.selected = resolution;
                Ok(())
            }
            _ => Err(kind_error(path, "resolution")),
        }
    }

    pub fn set_toggle(&mut self, path: &str, on: bool) -> Result<()> {
        match self.lookup_mut(path)? {
            Parameter::Toggle(t) => {
                *t = on;
                Ok(())
            }
            _ => Err(kind_error(path, "toggle")),
        }
    }

    /// Parse `raw` according to the parameter's kind and write it.
    ///
    /// ```
    /// use picam::settings::{Parameter, SettingsDocument};
    ///
    /// let mut doc = SettingsDocument::picam_defaults();
    /// doc.assign("servos.pan", "120").unwrap();
    /// doc.assign("resolution", "1280x720").unwrap();
    /// doc.assign("iso", "400").unwrap();
    /// assert_eq!(doc.get("servos.pan").and_then(Parameter::current).as_deref(), Some("120"));
    /// assert!(doc.assign("servos", "1").is_err());
    /// ```
    pub fn assign(&mut self, path: &str, raw: &str) -> Result<()> {
        let invalid = || CameraError::InvalidValue {
            name: path.to_string(),
            value: raw.to_string(),
        };
        let raw_trimmed = raw.trim();

        match self.lookup_mut(path)? {
            Parameter::Toggle(t) => *t = parse_bool(raw_trimmed).ok_or_else(invalid)?,
            Parameter::Scalar(s) => {
                s.value = raw_trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(invalid)?
            }
            Parameter::Resolution(r) => {
                r.selected = Resolution::parse(raw_trimmed).ok_or_else(invalid)?
            }
            Parameter::Enumerated(e) => {
                let numeric = matches!(e.selected, Choice::Number(_))
                    || e.available.iter().any(|c| matches!(c, Choice::Number(_)));
                e.selected = if numeric {
                    Choice::Number(raw_trimmed.parse().map_err(|_| invalid())?)
                } else {
                    Choice::Text(raw_trimmed.to_string())
                };
            }
            Parameter::Group(_) => return Err(kind_error(path, "settable parameter")),
        }
        Ok(())
    }

    /// Every parameter whose current value lies outside its declared domain.
    pub fn validate(&self) -> Vec<DomainViolation> {
        self.leaves()
            .into_iter()
            .filter_map(|(path, param)| {
                let reason = match param {
                    Parameter::Scalar(s) if !s.in_range() => {
                        format!("{} outside [{}, {}]", s.value, s.min, s.max)
                    }
                    Parameter::Enumerated(e) if !e.available.contains(&e.selected) => {
                        format!("{} is not an available choice", e.selected)
                    }
                    Parameter::Resolution(r) if !r.available.contains(&r.selected) => {
                        format!("{} is not an available resolution", r.selected)
                    }
                    _ => return None,
                };
                Some(DomainViolation { path, reason })
            })
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

fn kind_error(path: &str, expected: &'static str) -> CameraError {
    CameraError::ParameterKind {
        name: path.to_string(),
        expected,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Shared mirror of the camera's settings.
///
/// Cloning yields another handle to the same document, so the consumer can
/// read and edit settings while the capture thread owns the session. Backed
/// by `parking_lot::RwLock`; reads for menu population are frequent, writes
/// are rare.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    document: Arc<RwLock<SettingsDocument>>,
}

impl SettingsStore {
    pub fn new(document: SettingsDocument) -> Self {
        Self {
            document: Arc::new(RwLock::new(document)),
        }
    }

    /// A copy of the whole document.
    pub fn snapshot(&self) -> SettingsDocument {
        self.document.read().clone()
    }

    /// Run `f` against the document without copying it.
    pub fn read<R>(&self, f: impl FnOnce(&SettingsDocument) -> R) -> R {
        f(&self.document.read())
    }

    /// Edit the local draft. The change only reaches the camera on the next
    /// `update_settings`.
    pub fn edit<R>(&self, f: impl FnOnce(&mut SettingsDocument) -> R) -> R {
        f(&mut self.document.write())
    }

    /// Shorthand for [`SettingsDocument::assign`] on the shared document.
    pub fn assign(&self, path: &str, raw: &str) -> Result<()> {
        self.edit(|doc| doc.assign(path, raw))
    }

    /// Replace the whole document with one the camera sent.
    pub fn replace(&self, document: SettingsDocument) {
        let violations = document.validate();
        if !violations.is_empty() {
            tracing::warn!(
                count = violations.len(),
                first = %violations[0],
                "camera sent settings outside their declared domain"
            );
        }
        tracing::debug!(parameters = document.len(), "settings replaced from camera");
        *self.document.write() = document;
    }
}
