//! Viewer preferences file.
//!
//! ```json
//! {
//!   "camera": { "name": "picam", "port": 7896 },
//!   "gui": { "dark_mode": false }
//! }
//! ```
//!
//! Missing keys take their defaults. A missing file is created with
//! defaults on first run.

use std::fs;
use std::io;
use std::path::Path;

use picam::session::{DEFAULT_CAMERA_NAME, DEFAULT_STREAM_PORT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraPreferences {
    pub name: String,
    pub port: u16,
}

impl Default for CameraPreferences {
    fn default() -> Self {
        Self {
            name: DEFAULT_CAMERA_NAME.to_string(),
            port: DEFAULT_STREAM_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuiPreferences {
    pub dark_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub camera: CameraPreferences,
    pub gui: GuiPreferences,
}

impl Preferences {
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let prefs = Self::default();
                prefs.save(path)?;
                tracing::info!(path = %path.display(), "created default preferences");
                Ok(prefs)
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, json)
    }
}
