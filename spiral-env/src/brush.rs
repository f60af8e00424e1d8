use serde::{Deserialize, Serialize};
use spiral_core::{Result, SpiralError};
use std::{fs, path::Path};

/// Name of the environment variable pointing at the brush description.
pub const BRUSHINFO: &str = "BRUSHINFO";

/// How strokes are laid on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrushInfo {
    pub name: String,
    /// Stroke radius in pixels; 0 paints single pixels.
    #[serde(default)]
    pub radius: usize,
    /// Multiplies the action pressure.
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_opacity() -> f32 {
    1.
}

impl Default for BrushInfo {
    fn default() -> Self {
        Self {
            name: "pixel".into(),
            radius: 0,
            opacity: 1.,
        }
    }
}

impl BrushInfo {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| SpiralError::io(path, err))?;
        let brush: Self = serde_json::from_slice(&bytes)?;
        brush.validate()?;
        Ok(brush)
    }

    /// Resolves [`BRUSHINFO`] through `lookup` and loads the file it names. A missing variable
    /// is a configuration error, there is no fallback brush.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = lookup(BRUSHINFO)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| {
                SpiralError::MissingConfig(format!(
                    "{BRUSHINFO} must name a brush description file"
                ))
            })?;
        Self::load(path)
    }

    /// [`BrushInfo::from_lookup`] over the process environment.
    pub fn from_process_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0. ..=1.).contains(&self.opacity) {
            return Err(SpiralError::InvalidConfig(format!(
                "brush {} has opacity {} outside [0, 1]",
                self.name, self.opacity
            )));
        }
        Ok(())
    }
}
