use image::RgbImage;
use spiral_core::{Result, SpiralError, env::Image};
use std::{fs, path::PathBuf};
use tracing::debug;

/// Display state of one environment. `Human` rendering logs the canvas and, when a frame
/// directory is set, writes it as a numbered PNG.
#[derive(Debug, Default)]
pub struct Viewer {
    frame_dir: Option<PathBuf>,
    frames: usize,
    open: bool,
}

impl Viewer {
    pub fn with_frame_dir(frame_dir: impl Into<PathBuf>) -> Self {
        Self {
            frame_dir: Some(frame_dir.into()),
            ..Default::default()
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn show(&mut self, canvas: &Image) -> Result<()> {
        if !self.open {
            if let Some(dir) = &self.frame_dir {
                fs::create_dir_all(dir).map_err(|err| SpiralError::io(dir, err))?;
            }
            self.open = true;
        }
        debug!(
            frame = self.frames,
            width = canvas.width(),
            height = canvas.height(),
            "render"
        );
        if let Some(dir) = &self.frame_dir {
            let path = dir.join(format!("frame_{:05}.png", self.frames));
            let frame = RgbImage::from_raw(
                canvas.width() as u32,
                canvas.height() as u32,
                canvas.pixels().to_vec(),
            )
            .ok_or_else(|| SpiralError::InvalidConfig("canvas does not fit an RGB frame".into()))?;
            frame
                .save(&path)
                .map_err(|err| SpiralError::io(&path, std::io::Error::other(err)))?;
        }
        self.frames += 1;
        Ok(())
    }

    pub fn close(&mut self) {
        if self.open {
            debug!(frames = self.frames, "viewer closed");
        }
        self.open = false;
    }
}
