use crate::error::{Result, SpiralError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An RGB image stored row major, three bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != width * height * 3 {
            return Err(SpiralError::InvalidConfig(format!(
                "image of {width}x{height} needs {} bytes, got {}",
                width * height * 3,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: usize, height: usize, color: [u8; 3]) -> Self {
        let pixels = color.iter().copied().cycle().take(width * height * 3).collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width + x) * 3;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, rgb: [u8; 3]) {
        let idx = (y * self.width + x) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&rgb);
    }
}

/// What the environment reports after every reset and step.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub image: Image,
    /// Last committed pen position, normalized by the canvas size.
    pub position: [f32; 2],
}

/// A single stroke command.
///
/// Values are always inside their domains: constructing an action clamps finite values and
/// rejects everything else, deserialization included. `prob == 0` means the pen is lifted
/// while moving, whatever the pressure says.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction")]
pub struct Action {
    position: [f32; 2],
    pressure: f32,
    color: [f32; 3],
    prob: u8,
}

#[derive(Deserialize)]
struct RawAction {
    position: [f32; 2],
    pressure: f32,
    color: [f32; 3],
    prob: u8,
}

impl TryFrom<RawAction> for Action {
    type Error = SpiralError;

    fn try_from(raw: RawAction) -> Result<Self> {
        Action::new(raw.position, raw.pressure, raw.color, raw.prob)
    }
}

fn clamp_unit(name: &str, value: f32) -> Result<f32> {
    if !value.is_finite() {
        return Err(SpiralError::InvalidAction(format!(
            "{name} must be finite, got {value}"
        )));
    }
    Ok(value.clamp(0., 1.))
}

impl Action {
    pub fn new(position: [f32; 2], pressure: f32, color: [f32; 3], prob: u8) -> Result<Self> {
        if prob > 1 {
            return Err(SpiralError::InvalidAction(format!(
                "prob must be 0 or 1, got {prob}"
            )));
        }
        Ok(Self {
            position: [
                clamp_unit("position.x", position[0])?,
                clamp_unit("position.y", position[1])?,
            ],
            pressure: clamp_unit("pressure", pressure)?,
            color: [
                clamp_unit("color.r", color[0])?,
                clamp_unit("color.g", color[1])?,
                clamp_unit("color.b", color[2])?,
            ],
            prob,
        })
    }

    /// Moves the pen without drawing.
    pub fn pen_up(position: [f32; 2]) -> Result<Self> {
        Self::new(position, 0., [0., 0., 0.], 0)
    }

    pub fn position(&self) -> [f32; 2] {
        self.position
    }

    pub fn pressure(&self) -> f32 {
        self.pressure
    }

    pub fn color(&self) -> [f32; 3] {
        self.color
    }

    pub fn prob(&self) -> u8 {
        self.prob
    }

    pub fn draws(&self) -> bool {
        self.prob == 1
    }

    /// Pressure the canvas should apply, zero for pen-up moves.
    pub fn effective_pressure(&self) -> f32 {
        if self.draws() { self.pressure } else { 0. }
    }
}

pub type Info = BTreeMap<String, f32>;

pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f32,
    pub done: bool,
    pub info: Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Human,
    RgbArray,
}

/// The paint environment contract.
pub trait Env {
    fn reset(&mut self) -> Result<Observation>;
    fn step(&mut self, action: &Action) -> Result<StepOutcome>;
    /// `RgbArray` returns the current canvas, `Human` displays it and returns nothing.
    fn render(&mut self, mode: RenderMode) -> Result<Option<Image>>;
    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_is_clamped_into_domain() -> Result<()> {
        let action = Action::new([1.5, -0.2], 3., [0.5, 2., -1.], 1)?;
        assert_eq!(action.position(), [1., 0.]);
        assert_eq!(action.pressure(), 1.);
        assert_eq!(action.color(), [0.5, 1., 0.]);
        Ok(())
    }

    #[test]
    fn malformed_actions_are_rejected() {
        assert!(Action::new([f32::NAN, 0.], 0.5, [0., 0., 0.], 1).is_err());
        assert!(Action::new([0., 0.], f32::INFINITY, [0., 0., 0.], 1).is_err());
        assert!(Action::new([0., 0.], 0.5, [0., 0., 0.], 2).is_err());
    }

    #[test]
    fn pen_up_ignores_pressure() -> Result<()> {
        let action = Action::new([0.2, 0.2], 0.9, [1., 0., 0.], 0)?;
        assert_eq!(action.effective_pressure(), 0.);
        Ok(())
    }

    #[test]
    fn deserialized_actions_go_through_the_same_checks() -> Result<()> {
        let action: Action = serde_json::from_str(
            r#"{"position": [5.0, -3.0], "pressure": 9.0, "color": [0.2, 0.4, 0.6], "prob": 1}"#,
        )?;
        assert_eq!(action.position(), [1., 0.]);
        assert_eq!(action.pressure(), 1.);
        assert!(
            serde_json::from_str::<Action>(
                r#"{"position": [0.5, 0.5], "pressure": 0.5, "color": [0, 0, 0], "prob": 7}"#
            )
            .is_err()
        );
        Ok(())
    }

    #[test]
    fn image_size_is_validated() {
        assert!(Image::new(2, 2, vec![0; 11]).is_err());
        let mut image = Image::filled(2, 2, [255, 255, 255]);
        image.set_pixel(1, 0, [1, 2, 3]);
        assert_eq!(image.pixel(1, 0), [1, 2, 3]);
        assert_eq!(image.pixel(0, 1), [255, 255, 255]);
    }
}
