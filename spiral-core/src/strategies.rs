//! Pluggable behaviour injected into the agent at construction.
//!
//! Each hook is a small strategy trait. Plain closures with the matching signature implement
//! the traits too, so callers can pass functions directly.

use crate::{
    dataset::Sample,
    env::{Action, Image, Observation},
    error::{Result, SpiralError},
    policies::ActionSample,
};
use candle_core::{Device, Tensor};
use std::sync::Arc;

/// Turns a canvas or target image into the flat input of the networks.
pub trait PreprocessImage: Send + Sync {
    fn preprocess(&self, image: &Image, device: &Device) -> Result<Tensor>;
}

/// Turns an environment observation into the flat policy input (without the condition).
pub trait PreprocessObs: Send + Sync {
    fn preprocess(
        &self,
        observation: &Observation,
        images: &dyn PreprocessImage,
        device: &Device,
    ) -> Result<Tensor>;
}

/// Maps the generator's discrete sample onto the structured action the environment expects.
pub trait PackAction: Send + Sync {
    fn pack(&self, sample: &ActionSample) -> Result<Action>;
}

/// Dense, task specific shaping reward for the observation reached at `timestep`.
pub trait AuxiliaryReward: Send + Sync {
    fn reward(
        &self,
        timestep: usize,
        observation: &Observation,
        condition: Option<&Sample>,
    ) -> Result<f32>;
}

impl<F> PreprocessImage for F
where
    F: Fn(&Image, &Device) -> Result<Tensor> + Send + Sync,
{
    fn preprocess(&self, image: &Image, device: &Device) -> Result<Tensor> {
        self(image, device)
    }
}

impl<F> PreprocessObs for F
where
    F: Fn(&Observation, &dyn PreprocessImage, &Device) -> Result<Tensor> + Send + Sync,
{
    fn preprocess(
        &self,
        observation: &Observation,
        images: &dyn PreprocessImage,
        device: &Device,
    ) -> Result<Tensor> {
        self(observation, images, device)
    }
}

impl<F> PackAction for F
where
    F: Fn(&ActionSample) -> Result<Action> + Send + Sync,
{
    fn pack(&self, sample: &ActionSample) -> Result<Action> {
        self(sample)
    }
}

impl<F> AuxiliaryReward for F
where
    F: Fn(usize, &Observation, Option<&Sample>) -> Result<f32> + Send + Sync,
{
    fn reward(
        &self,
        timestep: usize,
        observation: &Observation,
        condition: Option<&Sample>,
    ) -> Result<f32> {
        self(timestep, observation, condition)
    }
}

/// Scales bytes to `[0, 1]` and flattens the image in HWC order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleToUnit;

impl PreprocessImage for ScaleToUnit {
    fn preprocess(&self, image: &Image, device: &Device) -> Result<Tensor> {
        let data: Vec<f32> = image.pixels().iter().map(|p| *p as f32 / 255.).collect();
        Ok(Tensor::from_vec(data, image.pixels().len(), device)?)
    }
}

/// Preprocessed image followed by the two pen coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageWithPosition;

impl PreprocessObs for ImageWithPosition {
    fn preprocess(
        &self,
        observation: &Observation,
        images: &dyn PreprocessImage,
        device: &Device,
    ) -> Result<Tensor> {
        let image = images.preprocess(&observation.image, device)?;
        let position = Tensor::new(&observation.position, device)?;
        Ok(Tensor::cat(&[&image, &position], 0)?)
    }
}

/// Interprets samples on an `imsize x imsize` grid: the pen goes to the centre of the chosen
/// cell, pressure levels are spread evenly over `(0, 1]` and colours come from a palette.
#[derive(Debug, Clone)]
pub struct GridActionPacker {
    pub imsize: usize,
    pub pressure_levels: usize,
    pub palette: Vec<[f32; 3]>,
}

impl PackAction for GridActionPacker {
    fn pack(&self, sample: &ActionSample) -> Result<Action> {
        let cells = self.imsize * self.imsize;
        if sample.position >= cells {
            return Err(SpiralError::InvalidAction(format!(
                "position cell {} outside a {cells} cell grid",
                sample.position
            )));
        }
        if sample.pressure >= self.pressure_levels {
            return Err(SpiralError::InvalidAction(format!(
                "pressure level {} outside {} levels",
                sample.pressure, self.pressure_levels
            )));
        }
        let color = *self.palette.get(sample.color).ok_or_else(|| {
            SpiralError::InvalidAction(format!(
                "colour {} outside a palette of {}",
                sample.color,
                self.palette.len()
            ))
        })?;
        let size = self.imsize as f32;
        let x = (sample.position % self.imsize) as f32;
        let y = (sample.position / self.imsize) as f32;
        let pressure = (sample.pressure + 1) as f32 / self.pressure_levels as f32;
        let prob = u8::try_from(sample.prob)
            .map_err(|_| SpiralError::InvalidAction(format!("prob {}", sample.prob)))?;
        Action::new([(x + 0.5) / size, (y + 0.5) / size], pressure, color, prob)
    }
}

/// Negative mean squared pixel distance between the canvas and the conditioning target.
/// Yields zero when there is no target to compare against.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetSimilarity;

impl AuxiliaryReward for TargetSimilarity {
    fn reward(
        &self,
        _timestep: usize,
        observation: &Observation,
        condition: Option<&Sample>,
    ) -> Result<f32> {
        let Some(sample) = condition else {
            return Ok(0.);
        };
        let canvas = observation.image.pixels();
        let target = sample.target.pixels();
        if canvas.len() != target.len() {
            return Err(SpiralError::Dataset(format!(
                "target has {} bytes but the canvas has {}",
                target.len(),
                canvas.len()
            )));
        }
        let mse = canvas
            .iter()
            .zip(target)
            .map(|(c, t)| (*c as f32 / 255. - *t as f32 / 255.).powi(2))
            .sum::<f32>()
            / canvas.len() as f32;
        Ok(-mse)
    }
}

#[derive(Clone)]
pub struct Strategies {
    pub preprocess_image: Arc<dyn PreprocessImage>,
    pub preprocess_obs: Arc<dyn PreprocessObs>,
    pub pack_action: Arc<dyn PackAction>,
    pub auxiliary_reward: Option<Arc<dyn AuxiliaryReward>>,
}

impl Strategies {
    /// Default preprocessing, the given packer and no auxiliary reward.
    pub fn new(pack_action: impl PackAction + 'static) -> Self {
        Self {
            preprocess_image: Arc::new(ScaleToUnit),
            preprocess_obs: Arc::new(ImageWithPosition),
            pack_action: Arc::new(pack_action),
            auxiliary_reward: None,
        }
    }

    pub fn with_preprocess_image(mut self, f: impl PreprocessImage + 'static) -> Self {
        self.preprocess_image = Arc::new(f);
        self
    }

    pub fn with_preprocess_obs(mut self, f: impl PreprocessObs + 'static) -> Self {
        self.preprocess_obs = Arc::new(f);
        self
    }

    pub fn with_auxiliary_reward(mut self, f: impl AuxiliaryReward + 'static) -> Self {
        self.auxiliary_reward = Some(Arc::new(f));
        self
    }

    pub fn observation_input(&self, observation: &Observation, device: &Device) -> Result<Tensor> {
        self.preprocess_obs
            .preprocess(observation, self.preprocess_image.as_ref(), device)
    }

    pub fn image_input(&self, image: &Image, device: &Device) -> Result<Tensor> {
        self.preprocess_image.preprocess(image, device)
    }
}
