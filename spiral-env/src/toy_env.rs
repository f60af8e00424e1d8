//! A tiny square canvas honouring the paint environment contract.
//!
//! The pen starts in the top-left corner. A drawing action paints a straight line from the pen
//! to the target pixel, blending the colour in proportion to the pressure; a pen-up action
//! only moves the pen.

use crate::{brush::BrushInfo, viewer::Viewer};
use spiral_core::{
    Result, SpiralError,
    env::{Action, Env, Image, Info, Observation, RenderMode, StepOutcome},
};
use tracing::debug;

const BACKGROUND: [u8; 3] = [255, 255, 255];

pub struct ToyEnv {
    imsize: usize,
    brush: BrushInfo,
    canvas: Image,
    /// Committed pen position, normalized.
    position: [f32; 2],
    episode_limit: Option<usize>,
    steps: usize,
    viewer: Viewer,
    closed: bool,
}

impl ToyEnv {
    pub fn new(imsize: usize) -> Result<Self> {
        Self::with_brush(imsize, BrushInfo::default())
    }

    pub fn with_brush(imsize: usize, brush: BrushInfo) -> Result<Self> {
        if imsize == 0 {
            return Err(SpiralError::InvalidConfig("canvas size must be positive".into()));
        }
        brush.validate()?;
        Ok(Self {
            imsize,
            brush,
            canvas: Image::filled(imsize, imsize, BACKGROUND),
            position: [0., 0.],
            episode_limit: None,
            steps: 0,
            viewer: Viewer::default(),
            closed: false,
        })
    }

    /// Reports `done` after `limit` steps.
    pub fn with_episode_limit(mut self, limit: usize) -> Self {
        self.episode_limit = Some(limit);
        self
    }

    pub fn with_viewer(mut self, viewer: Viewer) -> Self {
        self.viewer = viewer;
        self
    }

    pub fn imsize(&self) -> usize {
        self.imsize
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    fn to_pixel(&self, position: [f32; 2]) -> (usize, usize) {
        let scale = |v: f32| ((v * self.imsize as f32) as usize).min(self.imsize - 1);
        (scale(position[0]), scale(position[1]))
    }

    fn observation(&self) -> Observation {
        Observation {
            image: self.canvas.clone(),
            position: self.position,
        }
    }

    fn dab(&mut self, cx: usize, cy: usize, color: [f32; 3], alpha: f32) {
        let radius = self.brush.radius as isize;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let (x, y) = (cx as isize + dx, cy as isize + dy);
                if x < 0 || y < 0 || x >= self.imsize as isize || y >= self.imsize as isize {
                    continue;
                }
                let (x, y) = (x as usize, y as usize);
                let old = self.canvas.pixel(x, y);
                let mut new = [0u8; 3];
                for c in 0..3 {
                    let blended = old[c] as f32 * (1. - alpha) + color[c] * 255. * alpha;
                    new[c] = blended.round().clamp(0., 255.) as u8;
                }
                self.canvas.set_pixel(x, y, new);
            }
        }
    }

    /// Bresenham line between two pixels, both ends included. Returns the pixels visited.
    fn stroke(&mut self, from: (usize, usize), to: (usize, usize), color: [f32; 3], alpha: f32) -> usize {
        let (mut x, mut y) = (from.0 as isize, from.1 as isize);
        let (x1, y1) = (to.0 as isize, to.1 as isize);
        let dx = (x1 - x).abs();
        let dy = -(y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let mut visited = 0;
        loop {
            self.dab(x as usize, y as usize, color, alpha);
            visited += 1;
            if x == x1 && y == y1 {
                return visited;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SpiralError::InvalidConfig("environment is closed".into()));
        }
        Ok(())
    }
}

impl Env for ToyEnv {
    fn reset(&mut self) -> Result<Observation> {
        self.ensure_open()?;
        self.canvas = Image::filled(self.imsize, self.imsize, BACKGROUND);
        self.position = [0., 0.];
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        self.ensure_open()?;
        let from = self.to_pixel(self.position);
        let to = self.to_pixel(action.position());
        let mut info = Info::new();
        if action.draws() {
            let alpha = action.effective_pressure() * self.brush.opacity;
            let painted = self.stroke(from, to, action.color(), alpha);
            info.insert("painted_pixels".into(), painted as f32);
        }
        self.position = action.position();
        self.steps += 1;
        let done = self.episode_limit.is_some_and(|limit| self.steps >= limit);
        Ok(StepOutcome {
            observation: self.observation(),
            reward: 0.,
            done,
            info,
        })
    }

    fn render(&mut self, mode: RenderMode) -> Result<Option<Image>> {
        self.ensure_open()?;
        match mode {
            RenderMode::RgbArray => Ok(Some(self.canvas.clone())),
            RenderMode::Human => {
                self.viewer.show(&self.canvas)?;
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.viewer.close();
            self.closed = true;
            debug!(steps = self.steps, "toy environment closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pressure_black_line_covers_the_diagonal() -> Result<()> {
        let mut env = ToyEnv::new(3)?;
        env.reset()?;
        let outcome = env.step(&Action::new([0.9, 0.9], 1., [0., 0., 0.], 1)?)?;
        let canvas = &outcome.observation.image;
        for i in 0..3 {
            assert_eq!(canvas.pixel(i, i), [0, 0, 0]);
        }
        assert_eq!(canvas.pixel(2, 0), [255, 255, 255]);
        assert_eq!(outcome.observation.position, [0.9, 0.9]);
        assert_eq!(outcome.info.get("painted_pixels"), Some(&3.));
        Ok(())
    }

    #[test]
    fn pen_up_moves_without_painting() -> Result<()> {
        let mut env = ToyEnv::new(3)?;
        env.reset()?;
        let outcome = env.step(&Action::new([0.5, 0.5], 1., [0., 0., 0.], 0)?)?;
        assert!(outcome.observation.image.pixels().iter().all(|p| *p == 255));
        assert_eq!(outcome.observation.position, [0.5, 0.5]);
        Ok(())
    }

    #[test]
    fn pressure_blends_with_the_canvas() -> Result<()> {
        let mut env = ToyEnv::new(2)?;
        env.reset()?;
        let outcome = env.step(&Action::new([0., 0.], 0.5, [0., 0., 0.], 1)?)?;
        assert_eq!(outcome.observation.image.pixel(0, 0), [128, 128, 128]);
        Ok(())
    }

    #[test]
    fn episode_limit_ends_the_episode() -> Result<()> {
        let mut env = ToyEnv::new(2)?.with_episode_limit(2);
        env.reset()?;
        let pen_up = Action::pen_up([0., 0.])?;
        assert!(!env.step(&pen_up)?.done);
        assert!(env.step(&pen_up)?.done);
        Ok(())
    }

    #[test]
    fn closed_environment_refuses_work() -> Result<()> {
        let mut env = ToyEnv::new(2)?;
        env.close()?;
        assert!(env.reset().is_err());
        assert!(env.render(RenderMode::RgbArray).is_err());
        Ok(())
    }
}
