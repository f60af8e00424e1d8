use rand::Rng;
use spiral_core::{
    Result, SpiralError,
    dataset::{Dataset, Sample},
    env::Image,
    rng::with_rng,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// Targets made of a few black pixels on a white `imsize x imsize` canvas. A pattern lists the
/// row-major pixel indices to blacken; its condition is those indices scaled into `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ToyDataset {
    imsize: usize,
    train: Vec<Vec<usize>>,
    test: Vec<Vec<usize>>,
}

impl ToyDataset {
    pub fn new(imsize: usize, train: Vec<Vec<usize>>, test: Vec<Vec<usize>>) -> Result<Self> {
        if train.is_empty() {
            return Err(SpiralError::Dataset("no training patterns".into()));
        }
        let cells = imsize * imsize;
        let len = train[0].len();
        for pattern in train.iter().chain(&test) {
            if pattern.is_empty() || pattern.len() != len {
                return Err(SpiralError::Dataset(format!(
                    "every pattern needs {len} indices, got {pattern:?}"
                )));
            }
            if let Some(idx) = pattern.iter().find(|idx| **idx >= cells) {
                return Err(SpiralError::Dataset(format!(
                    "pixel {idx} outside a {imsize}x{imsize} canvas"
                )));
            }
        }
        Ok(Self { imsize, train, test })
    }

    pub fn imsize(&self) -> usize {
        self.imsize
    }

    pub fn patterns(&self, split: Split) -> &[Vec<usize>] {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    pub fn render(&self, pattern: &[usize]) -> Sample {
        let mut target = Image::filled(self.imsize, self.imsize, [255, 255, 255]);
        for idx in pattern {
            target.set_pixel(idx % self.imsize, idx / self.imsize, [0, 0, 0]);
        }
        let scale = (self.imsize * self.imsize).saturating_sub(1).max(1) as f32;
        Sample {
            condition: pattern.iter().map(|idx| *idx as f32 / scale).collect(),
            target,
        }
    }

    pub fn sample_split(&self, split: Split) -> Result<Sample> {
        let patterns = self.patterns(split);
        if patterns.is_empty() {
            return Err(SpiralError::Dataset(format!("{split:?} split is empty")));
        }
        let idx = with_rng(|rng| rng.random_range(0..patterns.len()));
        Ok(self.render(&patterns[idx]))
    }
}

impl Dataset for ToyDataset {
    fn sample(&self) -> Result<Sample> {
        self.sample_split(Split::Train)
    }

    fn condition_dim(&self) -> usize {
        self.train[0].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_becomes_black_pixels_and_scaled_condition() -> Result<()> {
        let dataset = ToyDataset::new(3, vec![vec![1, 4, 7]], vec![vec![1, 4, 7]])?;
        let sample = dataset.sample()?;
        assert_eq!(sample.condition, vec![0.125, 0.5, 0.875]);
        for (x, y) in [(1, 0), (1, 1), (1, 2)] {
            assert_eq!(sample.target.pixel(x, y), [0, 0, 0]);
        }
        assert_eq!(sample.target.pixel(0, 0), [255, 255, 255]);
        assert_eq!(dataset.condition_dim(), 3);
        Ok(())
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(ToyDataset::new(3, vec![], vec![]).is_err());
        assert!(ToyDataset::new(3, vec![vec![9]], vec![]).is_err());
        assert!(ToyDataset::new(3, vec![vec![1, 2]], vec![vec![3]]).is_err());
    }
}
