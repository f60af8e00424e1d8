use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};

/// Stack of linear layers with relu in between.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    activate_last: bool,
}

impl Mlp {
    /// Returns the network and the width of its output. With no layers the network is the
    /// identity and the output width is `input_dim`.
    pub fn build(
        input_dim: usize,
        layers: &[usize],
        activate_last: bool,
        vb: &VarBuilder,
        prefix: &str,
    ) -> Result<(Self, usize)> {
        let mut last_dim = input_dim;
        let mut built = Vec::with_capacity(layers.len());
        for (layer_idx, layer_size) in layers.iter().enumerate() {
            built.push(linear(last_dim, *layer_size, vb.pp(format!("{prefix}{layer_idx}")))?);
            last_dim = *layer_size;
        }
        Ok((
            Self {
                layers: built,
                activate_last,
            },
            last_dim,
        ))
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        let num_layers = self.layers.len();
        for (layer_idx, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if self.activate_last || layer_idx + 1 < num_layers {
                xs = xs.relu()?;
            }
        }
        Ok(xs)
    }
}
