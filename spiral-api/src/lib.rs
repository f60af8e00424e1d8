// builders + higher level helpers
pub mod builders;

#[cfg(feature = "test-utils")]
pub mod test_utils;

use spiral_agents::Spiral;
use spiral_core::{
    Result, SpiralError,
    dataset::Sample,
    env::{Env, Image, Observation, RenderMode},
    strategies::{AuxiliaryReward, TargetSimilarity},
};

/// Plays one episode of `timestep_limit` actions with `agent` and returns the final canvas.
pub fn draw_episode<E: Env + ?Sized>(
    agent: &Spiral,
    env: &mut E,
    condition: Option<&Sample>,
) -> Result<Option<Image>> {
    let mut observation = env.reset()?;
    for _ in 0..agent.config().timestep_limit {
        let action = agent.act(&observation, condition)?;
        let outcome = env.step(&action)?;
        observation = outcome.observation;
        if outcome.done {
            break;
        }
    }
    env.render(RenderMode::RgbArray)
}

/// Draws one episode per sample and scores each final canvas against the sample's target with
/// [`TargetSimilarity`]; zero is a perfect copy. The condition is fed to the agent only when it
/// is conditional.
pub fn evaluate<E: Env + ?Sized>(agent: &Spiral, env: &mut E, samples: &[Sample]) -> Result<Vec<f32>> {
    samples
        .iter()
        .map(|sample| -> Result<f32> {
            let condition = agent.config().conditional.then_some(sample);
            let image = draw_episode(agent, env, condition)?.ok_or_else(|| {
                SpiralError::InvalidConfig("environment did not return a canvas".into())
            })?;
            let drawn = Observation {
                image,
                position: [0., 0.],
            };
            TargetSimilarity.reward(agent.config().timestep_limit, &drawn, Some(sample))
        })
        .collect()
}
