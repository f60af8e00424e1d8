use serde::{Deserialize, Serialize};
use spiral_agents::{
    networks::Parameterized,
    optim::{AsyncOptimizer, rules::UpdateRuleKind},
};
use spiral_core::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerBuilder {
    pub rule: UpdateRuleKind,
}

impl OptimizerBuilder {
    /// An optimizer already bound to `network`.
    pub fn build(&self, network: &impl Parameterized) -> Result<AsyncOptimizer> {
        let mut optimizer = AsyncOptimizer::new(self.rule);
        optimizer.setup(network)?;
        Ok(optimizer)
    }
}
