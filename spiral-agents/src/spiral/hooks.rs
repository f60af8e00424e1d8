use super::TrainStats;
use spiral_core::Result;

pub enum HookResult {
    Continue,
    Break,
}

/// Called after every completed training step. Returning `true` stops `Spiral::train`.
pub trait AfterStepHook: Send {
    fn call_hook(&mut self, stats: &TrainStats) -> Result<bool>;
}

impl<F> AfterStepHook for F
where
    F: FnMut(&TrainStats) -> Result<bool> + Send,
{
    fn call_hook(&mut self, stats: &TrainStats) -> Result<bool> {
        self(stats)
    }
}

pub struct SpiralHooks {
    after_step: Box<dyn AfterStepHook>,
}

impl Default for SpiralHooks {
    fn default() -> Self {
        Self::empty()
    }
}

impl SpiralHooks {
    pub fn empty() -> Self {
        Self {
            after_step: Box::new(|_: &TrainStats| -> Result<bool> { Ok(false) }),
        }
    }

    pub fn set_after_step(&mut self, hook: impl AfterStepHook + 'static) {
        self.after_step = Box::new(hook);
    }

    pub fn call_after_step_hook(&mut self, stats: &TrainStats) -> Result<HookResult> {
        if self.after_step.call_hook(stats)? {
            Ok(HookResult::Break)
        } else {
            Ok(HookResult::Continue)
        }
    }
}
