pub mod prompt;
pub mod step;

pub use step::{CognitiveStep, DecisionSpec, StepError, StepEvaluator, Voice};
