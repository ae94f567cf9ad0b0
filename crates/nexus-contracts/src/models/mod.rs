mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, StepRange, CAPABILITY_DIMENSIONS, CAPABILITY_IMAGE,
    CAPABILITY_NEGATIVE_PROMPT, CAPABILITY_SEED,
};
pub use selectors::{ModelSelection, ModelSelector, SelectionError};
