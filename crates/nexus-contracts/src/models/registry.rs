use indexmap::IndexMap;
use serde::Serialize;

pub const CAPABILITY_IMAGE: &str = "image";
pub const CAPABILITY_DIMENSIONS: &str = "dimensions";
pub const CAPABILITY_NEGATIVE_PROMPT: &str = "negative_prompt";
pub const CAPABILITY_SEED: &str = "seed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepRange {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl StepRange {
    pub const fn new(min: u32, max: u32, default: u32) -> Self {
        Self { min, max, default }
    }

    pub fn clamp(&self, steps: u32) -> u32 {
        steps.clamp(self.min.max(1), self.max.max(self.min.max(1)))
    }
}

/// Caller-side description of a backend model: who serves it and which
/// optional request fields it takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub steps: StepRange,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn accepts_dimensions(&self) -> bool {
        self.supports(CAPABILITY_DIMENSIONS)
    }

    pub fn accepts_negative_prompt(&self) -> bool {
        self.supports(CAPABILITY_NEGATIVE_PROMPT)
    }

    pub fn accepts_seed(&self) -> bool {
        self.supports(CAPABILITY_SEED)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], steps: StepRange| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                steps,
            },
        );
    };

    insert(
        "black-forest-labs/FLUX.1-schnell-Free",
        "together",
        &[CAPABILITY_IMAGE, CAPABILITY_DIMENSIONS, CAPABILITY_SEED],
        StepRange::new(1, 4, 4),
    );
    insert(
        "black-forest-labs/FLUX.1-schnell",
        "together",
        &[CAPABILITY_IMAGE, CAPABILITY_DIMENSIONS, CAPABILITY_SEED],
        StepRange::new(1, 12, 4),
    );
    insert(
        "black-forest-labs/FLUX.1-dev",
        "together",
        &[CAPABILITY_IMAGE, CAPABILITY_DIMENSIONS, CAPABILITY_SEED],
        StepRange::new(1, 50, 28),
    );
    insert(
        "stabilityai/stable-diffusion-xl-base-1.0",
        "together",
        &[
            CAPABILITY_IMAGE,
            CAPABILITY_DIMENSIONS,
            CAPABILITY_NEGATIVE_PROMPT,
            CAPABILITY_SEED,
        ],
        StepRange::new(1, 50, 20),
    );
    insert(
        "dryrun-image-1",
        "dryrun",
        &[
            CAPABILITY_IMAGE,
            CAPABILITY_DIMENSIONS,
            CAPABILITY_NEGATIVE_PROMPT,
            CAPABILITY_SEED,
        ],
        StepRange::new(1, 50, 4),
    );
    insert(
        "dryrun-image-fixed",
        "dryrun",
        &[CAPABILITY_IMAGE],
        StepRange::new(1, 10, 1),
    );

    map
}
