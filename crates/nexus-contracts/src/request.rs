use serde::Serialize;
use thiserror::Error;

/// Seed value callers use to say "let the backend pick".
pub const SEED_SENTINEL: i64 = -1;

pub const DEFAULT_STEPS: u32 = 4;
pub const DEFAULT_COUNT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("steps must be a positive count")]
    ZeroSteps,
    #[error("at least one image must be requested")]
    ZeroCount,
    #[error("width and height must be positive")]
    ZeroDimension,
}

/// A validated generation request.
///
/// Built fresh per user action through [`GenerationRequestBuilder`] and never
/// mutated afterwards. Optional fields that are `None` are omitted from the
/// wire payload entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    model: String,
    steps: u32,
    #[serde(rename = "n")]
    count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

impl GenerationRequest {
    pub fn builder(prompt: impl Into<String>, model: impl Into<String>) -> GenerationRequestBuilder {
        GenerationRequestBuilder::new(prompt, model)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.negative_prompt.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn seed(&self) -> Option<i64> {
        self.seed
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequestBuilder {
    prompt: String,
    negative_prompt: Option<String>,
    model: String,
    steps: u32,
    count: u32,
    dimensions: Option<(u32, u32)>,
    accepts_dimensions: bool,
    seed: Option<i64>,
}

impl GenerationRequestBuilder {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            model: model.into(),
            steps: DEFAULT_STEPS,
            count: DEFAULT_COUNT,
            dimensions: None,
            accepts_dimensions: true,
            seed: None,
        }
    }

    pub fn negative_prompt(mut self, negative_prompt: Option<impl Into<String>>) -> Self {
        self.negative_prompt = negative_prompt.map(Into::into);
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    /// Whether the selected model takes spatial dimensions. This comes from
    /// caller configuration; the builder never infers it from the model id.
    pub fn accepts_dimensions(mut self, accepts: bool) -> Self {
        self.accepts_dimensions = accepts;
        self
    }

    pub fn seed(mut self, seed: Option<i64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<GenerationRequest, ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if self.steps == 0 {
            return Err(ValidationError::ZeroSteps);
        }
        if self.count == 0 {
            return Err(ValidationError::ZeroCount);
        }

        let (width, height) = match self.dimensions {
            Some((width, height)) if self.accepts_dimensions => {
                if width == 0 || height == 0 {
                    return Err(ValidationError::ZeroDimension);
                }
                (Some(width), Some(height))
            }
            _ => (None, None),
        };

        let negative_prompt = self
            .negative_prompt
            .filter(|value| !value.trim().is_empty());
        let seed = self.seed.filter(|value| *value != SEED_SENTINEL);

        Ok(GenerationRequest {
            prompt: self.prompt,
            negative_prompt,
            model: self.model,
            steps: self.steps,
            count: self.count,
            width,
            height,
            seed,
        })
    }
}
