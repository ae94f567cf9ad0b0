use std::collections::BTreeMap;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use nexus_contracts::{response_items, GenerationRequest};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::config::BackendSettings;
use crate::upstream::UpstreamFailure;

const DRYRUN_DEFAULT_SIZE: u32 = 256;
const DRYRUN_MAX_SIZE: u32 = 2048;

/// What a backend returned for one request, before any classification.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider_request: Map<String, Value>,
    pub items: Vec<Value>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse, UpstreamFailure>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry() -> ImageProviderRegistry {
    let mut registry = ImageProviderRegistry::new();
    registry.register(DryrunProvider);
    registry.register(TogetherProvider::new(BackendSettings::together_from_env()));
    registry
}

/// Offline backend: one solid-colour PNG per requested image, returned the
/// way hosted backends do, as `b64_json` records.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse, UpstreamFailure> {
        let width = dryrun_dim(request.width());
        let height = dryrun_dim(request.height());
        let mut items = Vec::new();
        for idx in 0..request.count() {
            let (r, g, b) = color_from_prompt(request.prompt(), request.seed(), idx);
            let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
            let mut buffer = Cursor::new(Vec::new());
            DynamicImage::ImageRgb8(image)
                .write_to(&mut buffer, ImageFormat::Png)
                .map_err(|err| UpstreamFailure::new(format!("dryrun render failed: {err}")))?;
            items.push(json!({
                "index": idx,
                "b64_json": BASE64.encode(buffer.into_inner()),
            }));
        }

        Ok(ProviderResponse {
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "payload": request,
            })),
            items,
        })
    }
}

fn dryrun_dim(value: Option<u32>) -> u32 {
    value
        .unwrap_or(DRYRUN_DEFAULT_SIZE)
        .clamp(1, DRYRUN_MAX_SIZE)
}

fn color_from_prompt(prompt: &str, seed: Option<i64>, idx: u32) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.unwrap_or_default().to_be_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// Together AI image endpoint (OpenAI-compatible `images/generations`).
pub struct TogetherProvider {
    settings: BackendSettings,
    http: HttpClient,
}

impl TogetherProvider {
    pub fn new(settings: BackendSettings) -> Self {
        let http = match HttpClient::builder().timeout(settings.timeout).build() {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(
                    timeout_s = settings.timeout.as_secs(),
                    "http client build failed, using defaults without timeout: {err}"
                );
                HttpClient::new()
            }
        };
        Self { settings, http }
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.settings.api_base)
    }

    pub fn build_payload(request: &GenerationRequest) -> Map<String, Value> {
        let mut payload = serde_json::to_value(request)
            .map(map_object)
            .unwrap_or_default();
        payload.insert(
            "response_format".to_string(),
            Value::String("b64_json".to_string()),
        );
        payload
    }
}

impl ImageProvider for TogetherProvider {
    fn name(&self) -> &str {
        "together"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse, UpstreamFailure> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            return Err(UpstreamFailure::new("TOGETHER_API_KEY not set"));
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request);

        tracing::info!(%endpoint, model = request.model(), n = request.count(), "posting image request");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .map_err(|err| UpstreamFailure::new(format!("Together request failed ({endpoint}): {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| UpstreamFailure::new(format!("Together response body read failed: {err}")))?;
        if !status.is_success() {
            return Err(UpstreamFailure::from_http(status.as_u16(), &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            UpstreamFailure::new(format!("Together returned invalid JSON payload: {err}"))
        })?;

        Ok(ProviderResponse {
            provider_request: map_object(json!({
                "endpoint": endpoint,
                "payload": payload,
            })),
            items: response_items(&parsed),
        })
    }
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
