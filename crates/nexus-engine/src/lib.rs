//! Generation engine: runs a validated request against a backend and turns
//! whatever comes back into an ordered list of displayable images.

pub mod config;
pub mod decode;
pub mod pipeline;
pub mod providers;
pub mod upstream;

use nexus_contracts::events::{EventKind, EventWriter};
use nexus_contracts::summary::{BatchSummary, FailedItem};
use nexus_contracts::GenerationRequest;
use serde_json::{json, Value};
use thiserror::Error;

pub use decode::{
    decode, download_filename, DecodedBitmap, DisplayImage, FailureStage, ImageOutcome,
    ItemFailure, DEFAULT_DOWNLOAD_PREFIX,
};
pub use providers::{
    default_provider_registry, DryrunProvider, ImageProvider, ImageProviderRegistry,
    ProviderResponse, TogetherProvider,
};
pub use upstream::{classify_hint, FailureHint, UpstreamFailure};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown image provider '{0}'")]
    UnknownProvider(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamFailure),
}

/// Result of one generation call, index-aligned with the backend response.
#[derive(Debug, Clone)]
pub struct GenerationBatch {
    pub provider: String,
    pub model: String,
    pub requested: u32,
    pub images: Vec<DisplayImage>,
}

impl GenerationBatch {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn decoded(&self) -> impl Iterator<Item = (&DisplayImage, &DecodedBitmap)> {
        self.images
            .iter()
            .filter_map(|item| item.bitmap().map(|bitmap| (item, bitmap)))
    }

    pub fn summary(&self, run_id: &str) -> BatchSummary {
        BatchSummary {
            run_id: run_id.to_string(),
            model: self.model.clone(),
            provider: self.provider.clone(),
            requested: self.requested,
            returned: self.images.len(),
            decoded: self.decoded().count(),
            deferred: self
                .images
                .iter()
                .filter(|item| item.deferred_url().is_some())
                .count(),
            failed: self
                .images
                .iter()
                .filter_map(|item| {
                    item.failure().map(|failure| FailedItem {
                        index: item.index,
                        reason: failure.to_string(),
                    })
                })
                .collect(),
        }
    }
}

pub struct GenerationEngine {
    providers: ImageProviderRegistry,
    events: Option<EventWriter>,
    decode_workers: usize,
}

impl GenerationEngine {
    pub fn with_providers(providers: ImageProviderRegistry, events: Option<EventWriter>) -> Self {
        Self {
            providers,
            events,
            decode_workers: 1,
        }
    }

    /// Decode items on up to `workers` threads. 1 keeps decoding inline.
    pub fn set_decode_workers(&mut self, workers: usize) {
        self.decode_workers = workers.max(1);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.names()
    }

    /// Sends `request` to `provider` and decodes the response.
    ///
    /// Only whole-batch problems are errors; per-item problems come back as
    /// [`ImageOutcome::Failed`] entries.
    pub fn generate(
        &self,
        request: &GenerationRequest,
        provider: &str,
    ) -> Result<GenerationBatch, EngineError> {
        let backend = self
            .providers
            .get(provider)
            .ok_or_else(|| EngineError::UnknownProvider(provider.to_string()))?;

        self.emit(
            EventKind::GenerationRequested,
            json!({
                "provider": provider,
                "model": request.model(),
                "request": request,
            }),
        );

        let response = match backend.generate(request) {
            Ok(response) => response,
            Err(failure) => {
                tracing::warn!(provider, hint = failure.hint.as_str(), "generation failed: {failure}");
                self.emit(
                    EventKind::GenerationFailed,
                    json!({
                        "provider": provider,
                        "model": request.model(),
                        "message": failure.message,
                        "status": failure.status,
                        "code": failure.code,
                        "hint": failure.hint,
                    }),
                );
                return Err(failure.into());
            }
        };

        let images = if self.decode_workers > 1 {
            pipeline::process_parallel(&response.items, self.decode_workers)
        } else {
            pipeline::process(&response.items)
        };
        for item in &images {
            self.emit_item(item);
        }

        let batch = GenerationBatch {
            provider: provider.to_string(),
            model: request.model().to_string(),
            requested: request.count(),
            images,
        };
        let summary = batch.summary(self.run_id());
        tracing::info!(
            provider,
            returned = summary.returned,
            decoded = summary.decoded,
            deferred = summary.deferred,
            failed = summary.failed.len(),
            "generation finished"
        );
        self.emit(
            EventKind::GenerationFinished,
            json!({
                "provider": provider,
                "model": request.model(),
                "provider_request": response.provider_request,
                "requested": summary.requested,
                "returned": summary.returned,
                "decoded": summary.decoded,
                "deferred": summary.deferred,
                "failed": summary.failed.len(),
            }),
        );
        Ok(batch)
    }

    pub fn run_id(&self) -> &str {
        self.events
            .as_ref()
            .map(EventWriter::run_id)
            .unwrap_or_default()
    }

    fn emit_item(&self, item: &DisplayImage) {
        match &item.outcome {
            ImageOutcome::Decoded(bitmap) => self.emit(
                EventKind::ImageDecoded,
                json!({
                    "index": item.index,
                    "width": bitmap.width(),
                    "height": bitmap.height(),
                    "source_format": format!("{:?}", bitmap.source_format).to_ascii_lowercase(),
                    "png_bytes": bitmap.encoded_png.len(),
                }),
            ),
            ImageOutcome::DeferredUrl { url } => self.emit(
                EventKind::ImageDeferred,
                json!({
                    "index": item.index,
                    "url": url,
                }),
            ),
            ImageOutcome::Failed(failure) => self.emit(
                EventKind::ImageFailed,
                json!({
                    "index": item.index,
                    "code": failure.code(),
                    "reason": failure.to_string(),
                }),
            ),
        }
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(kind, providers::map_object(payload)) {
            tracing::warn!(event_type = kind.as_str(), "event write failed: {err:#}");
        }
    }
}
