use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nexus_contracts::events::{new_run_id, EventWriter};
use nexus_contracts::models::{ModelRegistry, ModelSelector, ModelSpec, CAPABILITY_IMAGE};
use nexus_contracts::summary::write_summary;
use nexus_contracts::{response_items, GenerationRequest};
use nexus_engine::pipeline;
use nexus_engine::{
    default_provider_registry, DisplayImage, EngineError, GenerationBatch, GenerationEngine,
    ImageOutcome, ImageProviderRegistry, UpstreamFailure, DEFAULT_DOWNLOAD_PREFIX,
};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nexus", version, about = "Prompt-to-image generation with per-image results")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate images from a prompt and save the decoded ones as PNG.
    Generate(GenerateArgs),
    /// Run a saved backend response through the decode pipeline.
    Decode(DecodeArgs),
    /// List the configured image models.
    Models,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long, default_value_t = 1)]
    count: u32,
    #[arg(long, requires = "height")]
    width: Option<u32>,
    #[arg(long, requires = "width")]
    height: Option<u32>,
    /// -1 lets the backend choose.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    seed: i64,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_DOWNLOAD_PREFIX)]
    prefix: String,
    #[arg(long, default_value_t = 1)]
    parallel: usize,
}

#[derive(Debug, Parser)]
struct DecodeArgs {
    #[arg(long)]
    response: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = DEFAULT_DOWNLOAD_PREFIX)]
    prefix: String,
    #[arg(long, default_value_t = 1)]
    parallel: usize,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nexus error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nexus=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args, default_provider_registry()),
        Command::Decode(args) => run_decode(args),
        Command::Models => {
            run_models(&ModelRegistry::new(None));
            Ok(0)
        }
    }
}

fn run_generate(args: GenerateArgs, providers: ImageProviderRegistry) -> Result<i32> {
    let selection = match ModelSelector::new(None).select(args.model.as_deref(), CAPABILITY_IMAGE) {
        Ok(selection) => selection,
        Err(err) => {
            println!("Invalid model: {err}");
            return Ok(1);
        }
    };
    if let Some(reason) = &selection.substitution {
        println!("{reason}");
    }
    let model = selection.model;

    let (request, notes) = match build_request(&args, &model) {
        Ok(built) => built,
        Err(err) => {
            println!("Invalid request: {err}");
            return Ok(1);
        }
    };
    for note in notes {
        println!("{note}");
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine =
        GenerationEngine::with_providers(providers, Some(EventWriter::for_new_run(&events_path)));
    engine.set_decode_workers(args.parallel);

    println!("Generating with {} ({})...", model.name, model.provider);
    let batch = match engine.generate(&request, &model.provider) {
        Ok(batch) => batch,
        Err(EngineError::Upstream(failure)) => {
            for line in upstream_failure_lines(&failure) {
                println!("{line}");
            }
            return Ok(1);
        }
        Err(err) => return Err(err.into()),
    };

    finish_batch(&batch, engine.run_id(), &args.out, &args.prefix)
}

fn upstream_failure_lines(failure: &UpstreamFailure) -> Vec<String> {
    let mut lines = vec![format!("Image generation failed: {failure}")];
    lines.extend(failure.hint.guidance().map(str::to_string));
    lines
}

/// Maps CLI input onto a request for `model`, returning notes about any
/// input the model does not take.
fn build_request(
    args: &GenerateArgs,
    model: &ModelSpec,
) -> Result<(GenerationRequest, Vec<String>), nexus_contracts::ValidationError> {
    let mut notes = Vec::new();
    let steps = match args.steps {
        Some(requested) => {
            let clamped = model.steps.clamp(requested);
            if clamped != requested {
                notes.push(format!(
                    "{} takes {}-{} steps; using {clamped}.",
                    model.name, model.steps.min, model.steps.max
                ));
            }
            clamped
        }
        None => model.steps.default,
    };

    let mut builder = GenerationRequest::builder(args.prompt.clone(), model.name.clone())
        .steps(steps)
        .count(args.count)
        .accepts_dimensions(model.accepts_dimensions());
    if let (Some(width), Some(height)) = (args.width, args.height) {
        if !model.accepts_dimensions() {
            notes.push(format!("{} has a fixed size; ignoring width/height.", model.name));
        }
        builder = builder.dimensions(width, height);
    }

    let negative = args
        .negative_prompt
        .clone()
        .filter(|value| !value.trim().is_empty());
    if model.accepts_negative_prompt() {
        builder = builder.negative_prompt(negative);
    } else if negative.is_some() {
        notes.push(format!("{} ignores negative prompts.", model.name));
    }
    if model.accepts_seed() {
        builder = builder.seed(Some(args.seed));
    } else if args.seed != nexus_contracts::request::SEED_SENTINEL {
        notes.push(format!("{} does not take a seed; ignoring {}.", model.name, args.seed));
    }

    Ok((builder.build()?, notes))
}

fn run_decode(args: DecodeArgs) -> Result<i32> {
    let raw = fs::read_to_string(&args.response)
        .with_context(|| format!("failed reading {}", args.response.display()))?;
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.response.display()))?;
    let items = response_items(&parsed);
    let images = pipeline::process_parallel(&items, args.parallel);
    let batch = GenerationBatch {
        provider: "file".to_string(),
        model: parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        requested: u32::try_from(items.len()).unwrap_or(u32::MAX),
        images,
    };

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    finish_batch(&batch, &new_run_id(), &args.out, &args.prefix)
}

fn run_models(registry: &ModelRegistry) {
    for model in registry.list() {
        let mut accepts = Vec::new();
        if model.accepts_dimensions() {
            accepts.push("width/height");
        }
        if model.accepts_negative_prompt() {
            accepts.push("negative_prompt");
        }
        if model.accepts_seed() {
            accepts.push("seed");
        }
        let accepts = if accepts.is_empty() {
            "-".to_string()
        } else {
            accepts.join(", ")
        };
        println!(
            "{} ({}) steps {}-{} default {} accepts: {}",
            model.name, model.provider, model.steps.min, model.steps.max, model.steps.default, accepts
        );
    }
}

fn finish_batch(batch: &GenerationBatch, run_id: &str, out: &Path, prefix: &str) -> Result<i32> {
    if batch.is_empty() {
        println!("No images were generated. Please try adjusting your prompt.");
    } else {
        println!("Generated {} image(s)!", batch.images.len());
    }

    let total = batch.images.len();
    let mut saved = Vec::new();
    for item in &batch.images {
        let line = match save_download(item, out, prefix)? {
            Some(path) => {
                let line = describe_item(item, total, Some(path.as_path()));
                saved.push(Value::String(path.to_string_lossy().to_string()));
                line
            }
            None => describe_item(item, total, None),
        };
        println!("{line}");
    }

    let summary = batch.summary(run_id);
    write_summary(
        &out.join("summary.json"),
        &summary,
        Some(&json_object(json!({
            "out_dir": out.to_string_lossy().to_string(),
            "files": saved,
        }))),
    )?;
    Ok(if batch.is_empty() { 1 } else { 0 })
}

fn save_download(item: &DisplayImage, out: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let (Some(bitmap), Some(name)) = (item.bitmap(), item.download_filename(prefix)) else {
        return Ok(None);
    };
    let path = out.join(name);
    fs::write(&path, &bitmap.encoded_png)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(Some(path))
}

fn describe_item(item: &DisplayImage, total: usize, saved: Option<&Path>) -> String {
    let position = format!("[{}/{}]", item.index + 1, total);
    match &item.outcome {
        ImageOutcome::Decoded(bitmap) => match saved {
            Some(path) => format!(
                "{position} saved {} ({}x{})",
                path.display(),
                bitmap.width(),
                bitmap.height()
            ),
            None => format!("{position} decoded ({}x{})", bitmap.width(), bitmap.height()),
        },
        ImageOutcome::DeferredUrl { url } => format!("{position} remote image: {url}"),
        ImageOutcome::Failed(failure) => format!("{position} failed: {failure}"),
    }
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use clap::Parser;
    use nexus_contracts::models::ModelRegistry;
    use nexus_contracts::ValidationError;
    use nexus_contracts::GenerationRequest;
    use nexus_engine::{
        DisplayImage, DryrunProvider, ImageOutcome, ImageProvider, ImageProviderRegistry,
        ItemFailure, ProviderResponse, UpstreamFailure,
    };
    use serde_json::{json, Value};

    use super::{
        build_request, describe_item, run_decode, run_generate, upstream_failure_lines, Cli,
        Command, DecodeArgs, GenerateArgs,
    };

    struct RevokedKeyBackend;

    impl ImageProvider for RevokedKeyBackend {
        fn name(&self) -> &str {
            "dryrun"
        }

        fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<ProviderResponse, UpstreamFailure> {
            Err(UpstreamFailure::from_http(
                401,
                r#"{"error": {"message": "Invalid API key provided"}}"#,
            ))
        }
    }

    fn registry_with<P: ImageProvider + 'static>(provider: P) -> ImageProviderRegistry {
        let mut providers = ImageProviderRegistry::new();
        providers.register(provider);
        providers
    }

    fn generate_args(extra: &[&str]) -> GenerateArgs {
        let mut argv = vec!["nexus", "generate", "--prompt", "a boat", "--out", "/tmp/out"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Generate(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn model(name: &str) -> nexus_contracts::models::ModelSpec {
        ModelRegistry::new(None).get(name).cloned().unwrap()
    }

    #[test]
    fn defaults_come_from_model_configuration() {
        let args = generate_args(&[]);
        let (request, notes) =
            build_request(&args, &model("black-forest-labs/FLUX.1-dev")).unwrap();
        assert_eq!(request.steps(), 28);
        assert_eq!(request.count(), 1);
        assert_eq!(request.seed(), None);
        assert!(notes.is_empty());
    }

    #[test]
    fn steps_are_clamped_into_model_range() {
        let args = generate_args(&["--steps", "30"]);
        let (request, notes) =
            build_request(&args, &model("black-forest-labs/FLUX.1-schnell-Free")).unwrap();
        assert_eq!(request.steps(), 4);
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn unsupported_fields_are_dropped_with_notes() {
        let args = generate_args(&[
            "--width",
            "512",
            "--height",
            "512",
            "--negative-prompt",
            "blurry",
            "--seed",
            "9",
        ]);
        let (request, notes) = build_request(&args, &model("dryrun-image-fixed")).unwrap();
        assert_eq!(request.width(), None);
        assert_eq!(request.negative_prompt(), None);
        assert_eq!(request.seed(), None);
        assert_eq!(notes.len(), 3);
        assert!(notes[2].contains("does not take a seed"));

        let (request, _) = build_request(&args, &model("dryrun-image-1")).unwrap();
        assert_eq!(request.width(), Some(512));
        assert_eq!(request.negative_prompt(), Some("blurry"));
        assert_eq!(request.seed(), Some(9));
    }

    #[test]
    fn blank_prompt_fails_validation() {
        let mut args = generate_args(&[]);
        args.prompt = "   ".to_string();
        let err = build_request(&args, &model("dryrun-image-1")).err();
        assert_eq!(err, Some(ValidationError::EmptyPrompt));
    }

    #[test]
    fn failed_items_are_described_by_position() {
        let item = DisplayImage {
            index: 2,
            outcome: ImageOutcome::Failed(ItemFailure::NoImageData),
        };
        assert_eq!(
            describe_item(&item, 4, None),
            "[3/4] failed: no image data in response item"
        );
    }

    #[test]
    fn decode_command_saves_only_decoded_items() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image::RgbImage::new(6, 4))
            .write_to(&mut png, image::ImageFormat::Png)?;
        let response_path = temp.path().join("response.json");
        fs::write(
            &response_path,
            serde_json::to_string(&json!({
                "model": "black-forest-labs/FLUX.1-schnell-Free",
                "data": [
                    {"b64_json": BASE64.encode(png.into_inner())},
                    {"foo": "bar"},
                    {"url": "https://example.com/x.png"},
                ]
            }))?,
        )?;
        let out = temp.path().join("out");

        let code = run_decode(DecodeArgs {
            response: response_path,
            out: out.clone(),
            prefix: "shot".to_string(),
            parallel: 2,
        })?;
        assert_eq!(code, 0);
        assert!(out.join("shot_1.png").exists());
        assert!(!out.join("shot_2.png").exists());
        assert!(!out.join("shot_3.png").exists());

        let summary: Value = serde_json::from_str(&fs::read_to_string(out.join("summary.json"))?)?;
        assert_eq!(summary["decoded"], json!(1));
        assert_eq!(summary["deferred"], json!(1));
        assert_eq!(summary["failed"][0]["index"], json!(1));
        assert_eq!(summary["files"].as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[test]
    fn seed_is_kept_quiet_when_left_to_backend() {
        let args = generate_args(&[]);
        let (_, notes) = build_request(&args, &model("dryrun-image-fixed")).unwrap();
        assert!(notes.is_empty());
    }

    #[test]
    fn decode_command_with_no_items_exits_nonzero() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let response_path = temp.path().join("response.json");
        fs::write(&response_path, r#"{"data": []}"#)?;
        let out = temp.path().join("out");

        let code = run_decode(DecodeArgs {
            response: response_path,
            out: out.clone(),
            prefix: "shot".to_string(),
            parallel: 1,
        })?;
        assert_eq!(code, 1);

        let summary: Value = serde_json::from_str(&fs::read_to_string(out.join("summary.json"))?)?;
        assert_eq!(summary["returned"], json!(0));
        assert_eq!(summary["files"], json!([]));
        Ok(())
    }

    #[test]
    fn generate_reports_backend_rejection_and_exits_nonzero() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut args = generate_args(&["--model", "dryrun-image-1"]);
        args.out = temp.path().join("out");

        let code = run_generate(args, registry_with(RevokedKeyBackend))?;
        assert_eq!(code, 1);
        assert!(!temp.path().join("out").join("summary.json").exists());

        let events = fs::read_to_string(temp.path().join("out").join("events.jsonl"))?;
        assert!(events.contains("\"type\":\"generation_failed\""));
        assert!(events.contains("\"hint\":\"credential\""));
        Ok(())
    }

    #[test]
    fn upstream_failure_prints_message_then_guidance() {
        let lines = upstream_failure_lines(&UpstreamFailure::from_http(
            401,
            r#"{"error": {"message": "Invalid API key provided"}}"#,
        ));
        assert_eq!(
            lines,
            vec![
                "Image generation failed: Invalid API key provided",
                "Please verify your API key is correct",
            ]
        );

        let lines = upstream_failure_lines(&UpstreamFailure::from_http(500, "model overloaded"));
        assert_eq!(lines, vec!["Image generation failed: model overloaded"]);
    }

    #[test]
    fn generate_with_dryrun_backend_saves_pngs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut args = generate_args(&[
            "--model",
            "dryrun-image-1",
            "--count",
            "2",
            "--width",
            "8",
            "--height",
            "8",
        ]);
        args.out = temp.path().join("out");

        let code = run_generate(args, registry_with(DryrunProvider))?;
        assert_eq!(code, 0);
        let out = temp.path().join("out");
        assert!(out.join("nexus_ai_image_1.png").exists());
        assert!(out.join("nexus_ai_image_2.png").exists());

        let summary: Value = serde_json::from_str(&fs::read_to_string(out.join("summary.json"))?)?;
        assert_eq!(summary["decoded"], json!(2));
        assert_eq!(summary["provider"], json!("dryrun"));
        Ok(())
    }

    #[test]
    fn unknown_model_exits_nonzero_without_running() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut args = generate_args(&["--model", "black-forest-labs/FLUX.9"]);
        args.out = temp.path().join("out");

        let code = run_generate(args, registry_with(DryrunProvider))?;
        assert_eq!(code, 1);
        assert!(!temp.path().join("out").exists());
        Ok(())
    }
}
