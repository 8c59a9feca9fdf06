use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use kiln::{ChatEvent, LanguageModel, ModelOptions, Quantization, ToolchainConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kiln-chat", about = "Build a compiled chat model if needed and chat with it")]
struct Cli {
    /// Registered model key.
    #[arg(long, default_value = "Trelis/Llama-2-7b-chat-hf-function-calling-v2")]
    model: String,

    /// Target device, e.g. `cpu-task` or `vulkan://0`.
    #[arg(long, default_value = "cpu-task")]
    device: String,

    #[arg(long, default_value = "int4")]
    quantization: String,

    /// Extension of the external weights file; empty keeps weights inlined.
    #[arg(long, default_value = "safetensors")]
    external_weights: String,

    /// Keep the KV cache between prompts.
    #[arg(long)]
    streaming: bool,

    #[arg(long)]
    no_system_prompt: bool,

    /// JSON toolchain configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `resource_dir` from the configuration.
    #[arg(long)]
    resource_dir: Option<PathBuf>,

    #[arg(long, env = "HF_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Prompts to send, one chat each.
    #[arg(default_values_t = vec!["hi, what are you?".to_string()])]
    prompts: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ToolchainConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => ToolchainConfig::default(),
    };
    if let Some(resource_dir) = cli.resource_dir {
        config.resource_dir = resource_dir;
    }

    let registry = config.registry();
    let descriptor = registry.get(&cli.model)?;
    let options = ModelOptions {
        device: cli.device,
        quantization: Quantization::parse(&cli.quantization),
        weight_format: Some(cli.external_weights).filter(|format| !format.is_empty()),
        auth_token: cli.auth_token,
        use_system_prompt: !cli.no_system_prompt,
        streaming: cli.streaming,
    };

    let model = LanguageModel::new(descriptor, &config.resource_dir, options, &config.toolchain())
        .await
        .context("preparing model")?;
    info!(build = ?model.build(), vmfb = %model.paths().vmfb.display(), "model ready");

    for prompt in cli.prompts {
        let mut stream = model.chat(prompt).await;
        let mut shown = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ChatEvent::Token(step) => {
                    print!("{}", text_delta(&shown, &step.text));
                    std::io::stdout().flush()?;
                    shown = step.text;
                }
                ChatEvent::Done(output) => {
                    println!();
                    info!(
                        tokens = output.tokens.len(),
                        reason = ?output.reason,
                        latency_ms = output.latency.as_millis() as u64,
                        "chat finished"
                    );
                }
            }
        }
    }

    Ok(())
}

/// Part of `current` not yet shown, starting at the first character where it
/// differs from `shown`.
///
/// Decoding the whole history can rewrite its tail, e.g. when a byte-fallback
/// token completes a multi-byte character. The rewritten tail is printed again.
fn text_delta<'a>(shown: &str, current: &'a str) -> &'a str {
    let common = shown
        .char_indices()
        .zip(current.chars())
        .find(|((_, a), b)| a != b)
        .map_or_else(|| shown.len().min(current.len()), |((at, _), _)| at);
    current.get(common..).unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_of_extended_text() {
        assert_eq!(text_delta("hello", "hello world"), " world");
        assert_eq!(text_delta("", "hi"), "hi");
    }

    #[test]
    fn test_delta_after_rewritten_tail() {
        assert_eq!(text_delta("caf\u{fffd}", "café"), "é");
        assert_eq!(text_delta("ab\u{fffd}", "ab\u{fffd}\u{fffd}"), "\u{fffd}");
    }
}
