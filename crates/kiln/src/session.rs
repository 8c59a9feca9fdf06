//! # Language Model Session
//!
//! [`LanguageModel`] ties the pipeline together: it resolves artifact paths
//! for a model and device, runs only the toolchain steps whose outputs are
//! missing, loads the compiled module and then serves chats against it.
//!
//! ## Build Decisions
//!
//! | compiled module | weights (if requested) | IR file | action                  |
//! |-----------------|------------------------|---------|-------------------------|
//! | present         | present                | any     | load                    |
//! | missing         | any                    | missing | export, compile, load   |
//! | missing         | any                    | present | compile, load           |
//!
//! Missing external weights are generated before the table is consulted.

use crate::artifact::{ArtifactKey, ArtifactPaths, Quantization};
use crate::device::DeviceTarget;
use crate::error::Result;
use crate::generation::{
    ChatOutput, ChatStream, GenerationConfig, GenerationLoop, GenerationState, GenerationWorker,
    StepSink,
};
use crate::models::ModelDescriptor;
use crate::module::{CompiledModule, module_name};
use crate::prompt::{Prompt, sanitize_prompt};
use crate::tokenizer::Tokenizer;
use crate::toolchain::{
    CompileRequest, ExportRequest, LoadRequest, ParamRequest, Toolchain, compile_flags,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

/// Caller-selected options for building a [`LanguageModel`].
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Device string, optionally labelled: `"GPU 0 => vulkan://0"`, `"cpu-task"`.
    pub device: String,
    pub quantization: Quantization,
    /// External weights file extension; `None` keeps weights inside the module.
    pub weight_format: Option<String>,
    pub auth_token: Option<String>,
    /// Prepend the model's system prompt to the first chat.
    pub use_system_prompt: bool,
    /// Keep the KV cache between chats, evicting when it fills up.
    pub streaming: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            quantization: Quantization::parse("int4"),
            weight_format: None,
            auth_token: None,
            use_system_prompt: true,
            streaming: false,
        }
    }
}

/// Which toolchain steps ran while building a [`LanguageModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPath {
    /// The compiled module was already on disk.
    Loaded,
    /// IR was on disk and was compiled.
    Compiled,
    /// The model was exported and compiled.
    ExportedAndCompiled,
}

/// A compiled chat model loaded into a runtime.
pub struct LanguageModel {
    descriptor: ModelDescriptor,
    target: DeviceTarget,
    paths: ArtifactPaths,
    build: BuildPath,
    use_system_prompt: bool,
    streaming: bool,
    module: Arc<dyn CompiledModule>,
    tokenizer: Arc<dyn Tokenizer>,
    state: Arc<Mutex<GenerationState>>,
}

impl LanguageModel {
    /// Build or reuse the artifacts for `descriptor` under `resource_dir` and load them.
    pub async fn new(
        descriptor: &ModelDescriptor,
        resource_dir: &Path,
        options: ModelOptions,
        toolchain: &Toolchain,
    ) -> Result<Self> {
        let target = DeviceTarget::parse(&options.device);
        info!(backend = %target.backend, driver = %target.driver, "selected target backend");

        let key = ArtifactKey::new(
            &descriptor.hf_model_name,
            &target,
            options.quantization.clone(),
            options.streaming,
        );
        let paths = ArtifactPaths::resolve(resource_dir, &key, options.weight_format.as_deref());
        tokio::fs::create_dir_all(resource_dir).await?;

        if let Some(weight_path) = &paths.weights {
            if weight_path.exists() {
                info!(weights = %weight_path.display(), vmfb = %paths.vmfb.display(), "external weights found");
            } else {
                info!(weights = %weight_path.display(), "external weights missing, generating");
                toolchain
                    .params
                    .generate(&ParamRequest {
                        hf_model_name: descriptor.hf_model_name.clone(),
                        auth_token: options.auth_token.clone(),
                        weight_path: weight_path.clone(),
                        precision: target.precision,
                        quantization: options.quantization.clone(),
                    })
                    .await?;
            }
        }

        let build = if paths.is_loadable() {
            BuildPath::Loaded
        } else if !paths.ir.exists() {
            let ir = toolchain
                .exporter
                .export(&ExportRequest {
                    hf_model_name: descriptor.hf_model_name.clone(),
                    auth_token: options.auth_token.clone(),
                    weight_format: options.weight_format.clone(),
                    precision: target.precision,
                    quantization: options.quantization.clone(),
                    streaming: options.streaming,
                })
                .await?;
            tokio::fs::write(&paths.ir, ir).await?;
            debug!(ir = %paths.ir.display(), "wrote exported IR");
            BuildPath::ExportedAndCompiled
        } else {
            BuildPath::Compiled
        };

        if build != BuildPath::Loaded {
            toolchain
                .compiler
                .compile(&CompileRequest {
                    ir: paths.ir.clone(),
                    output: paths.vmfb.clone(),
                    target: target.clone(),
                    flags: compile_flags(&target, descriptor),
                })
                .await?;
        }

        let module = toolchain
            .runtime
            .load(&LoadRequest {
                driver: target.driver.clone(),
                vmfb: paths.vmfb.clone(),
                external_weights: paths.weights.clone(),
                module_name: module_name(options.streaming),
            })
            .await?;
        let tokenizer = toolchain
            .tokenizers
            .load(&descriptor.hf_model_name, options.auth_token.as_deref())
            .await?;
        info!(model = %descriptor.key, ?build, "model ready");

        Ok(Self {
            descriptor: descriptor.clone(),
            target,
            paths,
            build,
            use_system_prompt: options.use_system_prompt,
            streaming: options.streaming,
            module,
            tokenizer,
            state: Arc::new(Mutex::new(GenerationState::default())),
        })
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn build(&self) -> BuildPath {
        self.build
    }

    /// Snapshot of the session state; waits for a running chat to finish.
    pub async fn state(&self) -> GenerationState {
        self.state.lock().await.clone()
    }

    /// Start a chat and stream its progress.
    ///
    /// Chats on one session run one at a time.
    pub async fn chat(&self, prompt: impl Into<Prompt>) -> ChatStream {
        let id = Uuid::new_v4();
        let prompt = prompt.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let state = self.state.clone();
        let module = self.module.clone();
        let tokenizer = self.tokenizer.clone();
        let system_prompt = self
            .use_system_prompt
            .then(|| self.descriptor.system_prompt.clone());
        let config = GenerationConfig {
            stop_token: self.descriptor.stop_token,
            max_tokens: self.descriptor.max_tokens,
            streaming: self.streaming,
        };

        let worker = GenerationWorker::new(move |running| {
            tokio::spawn(
                async move {
                    let sink = StepSink::new(tx, running);
                    let mut state = state.lock().await;
                    let outcome: Result<ChatOutput> = async {
                        let system = system_prompt.as_deref().filter(|_| state.global_iter == 0);
                        let text = sanitize_prompt(&prompt, system);
                        debug!(prompt = %text, "sanitized prompt");
                        let input_ids = tokenizer.encode(&text)?;
                        GenerationLoop {
                            module: module.as_ref(),
                            tokenizer: tokenizer.as_ref(),
                            config,
                            state: &mut *state,
                        }
                        .run(&input_ids, &sink)
                        .await
                    }
                    .await;
                    sink.finish(outcome);
                }
                .instrument(info_span!("chat", %id)),
            )
        });

        ChatStream::new(id, rx, worker)
    }

    /// Run a chat to completion and return only its final output.
    pub async fn chat_to_end(&self, prompt: impl Into<Prompt>) -> Result<ChatOutput> {
        self.chat(prompt).await.finish().await
    }
}
