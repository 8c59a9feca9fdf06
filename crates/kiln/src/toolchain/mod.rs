//! # Toolchain
//!
//! The external collaborators a [`LanguageModel`](crate::session::LanguageModel)
//! delegates to. Each step of the pipeline sits behind its own trait so that
//! the orchestration (what runs, and when it can be skipped) stays independent
//! of how the step is performed.
//!
//! ## Traits
//!
//! - [`ParamGenerator`] writes an external weights file
//! - [`Exporter`] produces torch-dialect IR for a model
//! - [`Compiler`] turns IR into a compiled module blob
//! - [`Runtime`] loads a blob and exposes a [`CompiledModule`]
//! - [`TokenizerLoader`] provides the model's [`Tokenizer`]
//!
//! ## Feature Flags
//!
//! - `process`: process-backed implementations ([`CommandExporter`],
//!   [`CommandParamGenerator`], [`IreeCompiler`], [`HostedRuntime`])
//! - `hf-tokenizer`: [`FileTokenizerLoader`], reading `tokenizer.json` files

use crate::artifact::Quantization;
use crate::device::{DeviceTarget, Precision};
use crate::error::Result;
use crate::module::CompiledModule;
use crate::tokenizer::Tokenizer;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "process")]
mod command;
#[cfg(feature = "process")]
mod hosted;
mod iree;

#[cfg_attr(docsrs, doc(cfg(feature = "process")))]
#[cfg(feature = "process")]
pub use command::{CommandExporter, CommandParamGenerator, ToolCommand};
#[cfg_attr(docsrs, doc(cfg(feature = "process")))]
#[cfg(feature = "process")]
pub use hosted::HostedRuntime;
#[cfg_attr(docsrs, doc(cfg(feature = "process")))]
#[cfg(feature = "process")]
pub use iree::IreeCompiler;
pub use iree::compile_flags;

#[cfg_attr(docsrs, doc(cfg(feature = "hf-tokenizer")))]
#[cfg(feature = "hf-tokenizer")]
pub use hf::FileTokenizerLoader;

/// Parameters for exporting a model to IR.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub hf_model_name: String,
    pub auth_token: Option<String>,
    /// Serialization format of external weights, if weights are kept outside the IR.
    pub weight_format: Option<String>,
    pub precision: Precision,
    pub quantization: Quantization,
    pub streaming: bool,
}

/// Parameters for producing an external weights file.
#[derive(Debug, Clone)]
pub struct ParamRequest {
    pub hf_model_name: String,
    pub auth_token: Option<String>,
    pub weight_path: PathBuf,
    pub precision: Precision,
    pub quantization: Quantization,
}

/// Parameters for compiling IR into a module blob.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub ir: PathBuf,
    pub output: PathBuf,
    pub target: DeviceTarget,
    pub flags: Vec<String>,
}

/// Parameters for loading a compiled module.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub driver: String,
    pub vmfb: PathBuf,
    pub external_weights: Option<PathBuf>,
    pub module_name: &'static str,
}

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Export the model and return its IR as text.
    async fn export(&self, request: &ExportRequest) -> Result<String>;
}

#[async_trait]
pub trait ParamGenerator: Send + Sync {
    /// Write the external weights to `request.weight_path`.
    async fn generate(&self, request: &ParamRequest) -> Result<()>;
}

#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile `request.ir` and write the blob to `request.output`.
    async fn compile(&self, request: &CompileRequest) -> Result<()>;
}

#[async_trait]
pub trait Runtime: Send + Sync {
    async fn load(&self, request: &LoadRequest) -> Result<Arc<dyn CompiledModule>>;
}

#[async_trait]
pub trait TokenizerLoader: Send + Sync {
    async fn load(&self, hf_model_name: &str, auth_token: Option<&str>) -> Result<Arc<dyn Tokenizer>>;
}

/// The full set of collaborators used to build and load a model.
#[derive(Clone)]
pub struct Toolchain {
    pub exporter: Arc<dyn Exporter>,
    pub params: Arc<dyn ParamGenerator>,
    pub compiler: Arc<dyn Compiler>,
    pub runtime: Arc<dyn Runtime>,
    pub tokenizers: Arc<dyn TokenizerLoader>,
}

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::TokenizerLoader;
    use crate::artifact::safe_name;
    use crate::error::Result;
    use crate::tokenizer::{HfTokenizer, Tokenizer};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tracing::debug;

    /// Loads `{dir}/{safe model name}/tokenizer.json`.
    #[derive(Debug, Clone)]
    pub struct FileTokenizerLoader {
        dir: PathBuf,
    }

    impl FileTokenizerLoader {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        pub fn path_for(&self, hf_model_name: &str) -> PathBuf {
            self.dir.join(safe_name(hf_model_name)).join("tokenizer.json")
        }
    }

    #[async_trait]
    impl TokenizerLoader for FileTokenizerLoader {
        async fn load(&self, hf_model_name: &str, _auth_token: Option<&str>) -> Result<Arc<dyn Tokenizer>> {
            let path = self.path_for(hf_model_name);
            debug!(path = %path.display(), "loading tokenizer");
            let tokenizer = tokio::task::spawn_blocking(move || HfTokenizer::from_file(&path))
                .await
                .map_err(|e| crate::error::KilnError::Tokenizer(e.to_string()))??;
            Ok(Arc::new(tokenizer))
        }
    }

}
