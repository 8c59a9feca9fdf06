//! Toolchain configuration.
//!
//! Read from a JSON file; every field has a default so an empty object is a
//! valid configuration:
//!
//! ```json
//! {
//!   "resource_dir": "models",
//!   "tokenizer_dir": "tokenizers",
//!   "exporter": { "program": "python", "args": ["-m", "turbine_models.custom_models.stateless_llama"] },
//!   "iree_compile": "iree-compile",
//!   "models": [
//!     { "key": "tiny", "hf_model_name": "org/tiny", "stop_token": 2, "max_tokens": 256 }
//!   ]
//! }
//! ```

use crate::error::Result;
use crate::models::{ModelDescriptor, ModelRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(feature = "process")]
use crate::toolchain::ToolCommand;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Directory holding weights, IR and compiled modules.
    pub resource_dir: PathBuf,

    /// Directory holding one `tokenizer.json` per model, under its safe name.
    pub tokenizer_dir: PathBuf,

    #[cfg(feature = "process")]
    pub exporter: ToolCommand,

    #[cfg(feature = "process")]
    pub param_generator: ToolCommand,

    /// Path or name of the `iree-compile` binary.
    pub iree_compile: String,

    #[cfg(feature = "process")]
    pub runtime_host: ToolCommand,

    /// Descriptors added to, or replacing, the built-in models.
    pub models: Vec<ModelDescriptor>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("models"),
            tokenizer_dir: PathBuf::from("tokenizers"),
            #[cfg(feature = "process")]
            exporter: ToolCommand::new(
                "python",
                &["-m", "turbine_models.custom_models.stateless_llama"],
            ),
            #[cfg(feature = "process")]
            param_generator: ToolCommand::new(
                "python",
                &["-m", "turbine_models.gen_external_params.gen_external_params"],
            ),
            iree_compile: "iree-compile".to_string(),
            #[cfg(feature = "process")]
            runtime_host: ToolCommand::new("python", &["-m", "kiln_runtime_host"]),
            models: vec![],
        }
    }
}

impl ToolchainConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Built-in models plus the ones configured here.
    pub fn registry(&self) -> ModelRegistry {
        let mut registry = ModelRegistry::builtin();
        registry.extend(self.models.iter().cloned());
        registry
    }

    /// Process-backed toolchain described by this configuration.
    #[cfg_attr(docsrs, doc(cfg(all(feature = "process", feature = "hf-tokenizer"))))]
    #[cfg(all(feature = "process", feature = "hf-tokenizer"))]
    pub fn toolchain(&self) -> crate::toolchain::Toolchain {
        use crate::toolchain::{
            CommandExporter, CommandParamGenerator, FileTokenizerLoader, HostedRuntime,
            IreeCompiler, Toolchain,
        };
        use std::sync::Arc;

        Toolchain {
            exporter: Arc::new(CommandExporter::new(self.exporter.clone())),
            params: Arc::new(CommandParamGenerator::new(self.param_generator.clone())),
            compiler: Arc::new(IreeCompiler::new(self.iree_compile.clone())),
            runtime: Arc::new(HostedRuntime::new(self.runtime_host.clone())),
            tokenizers: Arc::new(FileTokenizerLoader::new(self.tokenizer_dir.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config: ToolchainConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.resource_dir, PathBuf::from("models"));
        assert_eq!(config.iree_compile, "iree-compile");
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_from_file_with_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.json");
        std::fs::write(
            &path,
            r#"{
                "resource_dir": "/var/kiln",
                "models": [{"key": "tiny", "hf_model_name": "org/tiny", "stop_token": 0, "max_tokens": 32}]
            }"#,
        )
        .unwrap();

        let config = ToolchainConfig::from_file(&path).unwrap();
        assert_eq!(config.resource_dir, PathBuf::from("/var/kiln"));

        let registry = config.registry();
        assert_eq!(registry.get("tiny").unwrap().max_tokens, 32);
        assert!(registry.get("llama2_7b").is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ToolchainConfig::from_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(crate::error::KilnError::Io(_))));
    }

    #[cfg(feature = "process")]
    #[test]
    fn test_tool_commands_deserialize() {
        let config: ToolchainConfig = serde_json::from_str(
            r#"{"runtime_host": {"program": "/opt/host", "args": ["--verbose"]}}"#,
        )
        .unwrap();
        assert_eq!(config.runtime_host, ToolCommand::new("/opt/host", &["--verbose"]));
    }
}
