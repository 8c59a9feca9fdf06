//! # Artifact Resolution
//!
//! Derives the on-disk names of everything a compiled model needs from a
//! cache key made of model identity, precision, quantization and backend.
//! Because the names are deterministic, the existence of a file is enough to
//! decide whether the export or compile step can be skipped.
//!
//! Weights are named before the streaming suffix is applied, so streaming
//! and non-streaming builds of one model share the same weights file while
//! keeping separate IR and compiled modules.

use crate::device::{DeviceTarget, Precision};
use std::path::{Path, PathBuf};

const STREAMING_SUFFIX: &str = "_streaming";

/// Quantization scheme; `None` means the model is not quantized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Quantization(Option<String>);

impl Quantization {
    pub fn none() -> Self {
        Self(None)
    }

    /// Parse a user supplied scheme. Empty strings and `"None"` mean unquantized.
    ///
    /// An empty scheme names the same artifacts as `"None"`, so a file spec
    /// never ends in a bare `_`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "None" {
            Self(None)
        } else {
            Self(Some(trimmed.to_string()))
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Inputs that fully determine artifact names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub hf_model_name: String,
    pub precision: Precision,
    pub quantization: Quantization,
    pub backend: String,
    pub streaming: bool,
}

impl ArtifactKey {
    pub fn new(
        hf_model_name: &str,
        target: &DeviceTarget,
        quantization: Quantization,
        streaming: bool,
    ) -> Self {
        Self {
            hf_model_name: hf_model_name.to_string(),
            precision: target.precision,
            quantization,
            backend: target.backend.clone(),
            streaming,
        }
    }

    /// The model name with path and dash separators flattened to `_`.
    pub fn safe_name(&self) -> String {
        safe_name(&self.hf_model_name)
    }

    /// Stem shared by the weights file, before the streaming suffix.
    pub fn weights_spec(&self) -> String {
        let mut spec = format!("{}_{}", self.safe_name(), self.precision);
        if let Some(quantization) = self.quantization.as_deref() {
            spec.push('_');
            spec.push_str(quantization);
        }
        spec
    }

    /// Stem of the IR and compiled module files.
    pub fn file_spec(&self) -> String {
        let mut spec = self.weights_spec();
        if self.streaming {
            spec.push_str(STREAMING_SUFFIX);
        }
        spec
    }
}

/// Flatten a HuggingFace model name into something usable as a file stem.
pub fn safe_name(hf_model_name: &str) -> String {
    hf_model_name.replace(['/', '-'], "_")
}

/// Resolved artifact locations for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// External weights, present only when a serialization format was requested.
    pub weights: Option<PathBuf>,

    /// Exported intermediate representation.
    pub ir: PathBuf,

    /// Compiled module blob.
    pub vmfb: PathBuf,
}

impl ArtifactPaths {
    /// Derive artifact paths under `resource_dir`.
    ///
    /// `weight_format` is the external weights file extension, e.g. `safetensors`.
    pub fn resolve(resource_dir: &Path, key: &ArtifactKey, weight_format: Option<&str>) -> Self {
        let weights = weight_format
            .map(|format| resource_dir.join(format!("{}.{}", key.weights_spec(), format)));
        let file_spec = key.file_spec();
        Self {
            weights,
            ir: resource_dir.join(format!("{file_spec}.tempfile")),
            vmfb: resource_dir.join(format!("{}_{}.vmfb.tempfile", file_spec, key.backend)),
        }
    }

    pub fn weights_ready(&self) -> bool {
        self.weights.as_ref().is_none_or(|path| path.exists())
    }

    /// True when the compiled module can be loaded without rebuilding anything.
    pub fn is_loadable(&self) -> bool {
        self.vmfb.exists() && self.weights_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(device: &str, quantization: &str, streaming: bool) -> ArtifactKey {
        ArtifactKey::new(
            "Trelis/Llama-2-7b-chat-hf-function-calling-v2",
            &DeviceTarget::parse(device),
            Quantization::parse(quantization),
            streaming,
        )
    }

    #[test]
    fn test_safe_name_flattens_separators() {
        assert_eq!(safe_name("meta-llama/Llama-2-7b-chat-hf"), "meta_llama_Llama_2_7b_chat_hf");
    }

    #[test]
    fn test_quantization_none_is_omitted() {
        assert_eq!(Quantization::parse("None"), Quantization::none());
        assert_eq!(Quantization::parse(""), Quantization::none());
        let spec = key("cpu-task", "None", false).file_spec();
        assert_eq!(spec, "Trelis_Llama_2_7b_chat_hf_function_calling_v2_f32");
    }

    #[test]
    fn test_empty_quantization_names_unquantized_artifacts() {
        let empty = key("cpu-task", "", false).file_spec();
        assert_eq!(empty, key("cpu-task", "None", false).file_spec());
        assert!(!empty.ends_with('_'));
    }

    #[test]
    fn test_file_spec_includes_precision_and_quantization() {
        let spec = key("vulkan://0", "int4", false).file_spec();
        assert_eq!(spec, "Trelis_Llama_2_7b_chat_hf_function_calling_v2_f16_int4");
    }

    #[test]
    fn test_paths_are_deterministic() {
        let root = Path::new("/models");
        let first = ArtifactPaths::resolve(root, &key("cpu-task", "int4", true), Some("safetensors"));
        let second = ArtifactPaths::resolve(root, &key("cpu-task", "int4", true), Some("safetensors"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_path_layout() {
        let root = Path::new("/models");
        let paths = ArtifactPaths::resolve(root, &key("cpu-task", "int4", false), Some("safetensors"));
        let stem = "Trelis_Llama_2_7b_chat_hf_function_calling_v2_f32_int4";
        assert_eq!(paths.weights, Some(root.join(format!("{stem}.safetensors"))));
        assert_eq!(paths.ir, root.join(format!("{stem}.tempfile")));
        assert_eq!(paths.vmfb, root.join(format!("{stem}_llvm-cpu.vmfb.tempfile")));
    }

    #[test]
    fn test_streaming_changes_modules_but_not_weights() {
        let root = Path::new("/models");
        let plain = ArtifactPaths::resolve(root, &key("vulkan://0", "int4", false), Some("gguf"));
        let streaming = ArtifactPaths::resolve(root, &key("vulkan://0", "int4", true), Some("gguf"));
        assert_eq!(plain.weights, streaming.weights);
        assert_ne!(plain.ir, streaming.ir);
        assert_ne!(plain.vmfb, streaming.vmfb);
        assert!(streaming.vmfb.to_string_lossy().ends_with("_int4_streaming_vulkan.vmfb.tempfile"));
    }

    #[test]
    fn test_no_weight_format_means_no_weights() {
        let paths = ArtifactPaths::resolve(Path::new("/models"), &key("cpu", "int4", false), None);
        assert!(paths.weights.is_none());
        assert!(paths.weights_ready());
    }

    #[test]
    fn test_is_loadable_requires_weights_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::resolve(dir.path(), &key("cpu", "int4", false), Some("safetensors"));
        std::fs::write(&paths.vmfb, b"blob").unwrap();
        assert!(!paths.is_loadable());
        std::fs::write(paths.weights.as_ref().unwrap(), b"weights").unwrap();
        assert!(paths.is_loadable());
    }
}
