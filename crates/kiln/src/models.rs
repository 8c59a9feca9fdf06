//! # Model Registry
//!
//! Static descriptors for the chat models this crate knows how to export,
//! compile and drive. Each descriptor carries the identity used to derive
//! artifact names, the compiler flags specific to that model, and the
//! generation parameters (stop token, token budget, system prompt).
//!
//! Extra descriptors can be registered at runtime, typically from a
//! [`ToolchainConfig`](crate::config::ToolchainConfig) file.

use crate::error::{KilnError, Result};
use crate::tokenizer::TokenId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Llama 2 chat system prompt shared by the built-in models.
pub const LLAMA2_SYSTEM_PROMPT: &str = "<s>[INST] <<SYS>>Be concise. You are a helpful, respectful and honest assistant. If a question does not make any sense, or is not factually coherent, explain why instead of answering something not correct. If you don't know the answer to a question, please don't share false information. <</SYS>>";

/// Immutable description of a servable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Registry key, as accepted on the command line.
    pub key: String,

    /// HuggingFace model name, used for export and artifact naming.
    pub hf_model_name: String,

    /// Model-specific compiler flags, appended after backend flags.
    #[serde(default)]
    pub compile_flags: Vec<String>,

    /// Token id that ends generation.
    pub stop_token: TokenId,

    /// Upper bound on generated tokens per chat.
    pub max_tokens: usize,

    /// Text prepended to the first prompt of a session.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_system_prompt() -> String {
    LLAMA2_SYSTEM_PROMPT.to_string()
}

impl ModelDescriptor {
    fn llama2(key: &str, hf_model_name: &str, const_expr_hoisting: bool, max_tokens: usize) -> Self {
        let hoisting = if const_expr_hoisting { "True" } else { "False" };
        Self {
            key: key.to_string(),
            hf_model_name: hf_model_name.to_string(),
            compile_flags: vec![format!("--iree-opt-const-expr-hoisting={hoisting}")],
            stop_token: 2,
            max_tokens,
            system_prompt: LLAMA2_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Lookup table from model key to descriptor.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Registry containing only the built-in models.
    pub fn builtin() -> Self {
        let builtins = [
            ModelDescriptor::llama2("llama2_7b", "meta-llama/Llama-2-7b-chat-hf", false, 4096),
            ModelDescriptor::llama2(
                "Trelis/Llama-2-7b-chat-hf-function-calling-v2",
                "Trelis/Llama-2-7b-chat-hf-function-calling-v2",
                false,
                4096,
            ),
            ModelDescriptor::llama2("TinyPixel/small-llama2", "TinyPixel/small-llama2", true, 1024),
        ];
        let mut registry = Self { models: BTreeMap::new() };
        registry.extend(builtins);
        registry
    }

    /// Add or replace descriptors, keyed by [`ModelDescriptor::key`].
    pub fn extend<I>(&mut self, descriptors: I)
    where
        I: IntoIterator<Item = ModelDescriptor>,
    {
        for descriptor in descriptors {
            self.models.insert(descriptor.key.clone(), descriptor);
        }
    }

    pub fn get(&self, key: &str) -> Result<&ModelDescriptor> {
        self.models
            .get(key)
            .ok_or_else(|| KilnError::UnknownModel(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
