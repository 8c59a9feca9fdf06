//! # Kiln
//!
//! Build-if-missing orchestration and streaming chat generation for compiled
//! language models.
//!
//! ## Overview
//!
//! A [`LanguageModel`] is created from a [`ModelDescriptor`], a resource
//! directory and a [`Toolchain`]. Construction derives a deterministic
//! artifact name from the model, precision, quantization, backend and
//! streaming mode, then does only the work that is missing:
//!
//! - generate external weights when they are requested but absent
//! - export the model to IR when no compiled module or IR exists
//! - compile the IR when no compiled module exists
//! - load the compiled module into the runtime
//!
//! Chatting returns a [`ChatStream`] that yields one [`ChatEvent::Token`] per
//! generated token and ends with a [`ChatEvent::Done`].
//!
//! ## Architecture
//!
//! ### Toolchain Traits
//!
//! Every external step sits behind an async trait ([`Exporter`],
//! [`ParamGenerator`], [`Compiler`], [`Runtime`], [`TokenizerLoader`]), so the
//! orchestration is independent of how the tools are invoked.
//!
//! ### Generation
//!
//! The generation loop prefills the prompt, then feeds one token at a time
//! until the model's stop token or its token budget. In streaming mode the
//! KV cache is evicted whenever the sequence step passes
//! [`EVICTION_THRESHOLD`], and later chats reuse the cache through a cached
//! prefill of only the new tokens.
//!
//! ## Features
//!
//! - **process** - Toolchain implementations backed by external processes
//! - **hf-tokenizer** - Tokenizers loaded from `tokenizer.json` files
//!

pub mod artifact;
pub mod config;
pub mod device;
pub mod error;
pub mod generation;
pub mod models;
pub mod module;
pub mod prompt;
pub mod session;
pub mod tokenizer;
pub mod toolchain;
pub mod vmfb_cache;

#[cfg(test)]
mod mock;

pub use artifact::{ArtifactKey, ArtifactPaths, Quantization};
pub use config::ToolchainConfig;
pub use device::{DeviceTarget, Precision};
pub use error::{KilnError, Result};
pub use generation::{ChatEvent, ChatOutput, ChatStream, EVICTION_THRESHOLD, Step, StopReason};
pub use models::{ModelDescriptor, ModelRegistry};
pub use module::CompiledModule;
pub use prompt::Prompt;
pub use session::{BuildPath, LanguageModel, ModelOptions};
pub use tokenizer::{TokenId, Tokenizer};
pub use toolchain::{Compiler, Exporter, ParamGenerator, Runtime, TokenizerLoader, Toolchain};
