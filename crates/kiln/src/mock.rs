//! Test doubles for the toolchain, the compiled module and the tokenizer.

use crate::error::{KilnError, Result};
use crate::module::{CompiledModule, entry_point};
use crate::tokenizer::{TokenId, Tokenizer};
use crate::toolchain::{
    CompileRequest, Compiler, ExportRequest, Exporter, LoadRequest, ParamGenerator, ParamRequest,
    Runtime, TokenizerLoader, Toolchain,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Module that returns a fixed first token, then tokens from a script, then a fallback.
pub(crate) struct ScriptedModule {
    first: TokenId,
    script: Mutex<VecDeque<TokenId>>,
    fallback: TokenId,
    seq_step: AtomicUsize,
    fail_forward_after: Option<usize>,
    calls: Mutex<Vec<&'static str>>,
    prefills: Mutex<Vec<Vec<TokenId>>>,
    forwards: Mutex<Vec<TokenId>>,
}

impl ScriptedModule {
    pub(crate) fn new(first: TokenId, script: Vec<TokenId>, fallback: TokenId) -> Self {
        Self {
            first,
            script: Mutex::new(script.into()),
            fallback,
            seq_step: AtomicUsize::new(0),
            fail_forward_after: None,
            calls: Mutex::new(vec![]),
            prefills: Mutex::new(vec![]),
            forwards: Mutex::new(vec![]),
        }
    }

    pub(crate) fn with_seq_step(self, seq_step: usize) -> Self {
        self.seq_step.store(seq_step, Ordering::SeqCst);
        self
    }

    /// Make every `run_forward` after the first `count` calls fail.
    pub(crate) fn failing_forward_after(mut self, count: usize) -> Self {
        self.fail_forward_after = Some(count);
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, function: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| **call == function).count()
    }

    pub(crate) fn prefill_inputs(&self) -> Vec<Vec<TokenId>> {
        self.prefills.lock().unwrap().clone()
    }

    pub(crate) fn forward_inputs(&self) -> Vec<TokenId> {
        self.forwards.lock().unwrap().clone()
    }

    fn record(&self, function: &'static str) {
        self.calls.lock().unwrap().push(function);
    }

    fn prefill(&self, function: &'static str, input_ids: &[TokenId]) -> TokenId {
        self.record(function);
        self.prefills.lock().unwrap().push(input_ids.to_vec());
        self.seq_step.fetch_add(input_ids.len() + 1, Ordering::SeqCst);
        self.first
    }
}

#[async_trait]
impl CompiledModule for ScriptedModule {
    async fn run_initialize(&self, input_ids: &[TokenId]) -> Result<TokenId> {
        Ok(self.prefill(entry_point::RUN_INITIALIZE, input_ids))
    }

    async fn run_cached_initialize(&self, input_ids: &[TokenId]) -> Result<TokenId> {
        Ok(self.prefill(entry_point::RUN_CACHED_INITIALIZE, input_ids))
    }

    async fn run_forward(&self, token: TokenId) -> Result<TokenId> {
        self.record(entry_point::RUN_FORWARD);
        let forwarded = {
            let mut forwards = self.forwards.lock().unwrap();
            forwards.push(token);
            forwards.len()
        };
        if self.fail_forward_after.is_some_and(|limit| forwarded > limit) {
            return Err(KilnError::Runtime {
                function: entry_point::RUN_FORWARD,
                message: "scripted failure".to_string(),
            });
        }
        self.seq_step.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().unwrap().pop_front().unwrap_or(self.fallback))
    }

    async fn get_seq_step(&self) -> Result<usize> {
        self.record(entry_point::GET_SEQ_STEP);
        Ok(self.seq_step.load(Ordering::SeqCst))
    }

    async fn evict_kvcache_space(&self) -> Result<()> {
        self.record(entry_point::EVICT_KVCACHE_SPACE);
        self.seq_step.store(0, Ordering::SeqCst);
        Ok(())
    }
}

/// Tokenizer mapping each whitespace separated word to a token id by position,
/// and decoding ids as their decimal values.
pub(crate) struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text
            .split_whitespace()
            .enumerate()
            .map(|(i, _)| 100 + i as TokenId)
            .collect())
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String> {
        Ok(ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" "))
    }
}

/// Counts calls to every toolchain step and writes placeholder artifacts.
#[derive(Default)]
pub(crate) struct CountingToolchain {
    pub exports: AtomicUsize,
    pub param_generations: AtomicUsize,
    pub compiles: AtomicUsize,
    pub loads: AtomicUsize,
    pub tokenizer_loads: AtomicUsize,
    pub last_load: Mutex<Option<LoadRequest>>,
    pub last_compile: Mutex<Option<CompileRequest>>,
    pub last_export: Mutex<Option<ExportRequest>>,
    module: Mutex<Option<Arc<ScriptedModule>>>,
}

impl CountingToolchain {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the runtime hand out `module` instead of a default script.
    pub(crate) fn with_module(self: Arc<Self>, module: Arc<ScriptedModule>) -> Arc<Self> {
        *self.module.lock().unwrap() = Some(module);
        self
    }

    pub(crate) fn toolchain(self: &Arc<Self>) -> Toolchain {
        Toolchain {
            exporter: self.clone(),
            params: self.clone(),
            compiler: self.clone(),
            runtime: self.clone(),
            tokenizers: self.clone(),
        }
    }

    pub(crate) fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    pub(crate) fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub(crate) fn param_generations(&self) -> usize {
        self.param_generations.load(Ordering::SeqCst)
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exporter for CountingToolchain {
    async fn export(&self, request: &ExportRequest) -> Result<String> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        *self.last_export.lock().unwrap() = Some(request.clone());
        Ok(format!("module @{} {{}}", request.hf_model_name))
    }
}

#[async_trait]
impl ParamGenerator for CountingToolchain {
    async fn generate(&self, request: &ParamRequest) -> Result<()> {
        self.param_generations.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(&request.weight_path, b"weights").await?;
        Ok(())
    }
}

#[async_trait]
impl Compiler for CountingToolchain {
    async fn compile(&self, request: &CompileRequest) -> Result<()> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        *self.last_compile.lock().unwrap() = Some(request.clone());
        tokio::fs::write(&request.output, b"vmfb").await?;
        Ok(())
    }
}

#[async_trait]
impl Runtime for CountingToolchain {
    async fn load(&self, request: &LoadRequest) -> Result<Arc<dyn CompiledModule>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.last_load.lock().unwrap() = Some(request.clone());
        let module: Arc<dyn CompiledModule> = self
            .module
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Arc::new(ScriptedModule::new(5, vec![], 2)));
        Ok(module)
    }
}

#[async_trait]
impl TokenizerLoader for CountingToolchain {
    async fn load(&self, _hf_model_name: &str, _auth_token: Option<&str>) -> Result<Arc<dyn Tokenizer>> {
        self.tokenizer_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(WordTokenizer))
    }
}
