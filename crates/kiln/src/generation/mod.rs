//! # Generation
//!
//! The token-by-token generation loop that drives a [`CompiledModule`].
//!
//! ## Overview
//!
//! A chat moves through three phases:
//!
//! 1. **Init**: the prompt is prefilled with `run_initialize` (first chat, or
//!    any chat when not streaming) or `run_cached_initialize` (streaming mode,
//!    on top of the cache left by earlier chats).
//! 2. **Generating**: `run_forward` is called with the last token until the
//!    model emits the stop token. After every forward call the whole history is
//!    decoded and streamed to the caller together with the step latency.
//! 3. **Stopped**: either the stop token was produced or the model's token
//!    budget ran out.
//!
//! ## Streaming KV Cache
//!
//! In streaming mode the module keeps its cache between chats, so only the
//! tokens it has not yet seen are sent on the next prefill. Before every
//! module call the cache position is checked and, past
//! [`EVICTION_THRESHOLD`], space is evicted first.
//!
//! ## Failure Semantics
//!
//! Errors from the module or tokenizer end the chat immediately and are
//! delivered as the last item of the [`ChatStream`]. Nothing is retried.

mod stream;
mod worker;

pub use stream::ChatStream;
pub(crate) use worker::GenerationWorker;

use crate::error::{KilnError, Result};
use crate::module::CompiledModule;
use crate::tokenizer::{TokenId, Tokenizer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Cache position past which streaming mode evicts KV cache space.
pub const EVICTION_THRESHOLD: usize = 600;

/// Per-model generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfig {
    pub stop_token: TokenId,
    pub max_tokens: usize,
    pub streaming: bool,
}

/// Mutable state of one session, carried from chat to chat.
#[derive(Debug, Clone)]
pub struct GenerationState {
    /// Tokens generated by the most recent chat.
    pub history: Vec<TokenId>,

    /// Number of tokens the module has seen, used to skip them on the next prefill.
    pub prev_token_len: usize,

    /// Completed chats.
    pub global_iter: usize,

    /// Whether the module cache is still empty.
    pub first_input: bool,
}

impl Default for GenerationState {
    fn default() -> Self {
        Self {
            history: vec![],
            prev_token_len: 0,
            global_iter: 0,
            first_input: true,
        }
    }
}

/// One decoded step, streamed after every forward call.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Decoded text of everything generated so far.
    pub text: String,
    pub token: TokenId,
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopToken,
    MaxTokens,
    /// The caller dropped the stream; no output is delivered.
    Abandoned,
}

/// Final result of a chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutput {
    pub text: String,
    pub tokens: Vec<TokenId>,
    /// Latency of the last module call.
    pub latency: Duration,
    pub reason: StopReason,
}

impl ChatOutput {
    pub fn stopped_on_token(&self) -> bool {
        self.reason == StopReason::StopToken
    }
}

/// Items yielded by a [`ChatStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Token(Step),
    Done(ChatOutput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Generating(TokenId),
    Stopped(StopReason),
}

/// Where generated steps go, and whether anyone is still listening.
pub(crate) struct StepSink {
    sender: UnboundedSender<Result<ChatEvent>>,
    running: Arc<AtomicBool>,
}

impl StepSink {
    pub(crate) fn new(sender: UnboundedSender<Result<ChatEvent>>, running: Arc<AtomicBool>) -> Self {
        Self { sender, running }
    }

    fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn step(&self, step: Step) {
        // A closed receiver is picked up by `is_open` before the next call.
        let _ = self.sender.send(Ok(ChatEvent::Token(step)));
    }

    /// Deliver the outcome of the chat as the last stream item.
    pub(crate) fn finish(&self, outcome: Result<ChatOutput>) {
        match outcome {
            Ok(output) if output.reason == StopReason::Abandoned => {}
            Ok(output) => {
                let _ = self.sender.send(Ok(ChatEvent::Done(output)));
            }
            Err(e) => {
                let _ = self.sender.send(Err(e));
            }
        }
    }
}

/// Drives one chat against a module.
pub(crate) struct GenerationLoop<'a> {
    pub module: &'a dyn CompiledModule,
    pub tokenizer: &'a dyn Tokenizer,
    pub config: GenerationConfig,
    pub state: &'a mut GenerationState,
}

impl GenerationLoop<'_> {
    /// Run the chat for `input_ids` to completion, streaming steps into `sink`.
    pub(crate) async fn run(self, input_ids: &[TokenId], sink: &StepSink) -> Result<ChatOutput> {
        let GenerationLoop { module, tokenizer, config, state } = self;
        if config.max_tokens == 0 {
            return Err(KilnError::InvalidConfig("token budget is zero".to_string()));
        }

        let input = if config.streaming {
            let skip = state.prev_token_len.saturating_sub(1).min(input_ids.len());
            &input_ids[skip..]
        } else {
            input_ids
        };

        let mut history: Vec<TokenId> = Vec::new();
        let mut latency = Duration::ZERO;
        let mut phase = Phase::Init;

        loop {
            phase = match phase {
                Phase::Init => {
                    if !sink.is_open() {
                        Phase::Stopped(StopReason::Abandoned)
                    } else {
                        maybe_evict(module, config).await?;
                        let cached = config.streaming && !state.first_input;
                        debug!(input_len = input.len(), cached, "prefilling");
                        let start = Instant::now();
                        let token = if cached {
                            module.run_cached_initialize(input).await?
                        } else {
                            module.run_initialize(input).await?
                        };
                        latency = start.elapsed();
                        state.first_input = false;
                        history.push(token);
                        next_phase(token, history.len(), config)
                    }
                }
                Phase::Generating(last) => {
                    if !sink.is_open() {
                        Phase::Stopped(StopReason::Abandoned)
                    } else {
                        maybe_evict(module, config).await?;
                        let start = Instant::now();
                        let token = module.run_forward(last).await?;
                        latency = start.elapsed();
                        history.push(token);
                        sink.step(Step {
                            text: tokenizer.decode(&history)?,
                            token,
                            latency,
                        });
                        next_phase(token, history.len(), config)
                    }
                }
                Phase::Stopped(reason) => {
                    if reason == StopReason::Abandoned {
                        debug!(generated = history.len(), "chat abandoned");
                        return Ok(ChatOutput { text: String::new(), tokens: history, latency, reason });
                    }
                    state.prev_token_len = input.len() + 1 + history.len();
                    state.global_iter += 1;
                    let text = tokenizer.decode(&history)?;
                    info!(generated = history.len(), ?reason, "chat finished");
                    state.history = history.clone();
                    return Ok(ChatOutput { text, tokens: history, latency, reason });
                }
            };
        }
    }
}

fn next_phase(token: TokenId, generated: usize, config: GenerationConfig) -> Phase {
    if token == config.stop_token {
        Phase::Stopped(StopReason::StopToken)
    } else if generated >= config.max_tokens {
        Phase::Stopped(StopReason::MaxTokens)
    } else {
        Phase::Generating(token)
    }
}

async fn maybe_evict(module: &dyn CompiledModule, config: GenerationConfig) -> Result<()> {
    if !config.streaming {
        return Ok(());
    }
    let seq_step = module.get_seq_step().await?;
    if seq_step > EVICTION_THRESHOLD {
        info!(seq_step, "evicting cache space");
        module.evict_kvcache_space().await?;
    }
    Ok(())
}
