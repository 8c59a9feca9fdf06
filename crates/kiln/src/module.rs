use async_trait::async_trait;
use crate::error::Result;
use crate::tokenizer::TokenId;

/// Name of the module exported for regular generation.
pub const STATE_UPDATE: &str = "state_update";

/// Name of the module exported for generation with a bounded, evictable KV cache.
pub const STREAMING_STATE_UPDATE: &str = "streaming_state_update";

/// Entry point names exposed by every compiled chat module.
pub mod entry_point {
    pub const RUN_INITIALIZE: &str = "run_initialize";
    pub const RUN_CACHED_INITIALIZE: &str = "run_cached_initialize";
    pub const RUN_FORWARD: &str = "run_forward";
    pub const GET_SEQ_STEP: &str = "get_seq_step";
    pub const EVICT_KVCACHE_SPACE: &str = "evict_kvcache_space";
}

/// Module name to load for the given mode.
pub fn module_name(streaming: bool) -> &'static str {
    if streaming { STREAMING_STATE_UPDATE } else { STATE_UPDATE }
}

/// # CompiledModule
///
/// The callable surface of a compiled chat model once it is loaded into a
/// runtime. The module owns its key/value cache; callers only pass token ids
/// in and receive the next token id back.
///
/// ## Call Order
///
/// A generation starts with [`run_initialize`](CompiledModule::run_initialize)
/// (empty cache) or [`run_cached_initialize`](CompiledModule::run_cached_initialize)
/// (streaming mode, cache kept from a previous chat), followed by any number of
/// [`run_forward`](CompiledModule::run_forward) calls, each fed the token the
/// previous call returned.
///
/// In streaming mode [`get_seq_step`](CompiledModule::get_seq_step) reports how
/// far the cache has been filled and
/// [`evict_kvcache_space`](CompiledModule::evict_kvcache_space) frees room in it.
#[async_trait]
pub trait CompiledModule: Send + Sync {
    /// Prefill an empty cache with `input_ids` and return the first generated token.
    async fn run_initialize(&self, input_ids: &[TokenId]) -> Result<TokenId>;

    /// Prefill on top of the existing cache and return the first generated token.
    async fn run_cached_initialize(&self, input_ids: &[TokenId]) -> Result<TokenId>;

    /// Decode one step from `token`.
    async fn run_forward(&self, token: TokenId) -> Result<TokenId>;

    /// Current position in the cache.
    async fn get_seq_step(&self) -> Result<usize>;

    /// Drop cached entries to make room for more tokens.
    async fn evict_kvcache_space(&self) -> Result<()>;
}
