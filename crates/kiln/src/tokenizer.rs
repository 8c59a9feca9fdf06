//! Tokenizer contract.
//!
//! Generation only needs two operations: turn prompt text into token ids and
//! turn the accumulated history back into text. Implementations are expected
//! to be cheap to call repeatedly, since the whole history is decoded after
//! every generated token.

use crate::error::Result;

/// Token id as produced by the tokenizer and the compiled module.
pub type TokenId = u32;

pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids, including any special tokens the model expects.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Decode token ids back into text.
    fn decode(&self, ids: &[TokenId]) -> Result<String>;
}

#[cfg_attr(docsrs, doc(cfg(feature = "hf-tokenizer")))]
#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::{TokenId, Tokenizer};
    use crate::error::{KilnError, Result};
    use std::path::Path;

    /// Tokenizer backed by a HuggingFace `tokenizer.json`.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: &Path) -> Result<Self> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| KilnError::Tokenizer(format!("{}: {}", path.display(), e)))?;
            Ok(Self { inner })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
            let encoding = self
                .inner
                .encode(text, true)
                .map_err(|e| KilnError::Tokenizer(e.to_string()))?;
            Ok(encoding.get_ids().to_vec())
        }

        fn decode(&self, ids: &[TokenId]) -> Result<String> {
            self.inner
                .decode(ids, false)
                .map_err(|e| KilnError::Tokenizer(e.to_string()))
        }
    }

}
