use crate::error::TokenizerError;
use std::path::Path;

/// Maps text to a token count. Used for sizing `max_tokens` and for throughput.
///
/// Implementations must be deterministic: the same text always yields the same count.
pub trait TokenCounter: Send + Sync {
    /// # Errors
    ///
    /// Returns `TokenizerError` if the text cannot be tokenized.
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError>;

    fn name(&self) -> &str;
}

/// Counts whitespace separated words. Good enough when no tokenizer file is at hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(text.split_whitespace().count())
    }

    fn name(&self) -> &str {
        "whitespace"
    }
}

/// A HuggingFace `tokenizer.json`, counted with special tokens included.
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
    name: String,
}

impl HfTokenCounter {
    pub fn from_file(path: &Path) -> Result<Self, TokenizerError> {
        let tokenizer =
            tokenizers::Tokenizer::from_file(path).map_err(|e| TokenizerError::LoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            tokenizer,
            name: path.display().to_string(),
        })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        self.tokenizer
            .encode(text, true)
            .map(|encoding| encoding.get_ids().len())
            .map_err(|e| TokenizerError::EncodingFailed(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
