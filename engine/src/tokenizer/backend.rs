//! Tokenizer backends
//!
//! A backend counts tokens exactly for the model families it knows. The
//! [`BackendManager`] routes each model to the first backend that supports it
//! and turns every miss or failure into an estimate.

use thiserror::Error;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

use super::estimate::{estimate_tokens, CHARS_PER_TOKEN};
use super::telemetry::{Telemetry, ESTIMATION_BACKEND};

/// Tokenizer backend errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be constructed
    #[error("Tokenizer backend unavailable: {0}")]
    Unavailable(String),
    /// The backend does not handle this model
    #[error("Model not supported by {backend}: {model}")]
    UnsupportedModel { backend: String, model: String },
    /// Counting failed
    #[error("Tokenizer backend failed: {0}")]
    Failed(String),
}

/// A pluggable exact tokenizer
pub trait TokenizerBackend: Send + Sync {
    /// Stable name used in telemetry and listings
    fn name(&self) -> &str;

    /// Encoding used for `model`, or None if unsupported
    fn encoding_for(&self, model: &str) -> Option<&str>;

    fn count(&self, content: &str, model: &str) -> Result<u32, BackendError>;
}

/// BPE tokenizers from tiktoken
pub struct TiktokenBackend {
    o200k: CoreBPE,
    cl100k: CoreBPE,
}

impl TiktokenBackend {
    pub const NAME: &'static str = "tiktoken";

    /// Load both encodings; fails if either table cannot be built
    pub fn new() -> Result<Self, BackendError> {
        let o200k = o200k_base().map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let cl100k = cl100k_base().map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self { o200k, cl100k })
    }

    fn encoding(&self, name: &str) -> Option<&CoreBPE> {
        match name {
            "o200k_base" => Some(&self.o200k),
            "cl100k_base" => Some(&self.cl100k),
            _ => None,
        }
    }
}

/// Map an OpenAI model name to its tiktoken encoding
pub fn tiktoken_encoding_for(model: &str) -> Option<&'static str> {
    const O200K: [&str; 7] = ["gpt-4o", "chatgpt-4o", "gpt-4.1", "gpt-4.5", "gpt-5", "o1", "o3"];
    const CL100K: [&str; 5] =
        ["gpt-4", "gpt-3.5", "gpt-35", "text-embedding-3", "text-embedding-ada"];

    let model = model.trim().to_ascii_lowercase();
    if O200K.iter().any(|p| model.starts_with(p)) || model.starts_with("o4") {
        Some("o200k_base")
    } else if CL100K.iter().any(|p| model.starts_with(p)) {
        Some("cl100k_base")
    } else {
        None
    }
}

impl TokenizerBackend for TiktokenBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn encoding_for(&self, model: &str) -> Option<&str> {
        tiktoken_encoding_for(model)
    }

    fn count(&self, content: &str, model: &str) -> Result<u32, BackendError> {
        let bpe = tiktoken_encoding_for(model)
            .and_then(|name| self.encoding(name))
            .ok_or_else(|| BackendError::UnsupportedModel {
                backend: Self::NAME.to_owned(),
                model: model.to_owned(),
            })?;

        let tokens = bpe.encode_ordinary(content).len();
        u32::try_from(tokens).map_err(|e| BackendError::Failed(e.to_string()))
    }
}

/// Why a count came from the estimator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No backend could be constructed
    BackendUnavailable,
    /// No backend handles the model
    UnsupportedModel,
    /// The backend raised an error for this call
    BackendError(String),
}

/// Outcome of one model-aware count
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCount {
    Exact { backend: String, tokens: u32 },
    Estimated { tokens: u32, reason: FallbackReason },
}

impl TokenCount {
    pub fn tokens(&self) -> u32 {
        match self {
            Self::Exact { tokens, .. } | Self::Estimated { tokens, .. } => *tokens,
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, Self::Estimated { .. })
    }

    /// Estimate `content` for the given reason
    pub(crate) fn estimated(content: &str, reason: FallbackReason) -> Self {
        Self::Estimated { tokens: estimate_tokens(content), reason }
    }
}

/// Label reported when estimation answers for a model
pub fn estimation_label() -> String {
    format!("Estimated (~{} chars/token)", CHARS_PER_TOKEN)
}

/// Routes models to backends
pub struct BackendManager {
    backends: Vec<Box<dyn TokenizerBackend>>,
}

impl BackendManager {
    pub fn new(backends: Vec<Box<dyn TokenizerBackend>>) -> Self {
        Self { backends }
    }

    /// Construct the built-in backends
    pub fn with_default_backends() -> Result<Self, BackendError> {
        let tiktoken = TiktokenBackend::new()?;
        Ok(Self::new(vec![Box::new(tiktoken)]))
    }

    /// Backend names, in routing order, followed by the estimator
    pub fn available(&self) -> Vec<String> {
        self.backends
            .iter()
            .map(|b| b.name().to_owned())
            .chain(std::iter::once(ESTIMATION_BACKEND.to_owned()))
            .collect()
    }

    fn resolve(&self, model: &str) -> Option<(&dyn TokenizerBackend, &str)> {
        self.backends
            .iter()
            .find_map(|b| b.encoding_for(model).map(|enc| (b.as_ref(), enc)))
    }

    /// Backend identifier for `model`, e.g. `tiktoken:o200k_base`
    pub fn detect(&self, model: &str) -> String {
        match self.resolve(model) {
            Some((backend, encoding)) => format!("{}:{}", backend.name(), encoding),
            None => ESTIMATION_BACKEND.to_owned(),
        }
    }

    /// Human-readable name of what will count tokens for `model`
    pub fn method_label(&self, model: &str) -> String {
        match self.resolve(model) {
            Some((backend, encoding)) => format!("{} ({})", backend.name(), encoding),
            None => estimation_label(),
        }
    }

    /// Count with the routed backend, falling back to estimation on any failure
    pub fn count(&self, content: &str, model: &str, telemetry: &mut Telemetry) -> TokenCount {
        let Some((backend, _)) = self.resolve(model) else {
            telemetry.record_estimation();
            return TokenCount::estimated(content, FallbackReason::UnsupportedModel);
        };

        match backend.count(content, model) {
            Ok(tokens) => {
                telemetry.record_call(backend.name());
                TokenCount::Exact { backend: backend.name().to_owned(), tokens }
            }
            Err(e) => {
                log::debug!("{} failed for model {}: {}; estimating", backend.name(), model, e);
                telemetry.record_backend_error(backend.name());
                TokenCount::estimated(content, FallbackReason::BackendError(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager").field("backends", &self.available()).finish()
    }
}


#[cfg(test)]
#[allow(clippy::str_to_string)]
mod tests {
    use super::test_backends::{FailingBackend, WordBackend};
    use super::*;

    #[test]
    fn test_encoding_routing() {
        assert_eq!(tiktoken_encoding_for("gpt-4o"), Some("o200k_base"));
        assert_eq!(tiktoken_encoding_for("gpt-4o-mini"), Some("o200k_base"));
        assert_eq!(tiktoken_encoding_for("o3-mini"), Some("o200k_base"));
        assert_eq!(tiktoken_encoding_for("GPT-4"), Some("cl100k_base"));
        assert_eq!(tiktoken_encoding_for("gpt-3.5-turbo"), Some("cl100k_base"));
        assert_eq!(tiktoken_encoding_for("claude-3-5-sonnet"), None);
        assert_eq!(tiktoken_encoding_for("gemini-pro"), None);
    }

    #[test]
    fn test_exact_gpt4o_counting() {
        let backend = TiktokenBackend::new().unwrap();
        let count = backend.count("Hello, world!", "gpt-4o").unwrap();
        assert!(count > 0);
        assert!(count < 10);
    }

    #[test]
    fn test_exact_gpt4_counting() {
        let backend = TiktokenBackend::new().unwrap();
        let count = backend.count("def hello():\n    print('Hello, World!')\n", "gpt-4").unwrap();
        assert!(count > 5);
        assert!(count < 30);
    }

    #[test]
    fn test_tiktoken_rejects_unknown_model() {
        let backend = TiktokenBackend::new().unwrap();
        let err = backend.count("text", "claude").unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedModel { .. }));
    }

    #[test]
    fn test_manager_routes_and_records() {
        let manager = BackendManager::new(vec![Box::new(WordBackend)]);
        let mut telemetry = Telemetry::new();

        let count = manager.count("one two three", "word-model", &mut telemetry);
        assert_eq!(count, TokenCount::Exact { backend: "words".to_owned(), tokens: 3 });

        let count = manager.count("abcdefgh", "claude", &mut telemetry);
        assert_eq!(count.tokens(), 2);
        assert!(matches!(
            count,
            TokenCount::Estimated { reason: FallbackReason::UnsupportedModel, .. }
        ));

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.get("words").call_count, 1);
        assert_eq!(snapshot.get(ESTIMATION_BACKEND).estimation_fallback_count, 1);
    }

    #[test]
    fn test_manager_absorbs_backend_error() {
        let manager = BackendManager::new(vec![Box::new(FailingBackend)]);
        let mut telemetry = Telemetry::new();

        let count = manager.count("abcdefghi", "anything", &mut telemetry);
        assert_eq!(count.tokens(), estimate_tokens("abcdefghi"));
        assert!(count.is_estimated());

        let failing = telemetry.snapshot().get("failing");
        assert_eq!(failing.call_count, 1);
        assert_eq!(failing.error_count, 1);
        assert_eq!(failing.estimation_fallback_count, 1);
    }

    #[test]
    fn test_detect_and_label() {
        let manager = BackendManager::with_default_backends().unwrap();
        assert_eq!(manager.detect("gpt-4o"), "tiktoken:o200k_base");
        assert_eq!(manager.detect("gpt-4"), "tiktoken:cl100k_base");
        assert_eq!(manager.detect("claude"), ESTIMATION_BACKEND);

        assert_eq!(manager.method_label("gpt-4"), "tiktoken (cl100k_base)");
        assert!(manager.method_label("llama").contains("Estimated"));
        assert_eq!(manager.available(), vec!["tiktoken", ESTIMATION_BACKEND]);
    }
}
