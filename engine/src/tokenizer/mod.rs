//! Token accounting
//!
//! [`TokenService`] answers "how many tokens does this content cost for this
//! model". Exact counts come from a [`BackendManager`] that is built lazily on
//! first use, at most once per service. When the manager cannot be built, or a
//! backend fails on a given call, the answer is the deterministic estimate from
//! [`estimate_tokens`]. No entry point returns an error.

pub mod backend;
pub mod estimate;
pub mod telemetry;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub use backend::{
    estimation_label, BackendError, BackendManager, FallbackReason, TiktokenBackend, TokenCount,
    TokenizerBackend,
};
pub use estimate::{estimate_tokens, extension_of, truncate_to_budget, CHARS_PER_TOKEN};
pub use telemetry::{Telemetry, TelemetryCounters, TelemetrySnapshot, ESTIMATION_BACKEND};

use crate::config::TokenizerConfig;

/// Builds the backend manager; called at most once per service
pub type BackendFactory = Arc<dyn Fn() -> Result<BackendManager, BackendError> + Send + Sync>;

/// Model-aware token counting with estimation fallback
pub struct TokenService {
    factory: BackendFactory,
    manager: OnceCell<Option<BackendManager>>,
    telemetry: Mutex<Telemetry>,
}

impl Default for TokenService {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenService {
    /// Service backed by the built-in tokenizers
    pub fn new() -> Self {
        Self::with_factory(Arc::new(BackendManager::with_default_backends))
    }

    /// Service whose backend construction is supplied by the caller
    pub fn with_factory(factory: BackendFactory) -> Self {
        Self { factory, manager: OnceCell::new(), telemetry: Mutex::new(Telemetry::new()) }
    }

    /// Service that never constructs a backend
    pub fn estimation_only() -> Self {
        Self::with_factory(Arc::new(|| {
            Err(BackendError::Unavailable("exact tokenization disabled".to_owned()))
        }))
    }

    pub fn from_config(config: &TokenizerConfig) -> Self {
        if config.exact {
            Self::new()
        } else {
            Self::estimation_only()
        }
    }

    /// Build the manager on first use; remember failure as well as success
    async fn manager(&self) -> Option<&BackendManager> {
        self.manager
            .get_or_init(|| async {
                let factory = Arc::clone(&self.factory);
                match tokio::task::spawn_blocking(move || factory()).await {
                    Ok(Ok(manager)) => {
                        log::debug!("Tokenizer backends ready: {:?}", manager.available());
                        Some(manager)
                    }
                    Ok(Err(e)) => {
                        log::warn!("{}; token counts will be estimated", e);
                        None
                    }
                    Err(e) => {
                        log::warn!("Tokenizer initialization aborted: {}; token counts will be estimated", e);
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Estimate tokens for a file's content. Never touches a backend.
    pub fn calculate(&self, content: &str, filename: &str) -> u32 {
        let tokens = estimate_tokens(content);
        log::trace!(
            "Estimated {} tokens for {} (ext: {})",
            tokens,
            filename,
            extension_of(filename).as_deref().unwrap_or("none")
        );
        self.telemetry.lock().record_estimation();
        tokens
    }

    /// Count tokens for `model`, reporting whether the count is exact
    pub async fn count_for_model(&self, content: &str, model: &str) -> TokenCount {
        match self.manager().await {
            Some(manager) => manager.count(content, model, &mut self.telemetry.lock()),
            None => {
                self.telemetry.lock().record_estimation();
                TokenCount::estimated(content, FallbackReason::BackendUnavailable)
            }
        }
    }

    /// Count tokens for `model`; estimates when no exact count is possible
    pub async fn calculate_for_model(&self, content: &str, model: &str) -> u32 {
        self.count_for_model(content, model).await.tokens()
    }

    /// Human-readable name of the method used for `model`
    ///
    /// Contains `Estimated` whenever no exact backend applies.
    pub async fn get_method_for_model(&self, model: &str) -> String {
        match self.manager().await {
            Some(manager) => manager.method_label(model),
            None => estimation_label(),
        }
    }

    pub async fn get_available_tokenizers(&self) -> Vec<String> {
        match self.manager().await {
            Some(manager) => manager.available(),
            None => vec![ESTIMATION_BACKEND.to_owned()],
        }
    }

    /// Backend identifier for `model`
    pub async fn detect_tokenizer(&self, model: &str) -> String {
        match self.manager().await {
            Some(manager) => manager.detect(model),
            None => ESTIMATION_BACKEND.to_owned(),
        }
    }

    pub async fn is_backend_available(&self) -> bool {
        self.manager().await.is_some()
    }

    pub async fn get_telemetry(&self) -> TelemetrySnapshot {
        self.manager().await;
        self.telemetry.lock().snapshot()
    }

    pub async fn reset_telemetry(&self) {
        self.manager().await;
        self.telemetry.lock().reset();
    }

    /// Cut `content` to fit an estimated budget
    pub fn truncate_to_budget<'a>(&self, content: &'a str, budget: u32) -> &'a str {
        truncate_to_budget(content, budget)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("initialized", &self.manager.initialized())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::str_to_string)]
mod tests {
    use super::backend::test_backends::FailingBackend;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unavailable_service(attempts: Arc<AtomicUsize>) -> TokenService {
        TokenService::with_factory(Arc::new(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Unavailable("native module missing".to_owned()))
        }))
    }

    #[test]
    fn test_calculate_never_fails() {
        let service = TokenService::estimation_only();
        assert_eq!(service.calculate("", "empty.txt"), 0);
        assert_eq!(service.calculate("abcde", "file.unknownext"), 2);
        assert_eq!(service.calculate("x", ""), 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_matches_calculate() {
        let service = unavailable_service(Arc::new(AtomicUsize::new(0)));
        for content in ["", "a", "fn main() {}\n", "日本語のテキスト"] {
            assert_eq!(
                service.calculate_for_model(content, "gpt-4o").await,
                service.calculate(content, "main.rs")
            );
        }
    }

    #[tokio::test]
    async fn test_construction_attempted_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let service = unavailable_service(Arc::clone(&attempts));

        let (a, b, c) = tokio::join!(
            service.calculate_for_model("one", "gpt-4"),
            service.get_method_for_model("gpt-4"),
            service.detect_tokenizer("gpt-4"),
        );
        assert_eq!(a, 1);
        assert!(b.contains("Estimated"));
        assert_eq!(c, ESTIMATION_BACKEND);

        service.get_available_tokenizers().await;
        service.get_telemetry().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!service.is_backend_available().await);
    }

    #[tokio::test]
    async fn test_unavailable_backend_introspection() {
        let service = TokenService::estimation_only();
        assert_eq!(service.get_available_tokenizers().await, vec![ESTIMATION_BACKEND]);
        assert!(service.get_method_for_model("gpt-4o").await.contains("Estimated"));

        let count = service.count_for_model("abcd", "gpt-4o").await;
        assert!(matches!(
            count,
            TokenCount::Estimated { tokens: 1, reason: FallbackReason::BackendUnavailable }
        ));
    }

    #[tokio::test]
    async fn test_exact_counting_with_default_backends() {
        let service = TokenService::new();
        let count = service.count_for_model("Hello, world!", "gpt-4o").await;
        assert!(!count.is_estimated());
        assert!(count.tokens() > 0 && count.tokens() < 10);

        assert_eq!(service.get_method_for_model("gpt-4o").await, "tiktoken (o200k_base)");
        assert!(service.get_method_for_model("claude").await.contains("Estimated"));
        assert_eq!(service.detect_tokenizer("gpt-3.5-turbo").await, "tiktoken:cl100k_base");
    }

    #[tokio::test]
    async fn test_backend_error_is_absorbed() {
        let service = TokenService::with_factory(Arc::new(|| {
            Ok(BackendManager::new(vec![Box::new(FailingBackend)]))
        }));

        let tokens = service.calculate_for_model("abcdefgh", "gpt-4").await;
        assert_eq!(tokens, 2);

        let telemetry = service.get_telemetry().await;
        let failing = telemetry.get("failing");
        assert_eq!(failing.call_count, 1);
        assert_eq!(failing.estimation_fallback_count, 1);
    }

    #[tokio::test]
    async fn test_telemetry_and_reset() {
        let service = TokenService::new();
        service.calculate_for_model("fn main() {}", "gpt-4o").await;
        service.calculate_for_model("fn main() {}", "claude").await;
        service.calculate("text", "a.md");

        let snapshot = service.get_telemetry().await;
        assert_eq!(snapshot.get(TiktokenBackend::NAME).call_count, 1);
        assert_eq!(snapshot.get(ESTIMATION_BACKEND).call_count, 2);

        service.reset_telemetry().await;
        assert_eq!(service.get_telemetry().await.total(), TelemetryCounters::default());
    }

    #[test]
    fn test_from_config_disables_exact() {
        let service = TokenService::from_config(&TokenizerConfig { exact: false });
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        assert!(!rt.block_on(service.is_backend_available()));
    }
}
