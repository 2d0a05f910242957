use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::ContextStore;
use crate::llm::{ChatMessage, CompletionBackend, CompletionError};

/// One translation job.
#[derive(Debug, Clone)]
pub struct TranslationRequest<'a> {
    pub text: &'a str,
    pub source_language: &'a str,
    pub target_language: &'a str,
    /// Channel the text was written in; selects the context buffer.
    pub channel: &'a str,
    /// Inbound message the text belongs to. Requests sharing an id are
    /// recorded once.
    pub message_id: u64,
    /// Append the text to the context buffer. Quotes of earlier messages
    /// only read the buffer.
    pub record: bool,
}

/// Outcome of a translation.
#[derive(Debug)]
pub enum Translation {
    Translated(String),
    /// Nothing to translate.
    Skipped,
    Failed(CompletionError),
}

impl Translation {
    pub fn text(&self) -> Option<&str> {
        match self {
            Translation::Translated(text) => Some(text),
            _ => None,
        }
    }

    /// The translated text, or an empty string when unavailable.
    pub fn into_text(self) -> String {
        match self {
            Translation::Translated(text) => text,
            _ => String::new(),
        }
    }
}

pub struct Translator {
    backend: Arc<dyn CompletionBackend>,
    context: Arc<ContextStore>,
    system_prompt: String,
}

impl Translator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        context: Arc<ContextStore>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            context,
            system_prompt: system_prompt.into(),
        }
    }

    /// Translate `request.text`. Never fails: backend errors are logged and
    /// come back as [`Translation::Failed`].
    pub async fn translate(&self, request: &TranslationRequest<'_>) -> Translation {
        if request.text.trim().is_empty() {
            return Translation::Skipped;
        }

        let prior = if request.record {
            self.context
                .record_and_prior(request.channel, request.message_id, request.text)
                .await
        } else {
            self.context.snapshot(request.channel).await
        };
        let messages = build_messages(&self.system_prompt, request, &prior);

        debug!(
            "Translating {} chars {} -> {}",
            request.text.chars().count(),
            request.source_language,
            request.target_language
        );

        match self.backend.complete(&messages).await {
            Ok(text) => Translation::Translated(text),
            Err(e) => {
                warn!(
                    "Translation {} -> {} failed: {}",
                    request.source_language, request.target_language, e
                );
                Translation::Failed(e)
            }
        }
    }
}

/// Separator used when flattening prior context into one message.
pub const CONTEXT_SEPARATOR: &str = " | ";

pub fn build_messages(
    system_prompt: &str,
    request: &TranslationRequest<'_>,
    prior: &[String],
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];

    if !prior.is_empty() {
        messages.push(ChatMessage::user(format!(
            "Context (for reference, do not translate): {}",
            prior.join(CONTEXT_SEPARATOR)
        )));
    }

    messages.push(ChatMessage::user(format!(
        "Translate the following text from {} to {}:\n{}",
        request.source_language, request.target_language, request.text
    )));

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextConfig, ContextScope};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns every message's content joined with newlines.
    struct EchoBackend {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl EchoBackend {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok(messages
                .iter()
                .filter_map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    struct RateLimitedBackend;

    #[async_trait]
    impl CompletionBackend for RateLimitedBackend {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CompletionError> {
            Err(CompletionError::RateLimited("slow down".to_string()))
        }
    }

    fn context(capacity: usize) -> Arc<ContextStore> {
        Arc::new(ContextStore::new(&ContextConfig {
            capacity,
            scope: ContextScope::Shared,
        }))
    }

    fn request(message_id: u64, text: &str) -> TranslationRequest<'_> {
        TranslationRequest {
            text,
            source_language: "zh",
            target_language: "ja",
            channel: "中文",
            message_id,
            record: true,
        }
    }

    #[tokio::test]
    async fn test_echo_contains_languages_and_text() {
        let backend = Arc::new(EchoBackend::new());
        let translator = Translator::new(backend.clone(), context(12), "SYSTEM");

        let out = translator.translate(&request(1, "今天打副本吗")).await.into_text();

        assert!(out.starts_with("SYSTEM"));
        assert!(out.contains("from zh to ja"));
        assert!(out.contains("今天打副本吗"));
        assert!(!out.contains("Context (for reference"));
        assert_eq!(backend.calls.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_context_segment_matches_prior_snapshot() {
        let backend = Arc::new(EchoBackend::new());
        let ctx = context(12);
        let translator = Translator::new(backend.clone(), ctx.clone(), "SYSTEM");

        translator.translate(&request(1, "第一句")).await;
        translator.translate(&request(2, "第二句")).await;
        let prior = ctx.snapshot("中文").await;

        let out = translator.translate(&request(3, "第三句")).await.into_text();

        let expected = format!(
            "Context (for reference, do not translate): {}",
            prior.join(CONTEXT_SEPARATOR)
        );
        assert!(out.contains(&expected));
        assert_eq!(prior, vec!["第一句", "第二句"]);
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[2].len(), 3);
        assert_eq!(calls[2][1].content.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_rate_limit_yields_empty_string() {
        let ctx = context(12);
        let translator = Translator::new(Arc::new(RateLimitedBackend), ctx.clone(), "SYSTEM");

        let result = translator.translate(&request(1, "hello")).await;
        assert!(matches!(result, Translation::Failed(CompletionError::RateLimited(_))));
        assert_eq!(result.into_text(), "");

        // Recorded even though the request failed.
        assert_eq!(ctx.snapshot("中文").await, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_blank_text_is_skipped_without_request() {
        let backend = Arc::new(EchoBackend::new());
        let ctx = context(12);
        let translator = Translator::new(backend.clone(), ctx.clone(), "SYSTEM");

        let result = translator.translate(&request(1, "   \n")).await;
        assert!(matches!(result, Translation::Skipped));
        assert!(backend.calls.lock().unwrap().is_empty());
        assert!(ctx.snapshot("中文").await.is_empty());
    }

    #[tokio::test]
    async fn test_read_only_request_uses_whole_buffer() {
        let backend = Arc::new(EchoBackend::new());
        let ctx = context(12);
        let translator = Translator::new(backend.clone(), ctx.clone(), "SYSTEM");

        translator.translate(&request(1, "一")).await;
        translator.translate(&request(2, "二")).await;
        let quote = TranslationRequest {
            record: false,
            ..request(1, "一")
        };
        let out = translator.translate(&quote).await.into_text();

        assert!(out.contains("Context (for reference, do not translate): 一 | 二"));
        assert_eq!(ctx.snapshot("中文").await, vec!["一", "二"]);
    }

    #[test]
    fn test_build_messages_order() {
        let prior = vec!["a".to_string(), "b".to_string()];
        let messages = build_messages("sys", &request(3, "c"), &prior);
        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "user"]);
        assert_eq!(
            messages[1].content.as_deref(),
            Some("Context (for reference, do not translate): a | b")
        );
        assert_eq!(
            messages[2].content.as_deref(),
            Some("Translate the following text from zh to ja:\nc")
        );
    }
}
