use async_trait::async_trait;

use traffic_core::types::Strategy;

/// The closed set of content kinds the external text generator produces
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Comment,
    Post,
    InviteTeaser,
    DirectMessage,
}

/// Context passed alongside a generation request.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub segment: String,
    pub persona_display_name: String,
    pub strategy: Option<Strategy>,
    pub topic: Option<String>,
    pub source_post_excerpt: Option<String>,
}

/// External text generation boundary. The engine calls this at most twice
/// per action before falling back.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, kind: GenerationKind, context: &GenerationContext) -> Option<String>;
}

/// Fallback used when the real generator is unavailable or exhausts its
/// retries. Non-comment kinds fall back to a templated string; comments
/// have no safe generic fallback and are dropped by the caller instead of
/// being posted with placeholder text.
pub struct TemplateFallback;

impl TemplateFallback {
    /// Returns `None` for `comment` (caller must drop the action), `Some`
    /// templated text otherwise.
    pub fn render(&self, kind: GenerationKind, context: &GenerationContext) -> Option<String> {
        match kind {
            GenerationKind::Comment => None,
            GenerationKind::Post => Some(format!(
                "{} has something new for the {} community today.",
                context.persona_display_name, context.segment
            )),
            GenerationKind::InviteTeaser => Some(
                "A limited-time invite to our private channel is open right now — tap to join before it closes."
                    .to_string(),
            ),
            GenerationKind::DirectMessage => Some(format!(
                "Hi, it's {} — thought you might like what we've been sharing lately.",
                context.persona_display_name
            )),
        }
    }
}

/// Calls `generator`, retrying once, then falls back to the template.
/// Returns `None` only when `kind` is `comment` and generation never
/// succeeded — the caller must then drop the action.
pub async fn generate_with_fallback(
    generator: &dyn TextGenerator,
    fallback: &TemplateFallback,
    kind: GenerationKind,
    context: &GenerationContext,
) -> Option<String> {
    for _ in 0..2 {
        if let Some(text) = generator.generate(kind, context).await {
            return Some(text);
        }
    }
    fallback.render(kind, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl TextGenerator for AlwaysFails {
        async fn generate(&self, _: GenerationKind, _: &GenerationContext) -> Option<String> {
            None
        }
    }

    fn ctx() -> GenerationContext {
        GenerationContext {
            segment: "zozh".to_string(),
            persona_display_name: "Anya".to_string(),
            strategy: Some(Strategy::Smart),
            topic: Some("detox".to_string()),
            source_post_excerpt: None,
        }
    }

    #[tokio::test]
    async fn comment_generation_failure_drops_rather_than_templates() {
        let result = generate_with_fallback(&AlwaysFails, &TemplateFallback, GenerationKind::Comment, &ctx()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn post_generation_failure_falls_back_to_template() {
        let result = generate_with_fallback(&AlwaysFails, &TemplateFallback, GenerationKind::Post, &ctx()).await;
        assert!(result.is_some());
    }
}
