use async_trait::async_trait;

use traffic_dispatcher::text::{GenerationContext, GenerationKind, TextGenerator};

/// Stand-in for the external `TextGenerator` collaborator: LLM
/// prompting for post/comment text is out of scope for this engine. Always
/// declining forces every caller through `generate_with_fallback`'s
/// templated path, which is the correct behavior for non-comment kinds and
/// the correct *drop* behavior for comments.
///
/// Wire a real implementation here (an HTTP call to the content service) to
/// bring generated copy online without touching the dispatcher or funnel.
pub struct NullTextGenerator;

#[async_trait]
impl TextGenerator for NullTextGenerator {
    async fn generate(&self, _kind: GenerationKind, _context: &GenerationContext) -> Option<String> {
        None
    }
}
