//! LLM refinement of a single page, and provider construction.
//!
//! Providers are built from [`ProviderCredentials`] carried by the request.
//! Two concurrent requests with different keys get two independent clients;
//! no process environment is consulted.
//!
//! ## Retry Strategy
//!
//! 429 / 5xx responses are frequent under concurrent load and usually
//! transient. Each page is retried `max_retries` times with exponential
//! backoff (`retry_backoff_ms * 2^(attempt-1)`). A page that still fails is
//! reported to the caller, which falls back to the raw text layer.

use crate::config::{PdfiumSettings, ProviderCredentials};
use crate::prompts::{page_message, system_prompt};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, OpenAIProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Build an OpenAI client for the given credentials.
pub fn provider_from_credentials(credentials: &ProviderCredentials) -> Arc<dyn LLMProvider> {
    Arc::new(
        OpenAIProvider::new(credentials.api_key.clone()).with_model(credentials.model.clone()),
    )
}

/// Ask the provider to turn one page image plus its text layer into markdown.
///
/// The request is: system prompt, then one user message whose text is the
/// page's text layer and whose attachment is the page PNG. Returns the
/// provider's markdown, or the last error message once retries run out.
pub async fn refine_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    image: ImageData,
    text_layer: &str,
    settings: &PdfiumSettings,
    describe_images: bool,
) -> Result<String, String> {
    let start = Instant::now();
    let messages = vec![
        ChatMessage::system(system_prompt(describe_images)),
        ChatMessage::user_with_images(page_message(page_num, text_layer), vec![image]),
    ];
    let options = build_options(settings);

    let mut last_err = String::from("no attempt made");
    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = settings.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, settings.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "Page {}: {} prompt tokens, {} completion tokens, {} retries, {:?}",
                    page_num,
                    response.prompt_tokens,
                    response.completion_tokens,
                    attempt,
                    start.elapsed()
                );
                return Ok(response.content);
            }
            Err(e) => {
                last_err = e.to_string();
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, last_err);
            }
        }
    }
    Err(last_err)
}

fn build_options(settings: &PdfiumSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_config() {
        let settings = PdfiumSettings {
            temperature: 0.3,
            max_tokens: 1024,
            ..PdfiumSettings::default()
        };
        let opts = build_options(&settings);
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(1024));
    }
}
