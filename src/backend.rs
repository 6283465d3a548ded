//! Rig-core provider bridge.
//!
//! Exposes a unified `CompletionBackend` trait so the agent loop can hold an
//! `Arc<dyn CompletionBackend>` regardless of the configured provider, and so
//! tests can inject a scripted model.

use anyhow::Result;
use rig::client::CompletionClient;
use rig::completion::request::{CompletionError, CompletionRequest};
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::OneOrMany;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Provider-agnostic completion backend. The returned choice carries the
/// assistant contents of one model turn (text and/or tool calls).
pub trait CompletionBackend: Send + Sync {
    fn completion(
        &self,
        request: CompletionRequest,
    ) -> Pin<
        Box<dyn Future<Output = Result<OneOrMany<AssistantContent>, CompletionError>> + Send + '_>,
    >;
}

/// Build an `Arc<dyn CompletionBackend>` from provider name, model name,
/// API key and optional base URL. Unrecognized provider names fall back to
/// the OpenAI-compatible client (works with OpenRouter and friends).
pub fn build_backend(
    provider_name: &str,
    model_name: &str,
    api_key: &str,
    api_base: Option<&str>,
) -> Result<Arc<dyn CompletionBackend>> {
    type RC = reqwest::Client;
    let lower = provider_name.to_lowercase();
    let backend = if lower.contains("anthropic") || lower.contains("claude") {
        let client = rig::providers::anthropic::Client::<RC>::builder()
            .api_key(api_key.to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let m = client.completion_model(model_name.to_string());
        Arc::new(AnthropicBackend(client, m)) as Arc<dyn CompletionBackend>
    } else {
        let mut builder = rig::providers::openai::Client::<RC>::builder()
            .api_key(api_key.to_string());
        if let Some(base) = api_base {
            if !base.is_empty() {
                builder = builder.base_url(base);
            }
        }
        let client = builder.build().map_err(|e| anyhow::anyhow!("{}", e))?;
        let m = client.completion_model(model_name.to_string());
        Arc::new(OpenAiBackend(client, m)) as Arc<dyn CompletionBackend>
    };
    Ok(backend)
}

macro_rules! impl_backend {
    ($name:ident, $client:ty) => {
        struct $name($client, <$client as CompletionClient>::CompletionModel);
        impl CompletionBackend for $name {
            fn completion(
                &self,
                request: CompletionRequest,
            ) -> Pin<
                Box<
                    dyn Future<Output = Result<OneOrMany<AssistantContent>, CompletionError>>
                        + Send
                        + '_,
                >,
            > {
                let m = &self.1;
                let fut = async move {
                    let r = m.completion(request).await?;
                    Ok(r.choice)
                };
                Box::pin(fut)
            }
        }
    };
}

impl_backend!(OpenAiBackend, rig::providers::openai::Client);
impl_backend!(AnthropicBackend, rig::providers::anthropic::Client);
