//! Inference Router
//!
//! Selects which provider serves a request and fails over between them.
//! Every call is wrapped in a timeout sized for the provider class (local
//! models need time to load; cloud APIs answer fast or not at all), and a
//! timeout is treated exactly like any other provider failure: the router
//! moves on to the next candidate.

use super::{LLMError, LLMProvider, Message};
use crate::config::LLMConfig;
use std::sync::Arc;
use std::time::Duration;

/// Inference router with automatic failover
pub struct LLMRouter {
    /// Available providers
    providers: Vec<Box<dyn LLMProvider>>,

    /// Inference configuration
    config: Arc<LLMConfig>,
}

impl LLMRouter {
    /// Create a new router
    pub fn new(providers: Vec<Box<dyn LLMProvider>>, config: Arc<LLMConfig>) -> Self {
        Self { providers, config }
    }

    /// Rank providers for a request of the given estimated size.
    ///
    /// Ranking:
    /// 1. Strongly prefer the configured default provider
    /// 2. Prefer local providers (no key, no egress)
    /// 3. Prefer cheaper providers
    ///
    /// Returns a sorted list (best first).
    pub fn rank_providers(&self, estimated_tokens: usize) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        let default_provider = &self.config.default_provider;

        providers.sort_by(|a, b| {
            let mut score_a = 0.0_f64;
            let mut score_b = 0.0_f64;

            if a.name() == default_provider {
                score_a += 200.0;
            }
            if b.name() == default_provider {
                score_b += 200.0;
            }

            if a.is_local() {
                score_a += 50.0;
            }
            if b.is_local() {
                score_b += 50.0;
            }

            // Lower cost = higher score
            score_a -= a.estimated_cost(estimated_tokens) * 1000.0;
            score_b -= b.estimated_cost(estimated_tokens) * 1000.0;

            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        providers
    }

    /// Estimate token count for the prompt (~4 characters per token)
    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        total_chars / 4
    }

    /// Call providers with automatic failover.
    ///
    /// Attempts each ranked provider in order, each under its own timeout.
    /// Returns the response text and the name of the provider that served
    /// it, or an error once every provider has failed.
    pub async fn call(&self, messages: &[Message]) -> super::Result<(String, String)> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No inference providers configured".to_string(),
            ));
        }

        let estimated_tokens = self.estimate_tokens(messages);
        let ranked_providers = self.rank_providers(estimated_tokens);

        for provider in ranked_providers {
            let timeout_secs = if provider.is_local() {
                self.config.local_timeout_secs
            } else {
                self.config.request_timeout_secs
            };
            tracing::debug!(
                "Attempting provider: {} (timeout: {}s)",
                provider.name(),
                timeout_secs
            );

            let result = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                provider.generate(messages),
            )
            .await;

            match result {
                Ok(Ok(content)) => {
                    tracing::debug!("Provider {} succeeded", provider.name());
                    return Ok((content, provider.name().to_string()));
                }
                Ok(Err(e)) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Provider {} timed out after {}s",
                        provider.name(),
                        timeout_secs
                    );
                }
            }
        }

        tracing::error!("All inference providers exhausted");
        Err(LLMError::ProviderUnavailable(
            "All inference providers failed".to_string(),
        ))
    }

    /// Check the health of all registered providers.
    /// Returns a list of (provider_name, is_healthy).
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), is_healthy));
        }
        results
    }
}
