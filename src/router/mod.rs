//! src/router/mod.rs
//!
//! The provider router: capability-based selection with exactly-one
//! fallback on transient failure, plus the single role-normalization and
//! extended-thinking clamp point named in §4.5.

pub mod adapters;
pub mod provider;

use crate::error::{Error, Result};
use provider::{Capability, CompletionRequest, Provider, ProviderAdapter, ProviderFailure, StreamChunk};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

const DEFAULT_THINKING_BUDGET: u32 = 8000;

pub struct Router {
    providers: Vec<Provider>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl Router {
    pub fn new(providers: Vec<Provider>, adapters: HashMap<String, Arc<dyn ProviderAdapter>>) -> Self {
        Self { providers, adapters }
    }

    fn enabled_providers(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter().filter(|p| p.enabled)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.enabled_providers().map(|p| p.id.clone()).collect()
    }

    pub fn default_models(&self) -> Vec<String> {
        self.enabled_providers().map(|p| p.default_model.clone()).collect()
    }

    /// Implements the 5-step selection algorithm verbatim, in order.
    /// `exclude` removes a provider from consideration entirely (used on
    /// the fallback attempt, which excludes `preferred_provider`).
    pub fn select(
        &self,
        capabilities: &HashSet<Capability>,
        preferred_provider: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<&Provider> {
        if let Some(pref) = preferred_provider {
            if Some(pref) != exclude {
                if let Some(p) = self.enabled_providers().find(|p| p.id == pref) {
                    return Ok(p);
                }
            }
        }

        let candidates: Vec<&Provider> = self
            .enabled_providers()
            .filter(|p| Some(p.id.as_str()) != exclude)
            .filter(|p| capabilities.is_subset(&p.capabilities))
            .collect();

        if candidates.is_empty() {
            return Err(Error::NoSuitableProvider);
        }

        if capabilities.contains(&Capability::Local) {
            if let Some(p) = candidates.iter().find(|p| p.capabilities.contains(&Capability::Local)) {
                return Ok(p);
            }
        }

        if capabilities.contains(&Capability::Cheap) {
            if let Some(p) = candidates
                .iter()
                .find(|p| p.cost_tier == provider::CostTier::Low)
            {
                return Ok(p);
            }
        }

        // max_by_key keeps the *last* maximal element on ties; candidates
        // are in declaration order, so fold manually to keep the first.
        let mut best = candidates[0];
        for candidate in &candidates[1..] {
            if candidate.priority > best.priority {
                best = candidate;
            }
        }
        Ok(best)
    }

    /// Clamps a requested extended-thinking budget to `[0, model_max]`,
    /// defaulting to `DEFAULT_THINKING_BUDGET` when the caller did not ask
    /// for a specific value.
    pub fn clamp_budget_tokens(requested: Option<u32>, model_max: u32) -> u32 {
        requested.unwrap_or(DEFAULT_THINKING_BUDGET).min(model_max)
    }

    /// Selects a provider, dispatches the request, and on a `Transient`
    /// failure retries exactly once against a different candidate
    /// (excluding the one that just failed). `Semantic` failures propagate
    /// immediately, unchanged, never triggering a fallback.
    pub async fn route(
        &self,
        capabilities: &HashSet<Capability>,
        preferred_provider: Option<&str>,
        mut request: CompletionRequest,
    ) -> Result<(String, mpsc::Receiver<StreamChunk>)> {
        if request.extended_thinking {
            request.budget_tokens = Some(Self::clamp_budget_tokens(request.budget_tokens, 200_000));
        }

        let first = self.select(capabilities, preferred_provider, None)?;
        let first_id = first.id.clone();
        let adapter = self
            .adapters
            .get(&first_id)
            .ok_or_else(|| Error::ProviderError(first_id.clone(), "no adapter registered".into()))?;

        match adapter.stream(request.clone()).await {
            Ok(rx) => Ok((first_id, rx)),
            Err(ProviderFailure::Semantic(msg)) => Err(Error::ProviderError(first_id, msg)),
            Err(ProviderFailure::Transient(msg)) => {
                tracing::warn!(provider = %first_id, error = %msg, "provider call failed, attempting fallback");
                let second = self.select(capabilities, None, Some(&first_id))?;
                let second_id = second.id.clone();
                let adapter = self
                    .adapters
                    .get(&second_id)
                    .ok_or_else(|| Error::ProviderError(second_id.clone(), "no adapter registered".into()))?;
                match adapter.stream(request).await {
                    Ok(rx) => Ok((second_id, rx)),
                    Err(ProviderFailure::Semantic(msg)) => Err(Error::ProviderError(second_id, msg)),
                    Err(ProviderFailure::Transient(msg)) => Err(Error::ProviderError(second_id, msg)),
                }
            }
        }
    }
}
