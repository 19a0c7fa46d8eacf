//! Advice generation from arbitrary structured input.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::ai::normalizer::locate_json_object;
use crate::ai::prompts::{advice_instruction, build_advice_prompt, ADVICE_SYSTEM_PROMPT};
use crate::ai::provider::{CompletionRequest, ModelProvider, ProviderError};
use crate::config::CompletionSettings;
use crate::sanitize::truncate_for_log;

pub const DEFAULT_DISCLAIMER: &str = "This advice is for informational purposes only. \
Consult a qualified tax professional for specific advice.";

/// Structured advice. Always well-shaped, even when the model reply is not.
/// Serializes with the same snake_case keys the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub summary: String,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub potential_deductions: Vec<String>,
    pub business_expenses: Vec<String>,
    pub quarterly_estimates: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub estimated_tax_impact: Option<String>,
    pub disclaimer: String,
    /// True when the reply could not be parsed and boilerplate was substituted.
    /// Not part of the serialized advice.
    #[serde(skip)]
    pub fallback: bool,
}

impl Advice {
    /// Boilerplate advice wrapping an unparseable reply as its summary.
    pub fn fallback(raw_reply: &str) -> Self {
        Self {
            summary: raw_reply.to_string(),
            key_insights: strings(&[
                "Review your withholding",
                "Consider tax deductions",
                "Plan for next year",
            ]),
            recommendations: strings(&[
                "Consult a tax professional",
                "Keep good records",
                "File on time",
            ]),
            potential_deductions: Vec::new(),
            business_expenses: Vec::new(),
            quarterly_estimates: Vec::new(),
            next_steps: strings(&[
                "Gather all documents",
                "Review deductions",
                "File your return",
            ]),
            estimated_tax_impact: None,
            disclaimer: DEFAULT_DISCLAIMER.to_string(),
            fallback: true,
        }
    }

    /// Reads the first JSON object in `reply`. Missing keys default to empty.
    /// List entries that are not strings are kept as compact JSON.
    pub fn parse(reply: &str) -> Option<Self> {
        let candidate = locate_json_object(reply)?;
        let mut object: Map<String, Value> = serde_json::from_str(candidate).ok()?;

        let mut take_list = |key: &str| object.remove(key).map(string_list).unwrap_or_default();
        let key_insights = take_list("key_insights");
        let recommendations = take_list("recommendations");
        let potential_deductions = take_list("potential_deductions");
        let business_expenses = take_list("business_expenses");
        let quarterly_estimates = take_list("quarterly_estimates");
        let next_steps = take_list("next_steps");

        let summary = object.remove("summary").map(text).unwrap_or_default();
        let estimated_tax_impact = object
            .remove("estimated_tax_impact")
            .map(text)
            .filter(|s| !s.trim().is_empty());
        let disclaimer = object
            .remove("disclaimer")
            .map(text)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DISCLAIMER.to_string());

        Some(Self {
            summary,
            key_insights,
            recommendations,
            potential_deductions,
            business_expenses,
            quarterly_estimates,
            next_steps,
            estimated_tax_impact,
            disclaimer,
            fallback: false,
        })
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn string_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(text)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Null => Vec::new(),
        single => vec![text(single)],
    }
}

/// Turns structured data into [`Advice`] with a higher-temperature call.
pub struct AdviceGenerator {
    provider: Arc<dyn ModelProvider>,
    settings: CompletionSettings,
}

impl AdviceGenerator {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: CompletionSettings) -> Self {
        Self { provider, settings }
    }

    /// Fails only when the model call fails.
    pub async fn generate(
        &self,
        data: &Value,
        custom_instruction: Option<&str>,
    ) -> Result<Advice, ProviderError> {
        let data_json = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        let request = CompletionRequest {
            system: ADVICE_SYSTEM_PROMPT.to_string(),
            user: build_advice_prompt(&advice_instruction(custom_instruction), &data_json),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let reply = self
            .provider
            .complete(request)
            .instrument(tracing::info_span!("advice"))
            .await?;

        match Advice::parse(&reply) {
            Some(advice) => {
                info!(
                    "Generated advice with {} recommendation(s)",
                    advice.recommendations.len()
                );
                Ok(advice)
            }
            None => {
                warn!(
                    "Advice reply had no JSON object, using fallback: {}",
                    truncate_for_log(&reply, 200)
                );
                Ok(Advice::fallback(&reply))
            }
        }
    }
}
