//! Token usage and cost accounting. Logged only; never drives control flow.

use tracing::debug;

use crate::ProviderKind;

/// Resource consumption of one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Dollar price per 1000 tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub input: f64,
    pub output: f64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Merge a later partial report; providers repeat or split counts
    /// across stream events, so the larger value wins.
    pub fn absorb(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
    }

    pub fn cost(&self, price: Price) -> f64 {
        (self.input_tokens as f64 * price.input + self.output_tokens as f64 * price.output) / 1000.0
    }

    pub fn log(&self, provider: ProviderKind, model: &str) {
        match price_for(provider, model) {
            Some(price) => debug!(
                provider = %provider,
                model,
                input_tokens = self.input_tokens,
                output_tokens = self.output_tokens,
                cost_usd = self.cost(price),
                "usage"
            ),
            None => debug!(
                provider = %provider,
                model,
                input_tokens = self.input_tokens,
                output_tokens = self.output_tokens,
                "usage"
            ),
        }
    }
}

const OPENAI_PRICES: &[(&str, Price)] = &[
    ("gpt-4o-mini", Price { input: 0.000150, output: 0.000600 }),
    ("gpt-4o-2024-05-13", Price { input: 0.005, output: 0.015 }),
    ("gpt-4o", Price { input: 0.0025, output: 0.010 }),
    ("o1-preview", Price { input: 0.015, output: 0.060 }),
];

const ANTHROPIC_PRICES: &[(&str, Price)] = &[
    ("claude-3-5-haiku", Price { input: 0.0008, output: 0.004 }),
    ("claude-3-haiku", Price { input: 0.00025, output: 0.00125 }),
    ("claude-3-5-sonnet", Price { input: 0.003, output: 0.015 }),
    ("claude-3-opus", Price { input: 0.015, output: 0.075 }),
];

/// Known price for a model. Entries match by prefix so dated snapshots
/// resolve to their family; more specific prefixes are listed first.
pub fn price_for(provider: ProviderKind, model: &str) -> Option<Price> {
    let table = match provider {
        ProviderKind::OpenAi => OPENAI_PRICES,
        ProviderKind::Anthropic => ANTHROPIC_PRICES,
        ProviderKind::Bedrock => {
            let model = model.strip_prefix("anthropic.")?;
            return price_for(ProviderKind::Anthropic, model);
        }
        _ => return None,
    };
    table
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, price)| *price)
}
