//! Usage merge semantics and the cost calculator.
//!
//! The calculator is a pure function from token counts and a model's
//! per-million-token price table to a [`Cost`] breakdown. It holds no state
//! and is invoked by the accumulator after every usage update.

use crate::types::{Cost, ModelCost, Usage};

/// Partial usage update extracted from a vendor event.
///
/// Vendors rarely repeat counts they already reported, so every field is
/// optional: `None` means "this event said nothing about the field" and must
/// not disturb an earlier reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenDelta {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub cache_read: Option<u64>,
    pub cache_write: Option<u64>,
}

impl TokenDelta {
    /// Returns `true` when the update carries no counts at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Computes the cost of the given usage counts against a price table.
///
/// Pure and idempotent: identical inputs always produce identical output.
/// Each component is `tokens × price / 1_000_000`; zero-priced categories
/// contribute zero, never an error.
///
/// # Examples
///
/// ```
/// # use tsunagi_llm::types::{ModelCost, Usage};
/// # use tsunagi_llm::usage::calculate_cost;
/// let usage = Usage { input: 1_000_000, output: 500_000, ..Usage::default() };
/// let price = ModelCost { input: 2.0, output: 10.0, cache_read: 0.0, cache_write: 0.0 };
/// let cost = calculate_cost(&usage, &price);
/// assert_eq!(cost.input, 2.0);
/// assert_eq!(cost.output, 5.0);
/// assert_eq!(cost.total, 7.0);
/// ```
pub fn calculate_cost(usage: &Usage, price: &ModelCost) -> Cost {
    let input = per_million(usage.input, price.input);
    let output = per_million(usage.output, price.output);
    let cache_read = per_million(usage.cache_read, price.cache_read);
    let cache_write = per_million(usage.cache_write, price.cache_write);
    Cost {
        input,
        output,
        cache_read,
        cache_write,
        total: input + output + cache_read + cache_write,
    }
}

fn per_million(tokens: u64, price_per_million: f64) -> f64 {
    tokens as f64 * price_per_million / 1_000_000.0
}

impl Usage {
    /// Merges a partial update into the running counts and recomputes the
    /// derived total and cost.
    ///
    /// Only fields present in the delta overwrite; absent fields keep their
    /// previous values, so an input count reported once at stream start
    /// survives later events that omit it.
    pub fn apply(&mut self, delta: TokenDelta, price: &ModelCost) {
        if let Some(input) = delta.input {
            self.input = input;
        }
        if let Some(output) = delta.output {
            self.output = output;
        }
        if let Some(cache_read) = delta.cache_read {
            self.cache_read = cache_read;
        }
        if let Some(cache_write) = delta.cache_write {
            self.cache_write = cache_write;
        }
        self.total_tokens = self.input + self.output + self.cache_read + self.cache_write;
        self.cost = calculate_cost(self, price);
    }
}
