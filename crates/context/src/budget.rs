//! Token budget allocation.
//!
//! Splits the context window left over after the user input across the
//! warm slice, structured summaries and retrieved augmentation.
//!
//! # Algorithm
//!
//! 1. `remainder = window - input_tokens`
//! 2. Each share starts proportional to its range midpoint, normalized
//!    across the three shares
//! 3. Each share is clamped to `[min * remainder, max * remainder]`
//! 4. If the clamped shares exceed `remainder`, all are scaled down
//!    proportionally (rounding down)
//!
//! `user_input + warm_slice + structured + augmentation <= total_available`
//! holds for every input, including one larger than the window.

use lorekeeper_config::{BudgetConfig, RatioRange};
use lorekeeper_core::token::{MESSAGE_OVERHEAD, estimate_tokens};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-turn token allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub total_available: usize,
    pub user_input: usize,
    pub warm_slice: usize,
    pub structured: usize,
    pub augmentation: usize,
}

impl TokenBudget {
    /// Sum of every allocated share, including the user input.
    pub fn allocated(&self) -> usize {
        self.user_input + self.warm_slice + self.structured + self.augmentation
    }

    /// Tokens left unallocated by rounding.
    pub fn unallocated(&self) -> usize {
        self.total_available.saturating_sub(self.allocated())
    }
}

/// The input alone does not fit the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOverflow {
    pub input_tokens: usize,
    pub total_available: usize,
}

/// A computed budget plus the overflow flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetOutcome {
    pub budget: TokenBudget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_overflow: Option<InputOverflow>,
}

impl BudgetOutcome {
    pub fn is_degraded(&self) -> bool {
        self.input_overflow.is_some()
    }
}

/// Token cost of the user input, including message overhead.
pub fn input_tokens(user_input: &str) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(user_input)
}

/// Compute the budget for a turn from the raw user input.
pub fn compute_budget(user_input: &str, context_window: usize, ratios: &BudgetConfig) -> BudgetOutcome {
    compute_budget_for_tokens(input_tokens(user_input), context_window, ratios)
}

/// Compute the budget for a turn whose input costs `input_tokens`.
pub fn compute_budget_for_tokens(
    input_tokens: usize,
    context_window: usize,
    ratios: &BudgetConfig,
) -> BudgetOutcome {
    if input_tokens > context_window {
        warn!(
            input_tokens,
            context_window, "User input exceeds the context window, nothing left to allocate"
        );
        return BudgetOutcome {
            budget: TokenBudget {
                total_available: context_window,
                user_input: context_window,
                ..TokenBudget::default()
            },
            input_overflow: Some(InputOverflow {
                input_tokens,
                total_available: context_window,
            }),
        };
    }

    let remainder = context_window - input_tokens;
    let ranges = [&ratios.warm_slice, &ratios.structured, &ratios.augmentation];
    let mid_sum: f64 = ranges.iter().map(|r| r.midpoint()).sum();

    let mut shares = ranges.map(|range| {
        let initial = if mid_sum > 0.0 {
            (remainder as f64 * range.midpoint() / mid_sum).floor() as usize
        } else {
            0
        };
        clamp_share(initial, range, remainder)
    });

    let total: usize = shares.iter().sum();
    if total > remainder {
        // u128 keeps share * remainder exact for any usize window
        for share in &mut shares {
            *share = (*share as u128 * remainder as u128 / total as u128) as usize;
        }
    }

    let budget = TokenBudget {
        total_available: context_window,
        user_input: input_tokens,
        warm_slice: shares[0],
        structured: shares[1],
        augmentation: shares[2],
    };

    debug!(
        total = budget.total_available,
        input = budget.user_input,
        warm_slice = budget.warm_slice,
        structured = budget.structured,
        augmentation = budget.augmentation,
        "Budget computed"
    );

    BudgetOutcome {
        budget,
        input_overflow: None,
    }
}

fn clamp_share(share: usize, range: &RatioRange, remainder: usize) -> usize {
    let lower = (remainder as f64 * range.min).floor() as usize;
    let upper = ((remainder as f64 * range.max).floor() as usize).min(remainder);
    share.clamp(lower.min(upper), upper)
}
