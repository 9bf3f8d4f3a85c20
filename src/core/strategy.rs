//! Strategy and token registry. A strategy is either a pooled fungible-token strategy or the native-stake pseudo-strategy.
//!
//! The native-stake strategy has no pooled share price and no global share total; it is the `NativeStake` variant rather
//! than a magic address, so every accounting function handles it through one exhaustive match.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Underlying token identifier (e.g. "stETH", "rETH").
pub type TokenId = String;

/// Strategy identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strategy {
    /// Pooled strategy over an ERC20-like token; shares convert to underlying at a variable price.
    Fungible(TokenId),
    /// Validator-backed native stake. Shares are signed and denominated in wei.
    NativeStake,
}

impl Strategy {
    /// Returns a canonical string for hashing and ordering (deterministic).
    pub fn as_canonical(&self) -> String {
        match self {
            Strategy::Fungible(token) => format!("Strategy:{}", token),
            Strategy::NativeStake => "NativeStake".to_string(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Strategy::NativeStake)
    }

    /// Underlying token, or `None` for native stake (underlying is the chain's native ETH).
    pub fn underlying_token(&self) -> Option<&TokenId> {
        match self {
            Strategy::Fungible(token) => Some(token),
            Strategy::NativeStake => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_canonical())
    }
}

/// Ordered set of known strategies. Order is registration order and is the index space the actor factory samples from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StrategyRegistry {
    strategies: Vec<Strategy>,
}

impl StrategyRegistry {
    /// Builds a registry from token ids (duplicates ignored), optionally appending the native-stake strategy.
    pub fn new<I, T>(tokens: I, include_native: bool) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TokenId>,
    {
        let mut strategies: Vec<Strategy> = Vec::new();
        for token in tokens {
            let strategy = Strategy::Fungible(token.into());
            if !strategies.contains(&strategy) {
                strategies.push(strategy);
            }
        }
        if include_native {
            strategies.push(Strategy::NativeStake);
        }
        Self { strategies }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Strategy> {
        self.strategies.get(index)
    }

    pub fn contains(&self, strategy: &Strategy) -> bool {
        self.strategies.contains(strategy)
    }

    /// Fungible strategies only, in registration order.
    pub fn fungible(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter().filter(|s| !s.is_native())
    }

    pub fn has_native(&self) -> bool {
        self.strategies.iter().any(Strategy::is_native)
    }

    /// Underlying tokens of all fungible strategies.
    pub fn tokens(&self) -> Vec<TokenId> {
        self.strategies
            .iter()
            .filter_map(|s| s.underlying_token().cloned())
            .collect()
    }
}
