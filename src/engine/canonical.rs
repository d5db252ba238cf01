//! Late-binding wallet canonicalization.
//!
//! Ledgers are always keyed by raw wallet; canonical identities only re-key
//! finished positions during aggregation.

use crate::domain::Wallet;
use std::collections::{BTreeSet, HashMap};

/// Maps an executor/proxy address to a stable account identity.
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, raw: &Wallet) -> Wallet;
}

/// Every wallet is its own account.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCanonicalizer;

impl Canonicalizer for IdentityCanonicalizer {
    fn canonicalize(&self, raw: &Wallet) -> Wallet {
        raw.clone()
    }
}

/// Explicit raw → canonical alias table; unknown wallets map to themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletAliases {
    aliases: HashMap<Wallet, Wallet>,
}

impl WalletAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Wallet, Wallet)>) -> Self {
        let mut table = Self::new();
        for (raw, canonical) in pairs {
            table.insert(raw, canonical);
        }
        table
    }

    pub fn insert(&mut self, raw: Wallet, canonical: Wallet) {
        self.aliases.insert(raw, canonical);
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Raw wallets that resolve to `canonical`, including `canonical` itself.
    pub fn members_of(&self, canonical: &Wallet) -> BTreeSet<Wallet> {
        let mut members: BTreeSet<Wallet> = self
            .aliases
            .iter()
            .filter(|(_, c)| *c == canonical)
            .map(|(raw, _)| raw.clone())
            .collect();
        members.insert(canonical.clone());
        members
    }
}

impl Canonicalizer for WalletAliases {
    fn canonicalize(&self, raw: &Wallet) -> Wallet {
        self.aliases.get(raw).cloned().unwrap_or_else(|| raw.clone())
    }
}
