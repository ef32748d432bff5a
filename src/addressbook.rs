//! Address book - resolves raw addresses to a semantic kind
//!
//! The metadata store itself lives outside this crate; here we define the
//! lookup seam the decoder and the quarantine engine depend on, plus a static
//! implementation seeded with well-known mainnet assets. Resolution is
//! best-effort: a miss degrades to "unknown", it never fails a simulation.

use alloy_primitives::Address;
use std::collections::HashMap;
use std::str::FromStr;

/// What kind of thing an address is, as far as we can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Fungible token contract (ERC-20)
    Token,

    /// Non-fungible collection contract (ERC-721)
    NftCollection,

    /// Contract with known purpose (router, vault, ...)
    Contract,

    /// Externally owned account we have metadata for
    UserAddress,

    /// Has code, but we know nothing else about it
    UnknownContract,
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressKind::Token => write!(f, "token"),
            AddressKind::NftCollection => write!(f, "NFT collection"),
            AddressKind::Contract => write!(f, "contract"),
            AddressKind::UserAddress => write!(f, "user address"),
            AddressKind::UnknownContract => write!(f, "unknown contract"),
        }
    }
}

/// Resolved metadata for one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBookEntry {
    pub kind: AddressKind,
    pub name: Option<String>,
    /// Only meaningful for fungible tokens; `None` means the amount of a
    /// token event cannot be scaled for display or pricing.
    pub decimals: Option<u8>,
}

impl AddressBookEntry {
    pub fn token(name: &str, decimals: u8) -> Self {
        Self { kind: AddressKind::Token, name: Some(name.to_string()), decimals: Some(decimals) }
    }

    pub fn user(name: &str) -> Self {
        Self { kind: AddressKind::UserAddress, name: Some(name.to_string()), decimals: None }
    }

    pub fn contract(name: &str) -> Self {
        Self { kind: AddressKind::Contract, name: Some(name.to_string()), decimals: None }
    }
}

/// Read-only lookup seam the core consumes; the hosting application injects
/// its own store behind this.
pub trait AddressBookLookup: Send + Sync {
    fn lookup(&self, address: Address) -> Option<AddressBookEntry>;
}

// ============================================
// WELL-KNOWN MAINNET CATALOG
// ============================================

lazy_static::lazy_static! {
    static ref WELL_KNOWN: HashMap<Address, AddressBookEntry> = {
        let mut map = HashMap::new();
        let tokens: &[(&str, &str, u8)] = &[
            ("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "WETH", 18),
            ("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", 6),
            ("0xdAC17F958D2ee523a2206206994597C13D831ec7", "USDT", 6),
            ("0x6B175474E89094C44Da98b954EedcdeCB5BE3830", "DAI", 18),
            ("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", "WBTC", 8),
        ];
        for (addr, symbol, decimals) in tokens {
            map.insert(
                Address::from_str(addr).unwrap(),
                AddressBookEntry::token(symbol, *decimals),
            );
        }
        map
    };
}

/// In-memory address book: the well-known catalog plus whatever the caller
/// registers. Good enough for the CLI and for deterministic tests; real
/// deployments wrap their own store in [`AddressBookLookup`] instead.
#[derive(Debug, Clone, Default)]
pub struct StaticAddressBook {
    entries: HashMap<Address, AddressBookEntry>,
}

impl StaticAddressBook {
    /// Empty book - every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    /// Book pre-seeded with well-known mainnet assets
    pub fn mainnet() -> Self {
        Self { entries: WELL_KNOWN.clone() }
    }

    pub fn insert(&mut self, address: Address, entry: AddressBookEntry) {
        self.entries.insert(address, entry);
    }

    pub fn insert_token(&mut self, address: Address, name: &str, decimals: u8) {
        self.insert(address, AddressBookEntry::token(name, decimals));
    }

    pub fn insert_user(&mut self, address: Address, name: &str) {
        self.insert(address, AddressBookEntry::user(name));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AddressBookLookup for StaticAddressBook {
    fn lookup(&self, address: Address) -> Option<AddressBookEntry> {
        self.entries.get(&address).cloned()
    }
}
