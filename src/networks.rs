//! Well-known EVM networks that settle in a native currency.
//!
//! The registry is only used for human-friendly names in logs and CLI flags;
//! any `eip155:<n>` chain can be configured.

use crate::chain::{ChainId, Eip155ChainReference};

/// A known network definition with its chain reference and human-readable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable network name (e.g., "base-sepolia")
    pub name: &'static str,
    pub chain: Eip155ChainReference,
    /// Symbol of the native currency.
    pub symbol: &'static str,
    pub testnet: bool,
}

impl NetworkInfo {
    pub fn chain_id(&self) -> ChainId {
        self.chain.as_chain_id()
    }
}

pub const BASE: NetworkInfo = NetworkInfo {
    name: "base",
    chain: Eip155ChainReference::new(8453),
    symbol: "ETH",
    testnet: false,
};

pub const BASE_SEPOLIA: NetworkInfo = NetworkInfo {
    name: "base-sepolia",
    chain: Eip155ChainReference::new(84532),
    symbol: "ETH",
    testnet: true,
};

pub const ETHEREUM: NetworkInfo = NetworkInfo {
    name: "ethereum",
    chain: Eip155ChainReference::new(1),
    symbol: "ETH",
    testnet: false,
};

pub const SEPOLIA: NetworkInfo = NetworkInfo {
    name: "sepolia",
    chain: Eip155ChainReference::new(11155111),
    symbol: "ETH",
    testnet: true,
};

pub static KNOWN_NETWORKS: &[NetworkInfo] = &[BASE, BASE_SEPOLIA, ETHEREUM, SEPOLIA];

pub fn by_name(name: &str) -> Option<&'static NetworkInfo> {
    KNOWN_NETWORKS.iter().find(|n| n.name == name)
}

pub fn by_chain_reference(chain: Eip155ChainReference) -> Option<&'static NetworkInfo> {
    KNOWN_NETWORKS.iter().find(|n| n.chain == chain)
}

/// Name for logs: the known network name, or the CAIP-2 id.
pub fn display_name(chain: Eip155ChainReference) -> String {
    by_chain_reference(chain)
        .map(|n| n.name.to_string())
        .unwrap_or_else(|| chain.as_chain_id().to_string())
}
