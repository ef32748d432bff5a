//! Route identification and intent classification
//!
//! Both are pure functions of the `VisualizerResult` - no network, no
//! randomness - so quarantine evaluation and test assertions stay
//! reproducible.

use alloy_primitives::{Address, U256};
use std::collections::HashSet;

use super::{TokenEvent, VisualizerResult};

/// Classified intent of one simulated transaction. The rule order is a
/// design choice: the most specific, most reassuring match wins before
/// falling back to the generic "unknown contract call" presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionIntent {
    MakeYouRichTransaction,
    EtherTransfer,
    SimpleTokenTransfer,
    SimpleTokenApproval,
    Swap,
    ContractDeployment,
    ContractFallbackMethod,
    ArbitraryContractExecution,
}

impl std::fmt::Display for TransactionIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionIntent::MakeYouRichTransaction => write!(f, "rich-mode funding"),
            TransactionIntent::EtherTransfer => write!(f, "ether transfer"),
            TransactionIntent::SimpleTokenTransfer => write!(f, "token transfer"),
            TransactionIntent::SimpleTokenApproval => write!(f, "token approval"),
            TransactionIntent::Swap => write!(f, "swap"),
            TransactionIntent::ContractDeployment => write!(f, "contract deployment"),
            TransactionIntent::ContractFallbackMethod => write!(f, "fallback call"),
            TransactionIntent::ArbitraryContractExecution => write!(f, "contract execution"),
        }
    }
}

/// A collapsed chain of transfers presented as one logical movement from the
/// original sender to the final receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRoute {
    pub asset: Address,
    pub from: Address,
    pub to: Address,
    /// Amount entering the route at the first hop
    pub amount_in: U256,
    /// Amount leaving the route at the last hop; less than `amount_in` means
    /// an intermediate hop skimmed part of it
    pub amount_out: U256,
    pub hops: usize,
    pub fungible: bool,
}

impl TokenRoute {
    pub fn skims(&self) -> bool {
        self.amount_out < self.amount_in
    }
}

/// Collapses consecutive transfer events where one's `to` equals the next's
/// `from` and the asset is invariant. Events must be in on-chain log order;
/// approvals never participate.
pub fn collapse_routes(events: &[TokenEvent]) -> Vec<TokenRoute> {
    let mut routes: Vec<TokenRoute> = Vec::new();
    for event in events {
        let (asset, from, to, amount, fungible) = match event {
            TokenEvent::Erc20Transfer { token, from, to, amount } => {
                (*token, *from, *to, *amount, true)
            }
            TokenEvent::Erc721Transfer { collection, from, to, .. } => {
                (*collection, *from, *to, U256::ONE, false)
            }
            _ => continue,
        };
        match routes.iter_mut().find(|route| route.to == from && route.asset == asset) {
            Some(route) => {
                route.to = to;
                route.amount_out = amount;
                route.hops += 1;
            }
            None => routes.push(TokenRoute {
                asset,
                from,
                to,
                amount_in: amount,
                amount_out: amount,
                hops: 1,
                fungible,
            }),
        }
    }
    routes
}

/// Distinct assets leave and enter the sender within one transaction
fn is_swap(result: &VisualizerResult) -> bool {
    let routes = collapse_routes(&result.token_results);
    let assets_out: HashSet<Address> =
        routes.iter().filter(|r| r.from == result.sender).map(|r| r.asset).collect();
    let assets_in: HashSet<Address> =
        routes.iter().filter(|r| r.to == result.sender).map(|r| r.asset).collect();

    let sends_eth = !result.value.is_zero();
    let receives_eth = result.value_transfers.iter().any(|t| t.to == result.sender);

    let has_out = !assets_out.is_empty() || sends_eth;
    let has_in = !assets_in.is_empty() || receives_eth;
    has_out && has_in && assets_out.is_disjoint(&assets_in)
}

/// Single-pass, ordered rules; first match wins
pub fn identify_intent(result: &VisualizerResult) -> TransactionIntent {
    if result.from_donor {
        return TransactionIntent::MakeYouRichTransaction;
    }

    let decoded: Vec<&TokenEvent> = result.decoded_events().collect();

    if decoded.is_empty()
        && !result.value.is_zero()
        && result.recipient.is_some()
        && !result.recipient_has_code
    {
        return TransactionIntent::EtherTransfer;
    }

    if decoded.len() == 1 {
        let approval_shaped = matches!(
            decoded[0],
            TokenEvent::Erc20Approval { .. }
                | TokenEvent::Erc721Approval { .. }
                | TokenEvent::ApprovalForAll { .. }
        );
        return if approval_shaped {
            TransactionIntent::SimpleTokenApproval
        } else {
            TransactionIntent::SimpleTokenTransfer
        };
    }

    if decoded.len() >= 2 && is_swap(result) {
        return TransactionIntent::Swap;
    }

    if result.recipient.is_none() {
        return TransactionIntent::ContractDeployment;
    }

    if result.input_empty && result.recipient_has_code {
        return TransactionIntent::ContractFallbackMethod;
    }

    TransactionIntent::ArbitraryContractExecution
}
