//! Quarantine heuristic engine
//!
//! Each heuristic is an independent, side-effect-free predicate over
//! `(current result, prior results, address book, policy)`. Heuristics never
//! short-circuit each other: every applicable code is collected. These are
//! heuristics, not proofs - false negatives are possible by design, and the
//! exact catalog is policy data: every code can be disabled and the
//! trusted-spender list and thresholds come from configuration.

use alloy_primitives::{Address, U256};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::warn;

use crate::addressbook::{AddressBookLookup, AddressKind};
use crate::visualizer::{collapse_routes, StatusCode, TokenEvent, VisualizerResult};

/// A heuristically suspicious effect detected in a simulated transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuarantineCode {
    /// Unlimited (or near-unlimited) approval granted to a spender nobody
    /// vouches for
    UnlimitedApprovalToUnknownSpender,

    /// Native balance decreased at an address with no transfer event naming
    /// it as source - silent value extraction
    SilentBalanceDrain,

    /// Approval whose spender is neither the call target nor any contract
    /// invoked in the same transaction - approval front-running shape
    ApprovalToUninvokedSpender,

    /// A token whose decimals/metadata cannot be resolved is used in a value
    /// computation
    UnknownAssetMetadata,

    /// Revert string mimics a success/claim message or embeds a link
    DeceptiveRevertReason,

    /// An intermediate hop of a transfer route retains part of the amount
    FeeExtractionPattern,
}

impl QuarantineCode {
    pub const ALL: [QuarantineCode; 6] = [
        QuarantineCode::UnlimitedApprovalToUnknownSpender,
        QuarantineCode::SilentBalanceDrain,
        QuarantineCode::ApprovalToUninvokedSpender,
        QuarantineCode::UnknownAssetMetadata,
        QuarantineCode::DeceptiveRevertReason,
        QuarantineCode::FeeExtractionPattern,
    ];

    /// Short user-facing label
    pub fn label(&self) -> &'static str {
        match self {
            QuarantineCode::UnlimitedApprovalToUnknownSpender => {
                "unlimited approval to an unknown spender"
            }
            QuarantineCode::SilentBalanceDrain => "balance decrease without a matching transfer",
            QuarantineCode::ApprovalToUninvokedSpender => "approval to a contract never invoked",
            QuarantineCode::UnknownAssetMetadata => "asset with unresolvable metadata",
            QuarantineCode::DeceptiveRevertReason => "deceptive revert message",
            QuarantineCode::FeeExtractionPattern => "transfer route skims a fee",
        }
    }

    fn config_key(&self) -> &'static str {
        match self {
            QuarantineCode::UnlimitedApprovalToUnknownSpender => "unlimited-approval",
            QuarantineCode::SilentBalanceDrain => "silent-balance-drain",
            QuarantineCode::ApprovalToUninvokedSpender => "uninvoked-spender",
            QuarantineCode::UnknownAssetMetadata => "unknown-asset",
            QuarantineCode::DeceptiveRevertReason => "deceptive-revert",
            QuarantineCode::FeeExtractionPattern => "fee-extraction",
        }
    }
}

impl std::fmt::Display for QuarantineCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_key())
    }
}

impl FromStr for QuarantineCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuarantineCode::ALL
            .into_iter()
            .find(|code| code.config_key() == s)
            .ok_or_else(|| format!("unknown quarantine code '{s}'"))
    }
}

/// Tunable inputs of the heuristic battery
#[derive(Debug, Clone)]
pub struct QuarantinePolicy {
    /// Spenders the user (or the hosting app) explicitly vouches for
    pub trusted_spenders: HashSet<Address>,
    /// Approval amounts at or above this count as "unlimited"
    pub near_unlimited_threshold: U256,
    /// Codes switched off by configuration
    pub disabled: HashSet<QuarantineCode>,
}

impl Default for QuarantinePolicy {
    fn default() -> Self {
        Self {
            trusted_spenders: HashSet::new(),
            near_unlimited_threshold: U256::MAX >> 1,
            disabled: HashSet::new(),
        }
    }
}

impl QuarantinePolicy {
    fn enabled(&self, code: QuarantineCode) -> bool {
        !self.disabled.contains(&code)
    }
}

/// Is there anyone vouching for this spender: the trusted list, the address
/// book, or an earlier transaction in the same chain that already dealt with
/// it openly.
fn spender_is_known(
    spender: Address,
    priors: &[VisualizerResult],
    book: &dyn AddressBookLookup,
    policy: &QuarantinePolicy,
) -> bool {
    if policy.trusted_spenders.contains(&spender) {
        return true;
    }
    if matches!(
        book.lookup(spender).map(|entry| entry.kind),
        Some(AddressKind::Contract) | Some(AddressKind::Token) | Some(AddressKind::NftCollection)
    ) {
        return true;
    }
    priors.iter().any(|prior| {
        prior.recipient == Some(spender)
            || prior.decoded_events().any(|event| event.approval_target() == Some(spender))
    })
}

fn looks_deceptive(reason: &str) -> bool {
    let lowered = reason.to_lowercase();
    const BAIT: [&str; 6] = ["success", "approved", "claim", "airdrop", "http://", "https://"];
    BAIT.iter().any(|needle| lowered.contains(needle))
}

/// Runs the full battery over one transaction. `priors` are the visualizer
/// results of every earlier transaction in the same chain.
pub fn inspect(
    current: &VisualizerResult,
    priors: &[VisualizerResult],
    book: &dyn AddressBookLookup,
    policy: &QuarantinePolicy,
) -> Vec<QuarantineCode> {
    let mut codes: Vec<QuarantineCode> = Vec::new();
    let mut add = |code: QuarantineCode, codes: &mut Vec<QuarantineCode>| {
        if policy.enabled(code) && !codes.contains(&code) {
            warn!(code = %code, "quarantine heuristic matched");
            codes.push(code);
        }
    };

    // Failed transactions ran no events; only the revert text is worth a look.
    if current.status == StatusCode::Failure {
        if current.error.as_deref().is_some_and(looks_deceptive) {
            add(QuarantineCode::DeceptiveRevertReason, &mut codes);
        }
        return codes;
    }

    // -- unlimited approval to an unknown spender --
    for event in current.decoded_events() {
        let unlimited = match event {
            TokenEvent::Erc20Approval { amount, .. } => *amount >= policy.near_unlimited_threshold,
            // a collection-wide operator grant is unlimited by definition
            TokenEvent::ApprovalForAll { approved: true, .. } => true,
            _ => false,
        };
        if unlimited {
            if let Some(spender) = event.approval_target() {
                if !spender_is_known(spender, priors, book, policy) {
                    add(QuarantineCode::UnlimitedApprovalToUnknownSpender, &mut codes);
                }
            }
        }
    }

    // -- balance decrease with no transfer event naming the address --
    for change in &current.eth_balance_changes {
        if change.after >= change.before || change.address == current.sender {
            continue;
        }
        let explained = current.value_transfers.iter().any(|t| t.from == change.address)
            || current.decoded_events().any(|event| match event {
                TokenEvent::Erc20Transfer { from, .. }
                | TokenEvent::Erc721Transfer { from, .. } => *from == change.address,
                _ => false,
            });
        if !explained {
            add(QuarantineCode::SilentBalanceDrain, &mut codes);
        }
    }

    // -- approval to a contract never invoked in this transaction --
    let invoked: HashSet<Address> = current
        .recipient
        .into_iter()
        .chain(current.token_results.iter().filter_map(|event| match event {
            TokenEvent::Unknown { log } => Some(log.address),
            decoded => decoded.asset(),
        }))
        .collect();
    for event in current.decoded_events() {
        if let Some(spender) = event.approval_target() {
            if !invoked.contains(&spender) && !spender_is_known(spender, priors, book, policy) {
                add(QuarantineCode::ApprovalToUninvokedSpender, &mut codes);
            }
        }
    }

    // -- fungible asset whose metadata cannot be resolved --
    for event in current.decoded_events() {
        let token = match event {
            TokenEvent::Erc20Transfer { token, .. } | TokenEvent::Erc20Approval { token, .. } => {
                *token
            }
            _ => continue,
        };
        let resolvable = book
            .lookup(token)
            .is_some_and(|entry| entry.kind == AddressKind::Token && entry.decimals.is_some());
        if !resolvable {
            add(QuarantineCode::UnknownAssetMetadata, &mut codes);
        }
    }

    // -- transfer route that skims a fee on the way --
    for route in collapse_routes(&current.token_results) {
        if route.fungible && route.skims() && route.from == current.sender {
            add(QuarantineCode::FeeExtractionPattern, &mut codes);
        }
    }

    codes
}

/// Per-transaction codes for a whole chain, each transaction seeing only its
/// predecessors as context
pub fn inspect_chain(
    results: &[VisualizerResult],
    book: &dyn AddressBookLookup,
    policy: &QuarantinePolicy,
) -> Vec<Vec<QuarantineCode>> {
    results
        .iter()
        .enumerate()
        .map(|(index, result)| inspect(result, &results[..index], book, policy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressbook::StaticAddressBook;
    use crate::chain::ValueTransfer;
    use crate::visualizer::EthBalanceChange;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn base_result() -> VisualizerResult {
        VisualizerResult {
            status: StatusCode::Success,
            error: None,
            gas_used: 21_000,
            eth_balance_changes: Vec::new(),
            token_results: Vec::new(),
            value_transfers: Vec::new(),
            sender: addr(1),
            recipient: Some(addr(2)),
            recipient_has_code: false,
            recipient_kind: None,
            value: U256::ZERO,
            input_empty: true,
            from_donor: false,
        }
    }

    fn approval(token: u8, spender: u8, amount: U256) -> TokenEvent {
        TokenEvent::Erc20Approval {
            token: addr(token),
            owner: addr(1),
            spender: addr(spender),
            amount,
        }
    }

    #[test]
    fn test_unlimited_approval_to_unseen_address_always_flags() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![approval(0x70, 0xe1, U256::MAX)];

        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);
        let codes = inspect(&result, &[], &book, &QuarantinePolicy::default());
        assert!(codes.contains(&QuarantineCode::UnlimitedApprovalToUnknownSpender));
    }

    #[test]
    fn test_trusted_spender_suppresses_unlimited_approval() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![approval(0x70, 0xe1, U256::MAX)];

        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);
        let policy = QuarantinePolicy {
            trusted_spenders: [addr(0xe1)].into_iter().collect(),
            ..Default::default()
        };
        let codes = inspect(&result, &[], &book, &policy);
        assert!(!codes.contains(&QuarantineCode::UnlimitedApprovalToUnknownSpender));
    }

    #[test]
    fn test_small_approval_is_not_unlimited() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![approval(0x70, 0xe1, U256::from(1_000))];

        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);
        let codes = inspect(&result, &[], &book, &QuarantinePolicy::default());
        assert!(!codes.contains(&QuarantineCode::UnlimitedApprovalToUnknownSpender));
    }

    #[test]
    fn test_clean_transfer_between_known_users_is_empty() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![TokenEvent::Erc20Transfer {
            token: addr(0x70),
            from: addr(1),
            to: addr(2),
            amount: U256::from(100),
        }];

        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);
        book.insert_user(addr(1), "alice");
        book.insert_user(addr(2), "bob");
        let codes = inspect(&result, &[], &book, &QuarantinePolicy::default());
        assert!(codes.is_empty(), "clean transfer must produce no codes, got {codes:?}");
    }

    #[test]
    fn test_silent_drain_detected() {
        let victim = addr(0x55);
        let mut result = base_result();
        result.eth_balance_changes = vec![EthBalanceChange {
            address: victim,
            before: U256::from(100),
            after: U256::from(40),
        }];
        // no value transfer or token event names the victim as source

        let codes = inspect(&result, &[], &StaticAddressBook::empty(), &QuarantinePolicy::default());
        assert!(codes.contains(&QuarantineCode::SilentBalanceDrain));
    }

    #[test]
    fn test_explained_decrease_is_not_a_drain() {
        let payer = addr(0x55);
        let mut result = base_result();
        result.eth_balance_changes = vec![EthBalanceChange {
            address: payer,
            before: U256::from(100),
            after: U256::from(40),
        }];
        result.value_transfers =
            vec![ValueTransfer { from: payer, to: addr(2), amount: U256::from(60) }];

        let codes = inspect(&result, &[], &StaticAddressBook::empty(), &QuarantinePolicy::default());
        assert!(!codes.contains(&QuarantineCode::SilentBalanceDrain));
    }

    #[test]
    fn test_approval_to_uninvoked_spender() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        // approval lands on 0xe1, which is neither the call target nor an
        // emitting contract
        result.token_results = vec![approval(0x70, 0xe1, U256::from(500))];

        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);
        let codes = inspect(&result, &[], &book, &QuarantinePolicy::default());
        assert!(codes.contains(&QuarantineCode::ApprovalToUninvokedSpender));
    }

    #[test]
    fn test_unknown_asset_metadata() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![TokenEvent::Erc20Transfer {
            token: addr(0x70),
            from: addr(1),
            to: addr(2),
            amount: U256::from(100),
        }];

        let codes = inspect(&result, &[], &StaticAddressBook::empty(), &QuarantinePolicy::default());
        assert!(codes.contains(&QuarantineCode::UnknownAssetMetadata));
    }

    #[test]
    fn test_failed_transaction_runs_only_revert_check() {
        let mut result = base_result();
        result.status = StatusCode::Failure;
        result.error = Some("Transfer successful! Visit https://evil.example to claim".into());
        // poison that would fire event-based checks if they ran
        result.token_results = vec![approval(0x70, 0xe1, U256::MAX)];

        let codes = inspect(&result, &[], &StaticAddressBook::empty(), &QuarantinePolicy::default());
        assert_eq!(codes, vec![QuarantineCode::DeceptiveRevertReason]);
    }

    #[test]
    fn test_honest_revert_is_clean() {
        let mut result = base_result();
        result.status = StatusCode::Failure;
        result.error = Some("ERC20: transfer amount exceeds balance".into());
        let codes = inspect(&result, &[], &StaticAddressBook::empty(), &QuarantinePolicy::default());
        assert!(codes.is_empty());
    }

    #[test]
    fn test_fee_extraction_route() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![
            TokenEvent::Erc20Transfer {
                token: addr(0x70),
                from: addr(1),
                to: addr(9),
                amount: U256::from(100),
            },
            TokenEvent::Erc20Transfer {
                token: addr(0x70),
                from: addr(9),
                to: addr(2),
                amount: U256::from(90),
            },
        ];
        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);

        let codes = inspect(&result, &[], &book, &QuarantinePolicy::default());
        assert!(codes.contains(&QuarantineCode::FeeExtractionPattern));
    }

    #[test]
    fn test_disabled_code_never_fires() {
        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![approval(0x70, 0xe1, U256::MAX)];
        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);

        let policy = QuarantinePolicy {
            disabled: [
                QuarantineCode::UnlimitedApprovalToUnknownSpender,
                QuarantineCode::ApprovalToUninvokedSpender,
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let codes = inspect(&result, &[], &book, &policy);
        assert!(codes.is_empty());
    }

    #[test]
    fn test_prior_interaction_vouches_for_spender() {
        let spender = addr(0xe1);
        let mut earlier = base_result();
        earlier.recipient = Some(spender);

        let mut result = base_result();
        result.recipient = Some(addr(0x70));
        result.token_results = vec![approval(0x70, 0xe1, U256::MAX)];
        let mut book = StaticAddressBook::empty();
        book.insert_token(addr(0x70), "TKN", 18);

        let codes = inspect(&result, &[earlier], &book, &QuarantinePolicy::default());
        assert!(!codes.contains(&QuarantineCode::UnlimitedApprovalToUnknownSpender));
    }

    #[test]
    fn test_code_parsing_round_trip() {
        for code in QuarantineCode::ALL {
            assert_eq!(code.to_string().parse::<QuarantineCode>(), Ok(code));
        }
        assert!("not-a-code".parse::<QuarantineCode>().is_err());
    }
}
