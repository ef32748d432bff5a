//! Warden - pre-flight transaction simulation and threat triage
//!
//! Run with: cargo run -- --offline
//!
//! Anchors a simulation session, pushes a couple of pending transactions
//! through it and prints the decoded verdict for each: intent, balance
//! movements, token events and any quarantine codes.

use alloy_primitives::{Address, Bytes, U256};
use chrono::Utc;
use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden::addressbook::{AddressBookLookup, StaticAddressBook};
use warden::chain::{ChainStateProvider, HttpChainProvider, LocalChainProvider};
use warden::config::Config;
use warden::simulation::controller::{Evaluation, Simulator};
use warden::simulation::state::{TransactionEnvelope, Website};
use warden::visualizer::{StatusCode, TokenEvent};

#[derive(Parser, Debug)]
#[command(name = "warden", about = "Pre-flight transaction simulation and threat triage")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Run against a deterministic in-memory chain instead of a node
    #[arg(long)]
    offline: bool,
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🛡  WARDEN - Pre-flight Transaction Triage").cyan().bold()
    );
    println!(
        "{}",
        style("    Simulate | Decode | Classify | Quarantine").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn format_address(addr: Address, book: &dyn AddressBookLookup) -> String {
    if let Some(name) = book.lookup(addr).and_then(|entry| entry.name) {
        return name;
    }
    let hex = format!("{addr:?}");
    format!("{}…{}", &hex[..6], &hex[hex.len() - 4..])
}

fn format_event(event: &TokenEvent, book: &dyn AddressBookLookup) -> String {
    match event {
        TokenEvent::Erc20Transfer { token, from, to, amount } => format!(
            "{} {} : {} → {}",
            amount,
            format_address(*token, book),
            format_address(*from, book),
            format_address(*to, book)
        ),
        TokenEvent::Erc20Approval { token, spender, amount, .. } => format!(
            "approve {} {} to {}",
            amount,
            format_address(*token, book),
            format_address(*spender, book)
        ),
        TokenEvent::Erc721Transfer { collection, from, to, token_id } => format!(
            "{} #{} : {} → {}",
            format_address(*collection, book),
            token_id,
            format_address(*from, book),
            format_address(*to, book)
        ),
        TokenEvent::Erc721Approval { collection, approved, token_id, .. } => format!(
            "approve {} #{} to {}",
            format_address(*collection, book),
            token_id,
            format_address(*approved, book)
        ),
        TokenEvent::ApprovalForAll { collection, operator, approved, .. } => format!(
            "operator {} for all of {}: {}",
            format_address(*operator, book),
            format_address(*collection, book),
            if *approved { "granted" } else { "revoked" }
        ),
        TokenEvent::Unknown { log } => {
            format!("unrecognized event from {}", format_address(log.address, book))
        }
    }
}

fn print_report(evaluation: &Evaluation, book: &dyn AddressBookLookup) {
    println!();
    println!(
        "{}",
        style(format!(
            "═══ VERDICT @ block {} (seq {}, {}) ═══",
            evaluation.block_number,
            evaluation.seq,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ))
        .blue()
        .bold()
    );

    for (i, evaluated) in evaluation.transactions.iter().enumerate() {
        let status = match evaluated.result.status {
            StatusCode::Success => style("✓ success").green(),
            StatusCode::Failure => style("✗ reverts").red(),
        };
        println!();
        println!(
            "  {}. {} | {} | {} | gas {}",
            i + 1,
            status,
            style(evaluated.intent.to_string()).cyan().bold(),
            evaluated.website.origin,
            evaluated.result.gas_used
        );
        if let Some(reason) = &evaluated.result.error {
            println!("     revert: {reason}");
        }
        for change in &evaluated.result.eth_balance_changes {
            println!(
                "     {} : {} wei → {} wei",
                format_address(change.address, book),
                change.before,
                change.after
            );
        }
        for event in &evaluated.result.token_results {
            println!("     {}", format_event(event, book));
        }
        if evaluated.quarantine.is_empty() {
            println!("     {}", style("no quarantine findings").green());
        } else {
            for code in &evaluated.quarantine {
                println!("     {} {}", style("⚠ QUARANTINE:").red().bold(), code.label());
            }
        }
    }
    println!();
}

/// Pushes a small demo session through the simulator and prints the verdict
async fn run_session<P: ChainStateProvider>(
    provider: Arc<P>,
    config: &Config,
    book: &StaticAddressBook,
    alice: Address,
    bob: Address,
    extra: Option<TransactionEnvelope>,
) -> Result<()> {
    let sim = Simulator::new(provider, config.call_timeout(), config.donor_amount()).await?;

    if config.rich_mode {
        sim.set_rich_mode(true, alice).await?;
        println!("{} rich mode enabled for {}", style("✓").green(), format_address(alice, book));
    }

    let transfer =
        TransactionEnvelope::value_transfer(alice, bob, U256::from(10u64).pow(U256::from(18)), config.chain_id);
    sim.append_transaction(transfer, Website::new("https://dapp.example")).await?;
    if let Some(tx) = extra {
        sim.append_transaction(tx, Website::new("https://dapp.example")).await?;
    }

    let evaluation = sim.evaluate(book, &config.policy()).await?;
    print_report(&evaluation, book);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warden=info".parse()?),
        )
        .init();

    print_banner();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.rpc_url {
        config.rpc_url = url;
    }
    if let Err(e) = config.validate() {
        error!("configuration validation failed: {e}");
        return Err(e);
    }

    let alice = Address::repeat_byte(0xaa);
    let bob = Address::repeat_byte(0xbb);

    if cli.offline {
        println!("{} running against the in-memory chain", style("○").yellow());

        let token = Address::repeat_byte(0x70);
        let provider = LocalChainProvider::new(config.chain_id)
            .with_balance(alice, U256::from(5u64) * U256::from(10u64).pow(U256::from(18)))
            .with_token(token, &[(alice, U256::from(1_000_000u64))]);

        let mut book = StaticAddressBook::empty();
        book.insert_token(token, "DEMO", 18);
        book.insert_user(alice, "alice");
        book.insert_user(bob, "bob");

        // second demo transaction: an unlimited approval that the quarantine
        // battery should flag
        let approval = TransactionEnvelope::contract_call(
            alice,
            token,
            Bytes::from(demo_calldata::unlimited_approval(Address::repeat_byte(0xe1))),
            config.chain_id,
        );
        run_session(Arc::new(provider), &config, &book, alice, bob, Some(approval)).await?;
    } else {
        println!(
            "{} connecting to {} (chain {})",
            style("○").cyan(),
            config.rpc_url,
            config.chain_id
        );
        let provider = HttpChainProvider::connect(&config.rpc_url, config.chain_id).await?;
        let book = StaticAddressBook::mainnet();
        run_session(Arc::new(provider), &config, &book, alice, bob, None).await?;
    }

    println!("{}", style("✅ session complete").green().bold());
    Ok(())
}

mod demo_calldata {
    use alloy_primitives::{Address, U256};
    use alloy_sol_types::{sol, SolCall};

    sol! {
        function approve(address spender, uint256 amount) external returns (bool);
    }

    pub fn unlimited_approval(spender: Address) -> Vec<u8> {
        approveCall { spender, amount: U256::MAX }.abi_encode()
    }
}
