//! AfrikRaga cart CLI - inspect and edit the persisted cart from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart (after merging the server cart)
//! ak-cart show
//!
//! # Add two of product 7, variant 2
//! ak-cart add -p 7 -v 2 -q 2 --price 25.00 --name "Adire dress"
//!
//! # Change or remove a row by id (`99` for a synced row, `7_2` for a local one)
//! ak-cart set 99 3
//! ak-cart remove 7_2
//!
//! # Empty the cart
//! ak-cart clear
//!
//! # Force a reload from the server
//! ak-cart sync
//! ```
//!
//! Every command waits for reconciliation to finish before exiting.
//! Configuration comes from the environment; see `afrikraga_cart::config`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use afrikraga_cart::{CartConfig, CartEngine};
use afrikraga_core::LineId;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "ak-cart")]
#[command(author, version, about = "AfrikRaga cart CLI")]
struct Cli {
    /// Print the cart as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the cart
    Show,
    /// Add an item to the cart
    Add {
        /// Product id
        #[arg(short, long)]
        product: i64,

        /// Variant id
        #[arg(short, long)]
        variant: Option<i64>,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Unit price
        #[arg(long)]
        price: Decimal,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Image URL
        #[arg(long)]
        image: Option<String>,
    },
    /// Set the quantity of a row; below 1 removes it
    Set {
        /// Row id
        id: LineId,

        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Remove a row
    Remove {
        /// Row id
        id: LineId,
    },
    /// Empty the cart
    Clear,
    /// Reload the cart from the server
    Sync,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Reconciliation failures are warnings, so they reach Sentry as events.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = CartConfig::from_env();
    let sentry_guard = config.as_ref().ok().and_then(init_sentry);

    // Defaults to info level for our crates if RUST_LOG is not set.
    // Logs go to stderr so stdout carries only the cart.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "afrikraga_cart=info,afrikraga_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result = match config {
        Ok(config) => run(cli, &config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        drop(sentry_guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &CartConfig) -> Result<(), CliError> {
    let cart = CartEngine::from_config(config)?;

    let outcome = match cli.command {
        Commands::Show => commands::cart::show(&cart, cli.json).await,
        Commands::Add {
            product,
            variant,
            quantity,
            price,
            name,
            image,
        } => {
            let item = commands::cart::new_item(product, variant, quantity, price, name, image);
            commands::cart::add(&cart, item, cli.json).await
        }
        Commands::Set { id, quantity } => {
            commands::cart::set_quantity(&cart, &id, quantity, cli.json).await
        }
        Commands::Remove { id } => commands::cart::remove(&cart, &id, cli.json).await,
        Commands::Clear => commands::cart::clear(&cart).await,
        Commands::Sync => commands::cart::sync(&cart, cli.json).await,
    };

    cart.shutdown().await;
    outcome
}
