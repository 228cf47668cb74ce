//! cartsync CLI - migrations, cart and inbox management.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! cartsync migrate
//!
//! # Inspect and change an account's cart (merges any local guest cart first)
//! cartsync cart show -a acct_123
//! cartsync cart add -a acct_123 -p tee-black -q 2 --size M
//! cartsync cart remove -a acct_123 -p tee-black --size M
//! cartsync cart clear -a acct_123
//!
//! # Send a notification and watch an inbox
//! cartsync notify send -a acct_123 -k order-update -t "Order Confirmed" -b "Thanks!"
//! cartsync notify watch -a acct_123
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `cart` - Show and mutate an account cart
//! - `notify` - Send notifications and watch an inbox

#![cfg_attr(not(test), forbid(unsafe_code))]

use cartsync::SyncConfig;
use cartsync_core::NotificationKind;
use clap::{Parser, Subcommand, ValueEnum};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cartsync")]
#[command(author, version, about = "cartsync CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Show and change an account's cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Send notifications and watch an inbox
    Notify {
        #[command(subcommand)]
        action: NotifyAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart
    Show {
        /// Account ID
        #[arg(short, long)]
        account: String,
    },
    /// Add a product to the cart
    Add {
        /// Account ID
        #[arg(short, long)]
        account: String,

        /// Product ID
        #[arg(short, long)]
        product: String,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Selected size
        #[arg(long)]
        size: Option<String>,

        /// Selected color
        #[arg(long)]
        color: Option<String>,
    },
    /// Remove a line from the cart
    Remove {
        /// Account ID
        #[arg(short, long)]
        account: String,

        /// Product ID
        #[arg(short, long)]
        product: String,

        /// Selected size
        #[arg(long)]
        size: Option<String>,

        /// Selected color
        #[arg(long)]
        color: Option<String>,

        /// Remove every variant of the product
        #[arg(long, conflicts_with_all = ["size", "color"])]
        all_variants: bool,
    },
    /// Remove every line from the cart
    Clear {
        /// Account ID
        #[arg(short, long)]
        account: String,
    },
}

#[derive(Subcommand)]
enum NotifyAction {
    /// Insert a notification into an account's inbox
    Send {
        /// Account ID
        #[arg(short, long)]
        account: String,

        /// Notification kind
        #[arg(short, long, value_enum, default_value_t = KindArg::General)]
        kind: KindArg,

        /// Title
        #[arg(short, long)]
        title: String,

        /// Body text
        #[arg(short, long, default_value = "")]
        body: String,
    },
    /// Print an inbox and surface new notifications until Ctrl+C
    Watch {
        /// Account ID
        #[arg(short, long)]
        account: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    OrderUpdate,
    CartReminder,
    Promotion,
    General,
}

impl From<KindArg> for NotificationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::OrderUpdate => Self::OrderUpdate,
            KindArg::CartReminder => Self::CartReminder,
            KindArg::Promotion => Self::Promotion,
            KindArg::General => Self::General,
        }
    }
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &SyncConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
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

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Must be initialized before the tracing subscriber
    let sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartsync=info,cartsync_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        // process::exit skips destructors; flush Sentry first
        drop(sentry_guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run(config).await?,
        Commands::Cart { action } => match action {
            CartAction::Show { account } => commands::cart::show(config, &account).await?,
            CartAction::Add {
                account,
                product,
                quantity,
                size,
                color,
            } => {
                commands::cart::add(config, &account, &product, quantity, size, color).await?;
            }
            CartAction::Remove {
                account,
                product,
                size,
                color,
                all_variants,
            } => {
                let scope = if all_variants {
                    commands::cart::RemoveScope::AllVariants
                } else {
                    commands::cart::RemoveScope::Line { size, color }
                };
                commands::cart::remove(config, &account, &product, scope).await?;
            }
            CartAction::Clear { account } => commands::cart::clear(config, &account).await?,
        },
        Commands::Notify { action } => match action {
            NotifyAction::Send {
                account,
                kind,
                title,
                body,
            } => {
                commands::notify::send(config, &account, kind.into(), &title, &body).await?;
            }
            NotifyAction::Watch { account } => commands::notify::watch(config, &account).await?,
        },
    }
    Ok(())
}
