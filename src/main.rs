//! # Ramen review CLI (`ramen`)
//!
//! Administrative front end for the review engine: schema setup, the HTTP
//! server, seeding users and shops, and rating repair.
//!
//! ## Usage
//!
//! ```bash
//! ramen --config ./config/ramen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ramen init` | Create the SQLite database and schema |
//! | `ramen serve` | Start the HTTP server |
//! | `ramen user add <name>` | Create a user |
//! | `ramen shop add <name>` | Create a shop |
//! | `ramen shop list` | Print a page of shops, optionally filtered |
//! | `ramen shop show <id>` | Print a shop with its rating fields |
//! | `ramen shop top` | Print the top-rated shops |
//! | `ramen shop recompute <id>` | Recompute one shop's rating |
//! | `ramen shop recompute-all` | Recompute every shop's rating |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `ramen_review=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ramen_review::auth::Role;
use ramen_review::config;
use ramen_review::engine::Engine;
use ramen_review::migrate;
use ramen_review::server;
use ramen_review::shops::ShopFilter;
use ramen_review::users;

#[derive(Parser)]
#[command(
    name = "ramen",
    about = "Reviews, replies, ratings and media for a ramen shop map",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ramen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage shops and their ratings.
    Shop {
        #[command(subcommand)]
        action: ShopAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Add {
        username: String,

        /// One of `user`, `shop_owner`, `admin`.
        #[arg(long, default_value = "user")]
        role: String,
    },
}

#[derive(Subcommand)]
enum ShopAction {
    /// Create a shop.
    Add {
        name: String,

        #[arg(long, default_value = "")]
        address: String,

        /// User id of the shop owner.
        #[arg(long)]
        owner: Option<i64>,
    },

    /// Print a page of shops in id order.
    List {
        #[arg(long, default_value_t = 0)]
        page: i64,

        #[arg(long, default_value_t = 20)]
        size: i64,

        /// Only shops whose name contains this text.
        #[arg(long)]
        name: Option<String>,

        /// Only shops whose address contains this text.
        #[arg(long)]
        address: Option<String>,
    },

    /// Print a shop.
    Show { id: i64 },

    /// Print the top-rated shops.
    Top {
        #[arg(long, default_value_t = 10)]
        limit: i64,

        /// Only shops whose address contains this text.
        #[arg(long)]
        region: Option<String>,
    },

    /// Recompute one shop's rating from its reviews.
    Recompute { id: i64 },

    /// Recompute the rating of every shop.
    RecomputeAll,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ramen_review=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::User {
            action: UserAction::Add { username, role },
        } => {
            let role = Role::parse(&role).ok_or_else(|| anyhow::anyhow!("unknown role: {}", role))?;
            let engine = Engine::open(&cfg).await?;
            let user = users::create_user(&engine.pool, &username, role).await?;
            println!("Created user {} ({}) with id {}", user.username, role.as_str(), user.id);
        }
        Commands::Shop { action } => {
            let engine = Engine::open(&cfg).await?;
            run_shop_action(&engine, action).await?;
        }
    }

    Ok(())
}

async fn run_shop_action(engine: &Engine, action: ShopAction) -> anyhow::Result<()> {
    match action {
        ShopAction::Add {
            name,
            address,
            owner,
        } => {
            let shop = engine.shops.create_shop(&name, &address, owner).await?;
            println!("Created shop {} with id {}", shop.name, shop.id);
        }
        ShopAction::List {
            page,
            size,
            name,
            address,
        } => {
            let filter = ShopFilter { name, address };
            let listed = engine.shops.list_shops(&filter, page, size).await?;
            for shop in &listed.content {
                println!(
                    "{:>4}  {}  ({})  reviews={}",
                    shop.id, shop.name, shop.address, shop.review_count
                );
            }
            println!(
                "Page {} of {} ({} shops).",
                listed.page_no + 1,
                listed.total_pages.max(1),
                listed.total_elements
            );
        }
        ShopAction::Show { id } => {
            let shop = engine.shops.get_shop(id).await?;
            println!("{}", serde_json::to_string_pretty(&shop)?);
        }
        ShopAction::Top { limit, region } => {
            let shops = engine.shops.top_rated(limit, region.as_deref()).await?;
            if shops.is_empty() {
                println!("No shops with enough reviews yet.");
            }
            for (rank, shop) in shops.iter().enumerate() {
                println!(
                    "{:>3}. {}  weighted={} average={} reviews={}",
                    rank + 1,
                    shop.name,
                    shop.weighted_rating,
                    shop.average_rating,
                    shop.review_count
                );
            }
        }
        ShopAction::Recompute { id } => {
            let summary = engine.shops.recompute_rating(id).await?;
            println!(
                "Shop {}: reviews={} average={} weighted={}",
                id, summary.review_count, summary.average_rating, summary.weighted_rating
            );
        }
        ShopAction::RecomputeAll => {
            let count = engine.shops.recompute_all().await?;
            println!("Recomputed {} shops.", count);
        }
    }
    Ok(())
}
