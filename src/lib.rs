//! # Ramen Review
//!
//! Review engine for a ramen shop map: a two-level review/reply tree, a
//! Bayesian shop rating kept in step with every review change, and the
//! lifecycle of uploaded photos and videos.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐
//! │   HTTP   │──▶│ ReviewStore  │──▶│  Consistency   │──▶ rating
//! │   CLI    │   │  ShopStore   │   │   Maintainer   │
//! └──────────┘   └──────┬───────┘   └────────────────┘
//!                       │
//!                       ▼
//!                ┌──────────────┐   ┌────────────────┐
//!                │ MediaManager │──▶│  FileStorage   │
//!                └──────────────┘   └────────────────┘
//! ```
//!
//! Everything below the stores runs on the caller's `sqlx` transaction,
//! so a review, its media rows and the derived counters commit together.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`auth`] | Actor identity and permission checks |
//! | [`db`] | Database connection and write transactions |
//! | [`migrate`] | Schema migrations |
//! | [`storage`] | File storage adapters |
//! | [`media`] | Media lifecycle |
//! | [`rating`] | Weighted rating aggregation |
//! | [`consistency`] | Derived-field maintenance |
//! | [`reviews`] | Review tree store |
//! | [`shops`] | Shop repository |
//! | [`users`] | User records and cascading user deletion |
//! | [`engine`] | Wiring |
//! | [`server`] | HTTP server |

pub mod auth;
pub mod config;
pub mod consistency;
pub mod db;
pub mod engine;
pub mod error;
pub mod media;
pub mod migrate;
pub mod models;
pub mod rating;
pub mod reviews;
pub mod server;
pub mod shops;
pub mod storage;
pub mod users;
