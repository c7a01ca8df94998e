//! # plansync
//!
//! Bidirectional-aware synchronization between a directory of markdown
//! planning files and a relational store.
//!
//! The on-disk tree is hierarchical: Units are folders, SubUnits are nested
//! folders, Items are leaf markdown files with an optional metadata block.
//! A sync run discovers the hierarchy, scans leaf files (incrementally when
//! a last-sync timestamp is known), detects field conflicts against stored
//! rows, resolves them under a chosen strategy and applies every write in
//! one transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! │ folder_scan  │──▶│  discovery  │   │  patterns  │
//! │ index_parser │   │  (strategy) │   │  (regex)   │
//! └──────────────┘   └──────┬──────┘   └─────┬──────┘
//!                           ▼                ▼
//!        ┌──────────────────────────────────────────┐
//!        │ engine: scan → filter → detect → resolve │
//!        └────────────────────┬─────────────────────┘
//!                             ▼
//!                      ┌─────────────┐     ┌──────────┐
//!                      │ Store.apply │────▶│  SQLite  │
//!                      │ (one tx)    │     │          │
//!                      └─────────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! plansync init                 # create database
//! plansync sync --dry-run       # preview
//! plansync sync --discovery     # reconcile hierarchy and items
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`patterns`] | Pattern validation and first-match-wins matching |
//! | [`frontmatter`] | Leaf metadata block parsing |
//! | [`folder_scan`] | Hierarchy from folder layout |
//! | [`index_parser`] | Hierarchy from the index document |
//! | [`discovery`] | Reconciles the two hierarchy sources |
//! | [`leaf_scan`] | Leaf file walk and parsing |
//! | [`incremental`] | Last-sync file filter |
//! | [`detect`] | New / matched / orphaned classification and conflicts |
//! | [`resolve`] | Conflict resolution strategies |
//! | [`store`] | Store trait, SQLite and in-memory implementations |
//! | [`engine`] | Sync state machine |
//! | [`report`] | Sync report rendering |
//! | [`progress`] | Phase progress on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod commands;
pub mod config;
pub mod db;
pub mod detect;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod folder_scan;
pub mod frontmatter;
pub mod incremental;
pub mod index_parser;
pub mod leaf_scan;
pub mod migrate;
pub mod models;
pub mod patterns;
pub mod progress;
pub mod report;
pub mod resolve;
pub mod store;
