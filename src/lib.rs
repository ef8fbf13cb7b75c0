//! # codeshot
//!
//! Picks the most interesting code excerpts in a hosted repository, scores
//! them with an AI model (falling back to heuristics), renders the winners
//! to images and keeps the results fresh as the repository moves.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────┐
//! │   Identify   │──▶│  Fetch   │──▶│  Score  │──▶│  Render  │──▶│  SQLite  │
//! │ tree+commits │   │ (retry)  │   │ AI/heur.│   │ + upload │   │ snapshots│
//! └──────────────┘   └──────────┘   └────┬────┘   └──────────┘   └────┬─────┘
//!                                        │                            │
//!                                selection + analysis          invalidate on
//!                                      cache                     new commit
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! codeshot init
//! codeshot register repo-1 --owner acme --name widget --user u1 --summary "..."
//! GITHUB_TOKEN=... codeshot generate repo-1 --user u1
//! codeshot list repo-1 --user u1
//! codeshot invalidate repo-1 --sha def456
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Domain and collaborator error kinds |
//! | [`models`] | Core data types |
//! | [`traits`] | Collaborator contracts |
//! | [`retry`] | Retry policies |
//! | [`identify`] | Candidate identification and excerpt refinement |
//! | [`fetch`] | Retrying content fetcher |
//! | [`cache`] | Selection and analysis caches |
//! | [`scoring`] | AI scoring with heuristic fallback |
//! | [`pipeline`] | Snapshot pipeline orchestrator |
//! | [`invalidate`] | Staleness invalidation |
//! | [`store`] | Snapshot store trait and in-memory stores |
//! | [`sqlite_store`] | SQLite-backed stores |
//! | [`github`] | GitHub repository source |
//! | [`openai`] | OpenAI scorer |
//! | [`render`] | Renderer client, image storage |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod github;
pub mod identify;
pub mod invalidate;
pub mod migrate;
pub mod models;
pub mod openai;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod scoring;
pub mod sqlite_store;
pub mod store;
pub mod traits;
