//! DLS Ingest Library
//!
//! Parses statistical time series published as SDMX-ML and keeps a
//! versioned store of them up to date.
//!
//! # Pipeline
//!
//! - [`sdmx::parse_structure`] reads a structure message into codelists,
//!   concepts, dataflows, categories and per-dataset key layouts.
//! - [`sdmx::SeriesReader`] streams canonical [`models::SeriesRecord`]s out
//!   of a data message in any of the five supported wire shapes.
//! - [`dataset::DatasetRun`] drives one dataset: [`reconcile::Reconciler`]
//!   diffs records against the [`store::SeriesStore`], writes inserts,
//!   in-place updates and revision snapshots, and the dataset document is
//!   stored with its lifecycle flags and run statistics.
//! - [`runner::ProviderRunner`] runs every dataset of a provider under an
//!   error budget.
//!
//! # Example
//!
//! ```no_run
//! use dls_ingest::dataset::DatasetRun;
//! use dls_ingest::provider::ProviderProfile;
//! use dls_ingest::reconcile::ReconcileOptions;
//! use dls_ingest::sdmx::{parse_structure, SeriesReader};
//! use dls_ingest::store::{MemoryStore, SeriesStore};
//! use dls_ingest::xml::open_document;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let profile = ProviderProfile::ecb();
//!     let def = parse_structure(open_document("EXR.structure.xml")?)?;
//!     let layout = def.layout("EXR")?;
//!
//!     let store = MemoryStore::new();
//!     store.upsert_provider(&profile.provider()).await?;
//!
//!     let mut run = DatasetRun::open(&store, "ECB", "EXR", ReconcileOptions::default()).await?;
//!     run.apply_layout(&layout);
//!     let mut series = SeriesReader::new(open_document("EXR.data.xml")?, layout, profile)?;
//!     let dataset = run.update_database(&mut series).await?;
//!     println!("{:?}", dataset.last_run);
//!     Ok(())
//! }
//! ```

pub mod categories;
pub mod codes;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod models;
pub mod period;
pub mod provider;
pub mod reconcile;
pub mod runner;
pub mod sdmx;
pub mod store;
pub mod xml;

pub use error::{IngestError, Result};
