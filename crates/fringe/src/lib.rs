//! fringe - interferometer integration-period archive.
//!
//! This crate records the fixed-cadence measurements produced by a
//! two-input interferometer pipeline, persists them in a UTC
//! date-partitioned on-disk archive, and serves historical and live
//! ranges to remote clients over a simple TCP protocol.
//!
//! # Components
//!
//! - [`IntegrationRecord`]: one timestamped measurement with optional
//!   spectra and raw-sample sections, plus its binary codec
//! - [`EpochRing`]: thread-safe epoch-indexed circular buffer used for
//!   producer/consumer handoff and as the store's recent-data cache
//! - [`TimeSeriesStore`]: write-behind buffering, minute-partitioned
//!   persistence, memory/disk range queries, and age-based retention
//! - [`net`]: the wire-protocol query service and its client-side loaders
//!
//! # Example
//!
//! ```rust,ignore
//! use fringe::{IntegrationRecord, StoreConfig, TimeSeriesStore};
//!
//! let store = TimeSeriesStore::new("/data/archive", StoreConfig::default());
//!
//! // Producer thread hands records to the store.
//! store.put(IntegrationRecord::at(now_micros));
//!
//! // Reader threads query by time range.
//! let recent = store.get_range(start_micros, 0)?;
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod net;
pub mod record;
pub mod ring;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use record::IntegrationRecord;
pub use ring::{Epoch, EpochRing};
pub use store::TimeSeriesStore;
