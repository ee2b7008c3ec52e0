// src/services/mod.rs

//! Service layer for the crawler engine.
//!
//! This module contains the collaborators the pipeline is wired with:
//! - Conditional fetching (`Fetcher`)
//! - Per-URL leasing (`UrlLocker`, `MemoryLocker`)
//! - Document processing and work discovery (`Processor`)

mod events;
mod fetcher;
mod locker;
mod processor;

pub use fetcher::Fetcher;
pub use locker::{Lease, MemoryLocker, UrlLocker};
pub use processor::{Discoveries, Processor, VERSION as PROCESSOR_VERSION};
