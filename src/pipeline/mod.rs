// src/pipeline/mod.rs

//! High-level pipeline: per-request crawling, worker loops, supervision.

mod crawler;
mod loops;
mod supervisor;

pub use crawler::Crawler;
pub use loops::{CrawlLoop, STOP_SENTINEL};
pub use supervisor::LoopSupervisor;
