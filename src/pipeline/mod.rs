//! Marker generation pipeline.
//!
//! A bounded pool of workers pulls `generate_marker` jobs off the durable
//! `jobs` table and drives one ARContent through
//! `pending/failed -> processing -> ready|failed`. Concurrency is capped
//! with a semaphore per queue, built as a multi-step
//! download/compile/upload job with durable retry.

mod compiler;
mod worker;

pub use worker::{PipelinePayload, WorkerPool};
