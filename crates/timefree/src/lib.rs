//! Time-shifted radio program retrieval engine.
//!
//! A program broadcast in the past is published as a rolling HLS window that
//! the server only advances in real time. This crate authenticates against
//! the service, resolves the program from the daily schedule, then opens many
//! seeked playlist sessions in parallel so the whole program is collected in
//! a fraction of its broadcast length.
//!
//! ## Component Overview
//!
//! - `auth`: two-step handshake yielding the session headers and area id
//! - `schedule`: program lookup in the per-day, per-region schedule
//! - `playlist`: master/media playlist chain and its polling loop
//! - `fetcher`: deduplicating, atomic segment downloads
//! - `accelerator`: checkpoint computation and batched session execution
//! - `assembler`: ordered concatenation of the downloaded segments

pub mod accelerator;
pub mod assembler;
pub mod auth;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod playlist;
pub mod reference;
pub mod retry;
pub mod schedule;
pub mod timestamp;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use accelerator::{AccelerationReport, ParallelAccelerator};
pub use assembler::{AssembleReport, Assembler};
pub use auth::{AuthContext, AuthSession};
pub use config::{
    AcceleratorConfig, AssembleConfig, ConcatMode, HttpConfig, PlaylistConfig, ServiceContract,
    TimefreeConfig,
};
pub use error::{Result, TimefreeError};
pub use fetcher::{FetchSummary, SegmentFetcher};
pub use playlist::{PlaylistChain, StreamSession};
pub use reference::ProgramRef;
pub use retry::RetryPolicy;
pub use schedule::{ProgramLookup, ProgramMetadata, ProgramResolver};
pub use timestamp::Timestamp;
pub use transport::{HttpResponse, ReqwestTransport, Transport};
