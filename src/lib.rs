//! # tether
//!
//! A supervised worker-process RPC bridge with response caching.
//!
//! tether keeps a long-running external worker (a vector-store daemon)
//! alive next to a request-serving application and exposes it as a single
//! asynchronous `invoke(command, params)` call surface.
//!
//! ## Architecture
//!
//! ```text
//! caller ──▶ WorkerGateway.invoke
//!              │  cache check (query commands only)
//!              ▼
//!            Multiplexer ── correlation id, pending call, timeout
//!              │
//!              ▼
//!            Supervisor ── NDJSON line over worker stdin
//!              │                       ▲
//!              ▼                       │
//!            worker computes ──▶ stdout line ──▶ pending call resolved
//! ```
//!
//! The supervisor restarts a crashed worker inside a bounded, windowed
//! budget; crashes, timeouts, and budget exhaustion surface as structured
//! errors to the specific callers they affect, never as panics.

pub mod cache;
pub mod config;
pub mod worker;

pub use worker::{GatewayConfig, WorkerError, WorkerGateway, WorkerResult, WorkerState};
