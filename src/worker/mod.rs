//! Worker communication module.
//!
//! Embeds a long-running vector-store worker as a supervised child process
//! and exposes it as an async RPC facility. The worker is an opaque black
//! box reachable only through NDJSON over its stdin/stdout.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     Host Application (Tokio)                   │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                      WorkerGateway                       │  │
//! │  │   invoke(command, params) -> result | error              │  │
//! │  │   - AnswerCache: TTL + FIFO bound, query results only    │  │
//! │  │   - Multiplexer: correlation ids, pending calls, timeout │  │
//! │  │   - Supervisor: spawn / ready / crash / windowed restart │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! │                 stdin (NDJSON) │ stdout (NDJSON)               │
//! └────────────────────────────────┼───────────────────────────────┘
//!                                  ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │            Worker (Long-Running Child Process)                 │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tether::worker::{GatewayConfig, WorkerGateway};
//! use tether::worker::protocol::QueryParams;
//!
//! let gateway = WorkerGateway::start(GatewayConfig::new(
//!     "python3",
//!     vec!["vector_daemon.py".to_string()],
//! ));
//! gateway.wait_until_ready(std::time::Duration::from_secs(10)).await?;
//!
//! let answer = gateway
//!     .query_question(QueryParams::new("What is X?", None))
//!     .await?;
//!
//! gateway.stop().await;
//! ```

mod error;
mod gateway;
mod mux;
pub mod protocol;
mod supervisor;

pub use error::{WorkerError, WorkerResult};
pub use gateway::{GatewayConfig, WorkerGateway, DEFAULT_CALL_TIMEOUT};
pub use mux::Multiplexer;
pub use supervisor::{
    Supervisor, SupervisorConfig, WorkerState, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_DELAY,
    DEFAULT_RESTART_WINDOW,
};
