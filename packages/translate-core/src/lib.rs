//! translate-core - shared library for the real-time audio translation pipeline.
//!
//! This crate implements the session-and-streaming control plane plus the
//! batching translation pipeline described in the design document: a
//! speaker's microphone audio is batched, transcribed, translated per
//! listener language, synthesized back to speech, and delivered over
//! WebSocket as a time-limited fetch URL. It is designed to be used by a
//! standalone headless server (`apps/server`) and is runtime-agnostic at
//! its core via the [`runtime::TaskSpawner`] abstraction.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`model`]: Core data model (`Session`, `Connection`, `AudioBatch`)
//! - [`services`]: Session/connection store, ingest bus, gateway, worker pool
//! - [`ports`]: Abstract STT/translate/synthesize/blob-store collaborators
//! - [`auth`]: Speaker-token verification against a cached JWKS set
//! - [`language`]: Language-pair validation with a degraded safe-list fallback
//! - [`ids`]: Human-memorable session identifier allocation
//! - [`api`]: HTTP/WebSocket handlers and router construction
//! - [`events`]: Outbound wire frames and the `Notifier` seam
//! - [`bootstrap`]: Composition root wiring components A-H (component I)
//! - [`state`]: Application configuration
//! - [`clock`]: Injectable time source
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from concrete
//! upstream services and the async runtime:
//!
//! - [`runtime::TaskSpawner`]: Spawning background tasks
//! - [`clock::Clock`]: Injectable monotonic time source
//! - [`ports::Stt`], [`ports::Translate`], [`ports::Synthesize`], [`ports::BlobStore`]: upstream ports
//! - [`events::Notifier`]: Outbound delivery, decoupling the worker pool from the gateway
//!
//! Each trait ships an in-memory fake alongside it for tests.

#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod clock;
pub mod error;
pub mod events;
pub mod ids;
pub mod language;
pub mod model;
pub mod ports;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use auth::{AuthVerifier, Principal};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use clock::{Clock, SystemClock};
pub use error::{ErrorCode, PipelineError, PipelineResult};
pub use events::{Notifier, OutboundFrame};
pub use ids::new_id;
pub use language::LanguageValidator;
pub use model::{AudioBatch, Connection, Role, Session, SessionStatus};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::Config;
pub use utils::now_millis;

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
