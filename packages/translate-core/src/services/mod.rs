//! Application services layer.
//!
//! Business logic services that orchestrate between the API layer and the
//! external ports (`crate::ports`): the session/connection store, the audio
//! ingest bus, the WebSocket gateway, and the translation worker pool.

pub mod gateway;
pub mod ingest_bus;
pub mod session_store;
pub mod translation_worker;

pub use gateway::{AcceptRequest, AcceptedRole, Gateway};
pub use ingest_bus::{IngestBus, IngestBusConfig};
pub use session_store::SessionConnectionStore;
pub use translation_worker::{TranslationWorkerPool, WorkerStats};
