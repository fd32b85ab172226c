//! Client side of the game: the local AI controller, the online match
//! coordinator, the session that switches between them, and the store
//! seams they talk to.

pub mod config;
pub mod error;
pub mod http_store;
pub mod local;
pub mod memory_store;
pub mod presentation;
pub mod remote;
pub mod session;
pub mod store;

pub use config::{ClientConfig, LocalTimings, RetryPolicy};
pub use error::{PlayError, StoreError};
pub use http_store::HttpStore;
pub use local::{LocalGameController, LocalPhase};
pub use memory_store::InMemoryStore;
pub use presentation::{AudioBlocked, AudioSink, Cue, CuePlayer, Presentation};
pub use remote::{RemoteMatchCoordinator, RemotePhase};
pub use session::{ActiveController, Mode, Session};
pub use store::{MatchStore, MatchSubscription, StatsStore, UpdateResult};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
