//! # playground-core
//!
//! Event bridge and reactive state store behind the function playground panel.
//! The host process owns parsing, compilation and execution; this crate turns
//! its asynchronous message stream into a consistent view of project state and
//! turns user intents into correlated commands.
//!
//! ## Design Principles
//!
//! - **Single-threaded**: all handling runs to completion on one thread. Types
//!   holding callbacks are `!Send`.
//! - **Single writer**: only the [`Dispatcher`] commits to the [`Store`].
//! - **No panics on input**: malformed or unknown messages become typed errors
//!   and move the panel to its error state; stale results are discarded, not
//!   reported as errors.
//! - **Injectable time**: stall detection reads a clock supplied by the caller.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use playground_core::{MemoryChannel, Panel, PanelConfig};
//!
//! let channel = MemoryChannel::new();
//! let mut panel = Panel::new(PanelConfig::default(), Box::new(channel.clone()));
//! panel.mount();
//! panel.deliver(r#"{"kind":"ready","sequence":1,"payload":{"functions":[]}}"#);
//! let view = panel.read();
//! ```

pub mod bus;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod panel;
pub mod store;
pub mod transport;

pub use bus::{EventBus, ListenerId};
pub use config::{default_config_path, load_config, PanelConfig};
pub use decoder::{decode, next_readiness, Readiness, Transition};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use emitter::{
    Admission, CommandEmitter, CorrelationId, IntentStatus, IssuedRun, RunTarget, TestRunIntent,
};
pub use error::{BridgeError, ConfigError, DiscardReason, EmitError, ProtocolError, TransportError};
pub use panel::Panel;
pub use store::{
    DiscardRecord, PanelView, ProjectSnapshot, RunStatus, Selection, Slice, Store, StoreChange,
    SubscriptionId,
};
pub use transport::{HostChannel, MemoryChannel, RawMessage, Transport, WriterChannel};
