//! MCP Hub core domain
//!
//! SDK-free foundation of the hub: the declarative server
//! configuration with semantic diffing and file watching, the
//! placeholder resolution engine, the error taxonomy, and the event
//! model with its fan-out subscription bus.

pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod resolver;
pub mod state;

pub use config::{
    ConfigChange, ConfigDiff, ConfigSource, ConfigStore, DevConfig, DiffDetail, HubConfig,
    ServerConfig, ServerKind, WatchHandle, SIGNIFICANT_FIELDS,
};
pub use error::{HubError, HubResult};
pub use event::{
    CapabilityKind, HubEvent, LogLevel, LogRecord, SubscriptionEventType, SupervisorEvent,
};
pub use event_bus::{EventBus, EventFilter, SubscriberId, Subscription};
pub use resolver::{
    CommandRunner, PlaceholderResolver, ResolveMode, ResolvedServerConfig, ShellCommandRunner,
    DEFAULT_COMMAND_TIMEOUT,
};
pub use state::{ConnectionState, HubState};
