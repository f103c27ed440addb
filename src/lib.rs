pub mod config;
pub mod connection;
pub mod dispatch;
pub mod events;
pub mod invalidation;
pub mod logging;
pub mod notify;
pub mod projection;
pub mod reconnect;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod watcher;

pub use config::WatchConfig;
pub use connection::{ConnectionState, CredentialSource, StaticToken};
pub use events::{InboundMessage, JobId, JobStatus};
pub use invalidation::{InvalidationSink, ResourceKey};
pub use notify::Notifier;
pub use projection::{JobPatch, JobRecord, StatusProjection};
pub use session::{Collaborators, Subscription};
pub use watcher::JobWatcher;
