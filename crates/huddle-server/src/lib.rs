pub mod client;
pub mod event_bridge;
pub mod groups;
pub mod handlers;
pub mod lifecycle;
pub mod rpc;
pub mod server;
pub mod wire;

pub use groups::{GroupRegistry, MatchOutcome, MAX_GROUP_MEMBERS};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use server::{start, ServerConfig, ServerHandle};
