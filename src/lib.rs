//! Multi-tenant sandbox lifecycle manager.
//!
//! `sandpool` hands out isolated tool-execution containers to many callers.
//! It keeps a warm pool of pre-created containers, binds containers to
//! `(session, user)` pairs, persists workspaces across container lifetimes,
//! and forwards tool calls to the server running inside each container.
//!
//! The manager runs either in-process ([`manager::LocalManager`]) or behind
//! an HTTP server ([`server`]) reached through
//! [`manager::RemoteManagerClient`]. [`Sandbox`] wraps either for callers
//! that only need one container.

pub mod backend;
pub mod client;
pub mod collections;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod registry;
pub mod sandbox;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{ManagerError, Result};
pub use manager::{build_manager, SandboxManagerApi};
pub use model::{ContainerModel, ContainerStatus};
pub use registry::{SandboxRegistry, SandboxType};
pub use sandbox::Sandbox;
