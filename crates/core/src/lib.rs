//! Resilient experiment context management.
//!
//! Sits between a request-serving pipeline and an external experiment
//! assignment service:
//!
//! - [`ContextManager`] returns a ready session per user with bounded latency,
//!   reusing cached snapshots and degrading to a fallback session while the
//!   [`CircuitBreaker`] is open.
//! - [`extract_experiment_data`] turns a session into per-experiment records
//!   and registers exposure for experiments that cannot wait for a view.
//! - [`PublishQueue`] serializes outbound publishes, one in flight, FIFO.
//!
//! Collaborators are reached through the traits in [`client`].

pub mod breaker;
pub mod cache;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod factory;
pub mod fallback;
pub mod manager;
pub mod publish;
pub mod testing;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::{CachedSnapshot, SessionCache, cache_key};
pub use cleanup::CleanupScheduler;
pub use client::{AssignmentClient, KeyValueStore, Session, SessionHandle};
pub use config::{BreakerConfig, ClientConfig, ContextManagerConfig};
pub use edge_context_protocol as protocol;
pub use error::{Error, Result};
pub use extract::{extract_experiment_data, requires_immediate_tracking};
pub use factory::{CreateContextRequest, SessionFactory, derive_session_id};
pub use fallback::FallbackSession;
pub use manager::{ContextHandle, ContextManager, ContextSource};
pub use publish::{PublishQueue, PublishTicket};
