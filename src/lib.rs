//! # Query Coordinator
//!
//! Mediates between one live query and the listeners interested in its
//! results.
//!
//! ## Core Concepts
//!
//! - **Engine**: the component that fetches, caches and re-executes the
//!   query ([`QueryEngine`])
//! - **Result cell**: the last delivered [`QueryResult`]; duplicate results
//!   are dropped and settled data is never blanked out by a data-less result
//! - **Promise**: settles with the next meaningful result; for `@defer` /
//!   `@stream` queries it settles on the first chunk
//! - **Listeners**: callbacks invoked once per delivered result
//!
//! ## Example
//!
//! ```ignore
//! use query_coordinator::{CoordinatorConfig, QueryCoordinator};
//! use std::sync::Arc;
//!
//! let coordinator = QueryCoordinator::new(engine, CoordinatorConfig::default())?;
//!
//! let unlisten = coordinator.listen(Arc::new(|result| {
//!     println!("status: {:?}", result.network_status);
//! }));
//!
//! let first = coordinator.promise().wait()?;
//! // or, from async code: coordinator.promise().await?
//!
//! unlisten.unlisten();
//! coordinator.dispose();
//! ```

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod promise;
pub mod registry;
pub mod state;
pub mod stream;
pub mod types;

// Re-exports
pub use coordinator::{CoordinatorConfig, DisposeHook, QueryCoordinator, ResultChannel, Unlisten};
pub use engine::{has_incremental_directive, QueryEngine};
pub use error::{CoordinatorError, Result};
pub use promise::{first_of, Promise, Resolver};
pub use registry::{Listener, ListenerRegistry, ListenerToken};
pub use state::{masks_stale_data, normalize, ResultCell};
pub use stream::{DeliveryStream, Multicast, Observer, Subscription};
pub use types::*;
