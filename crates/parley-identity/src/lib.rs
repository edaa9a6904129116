//! # Parley Identity
//!
//! Maps platform users to internal identities and starts their worker agents
//! exactly once, however many messages from the same user arrive at the same
//! time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use parley_identity::{CacheKey, Identity, IdentityCache, StartupCoordinator, WorkerLauncher};
//! use parley_mesh::InMemoryMesh;
//! use std::sync::Arc;
//!
//! async fn example(launcher: Arc<dyn WorkerLauncher>, mesh: InMemoryMesh) {
//!     let cache = Arc::new(IdentityCache::default());
//!     let key = CacheKey::new("telegram", "42");
//!     cache.insert(key.clone(), Identity::new("u-7"));
//!
//!     let coordinator = StartupCoordinator::new(cache);
//!     let outcome = coordinator
//!         .ensure_started(&key, &mesh, async { /* show a typing indicator */ }, launcher)
//!         .await;
//!     println!("{outcome:?}");
//! }
//! ```

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod key;

pub use cache::{IdentityCache, IdentityCacheConfig};
pub use coordinator::{StartOutcome, StartupCoordinator, WorkerLauncher};
pub use error::{IdentityError, IdentityResult, LaunchError};
pub use key::{CacheKey, Identity};
