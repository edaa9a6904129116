//! # Parley Testing
//!
//! Test doubles shared by the Parley crates:
//!
//! - **MockLauncher**: a worker launcher that counts launches and can be slow or fail
//! - **SwitchablePresence**: presence whose answers are set by the test
//! - **RecordingState**: an FSM state that records what it receives and follows a script
//! - **fixtures**: message builders for the common protocol shapes
//!
//! ## Usage
//!
//! ```rust
//! use parley_identity::{CacheKey, Identity, IdentityCache, StartupCoordinator};
//! use parley_testing::{MockLauncher, SwitchablePresence};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let cache = Arc::new(IdentityCache::default());
//! let key = CacheKey::new("telegram", "42");
//! cache.insert(key.clone(), Identity::new("u-7"));
//!
//! let launcher = Arc::new(MockLauncher::new());
//! let coordinator = StartupCoordinator::new(cache);
//! coordinator
//!     .ensure_started(&key, &SwitchablePresence::new(), async {}, Arc::clone(&launcher))
//!     .await
//!     .unwrap();
//! assert_eq!(launcher.call_count(), 1);
//! # });
//! ```

pub mod fixtures;
pub mod mock_launcher;
pub mod mock_presence;
pub mod recording_state;

pub use mock_launcher::MockLauncher;
pub use mock_presence::SwitchablePresence;
pub use recording_state::RecordingState;
