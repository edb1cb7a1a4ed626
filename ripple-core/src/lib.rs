//! Ripple Core
//!
//! This crate provides the reactive runtime for the Ripple UI framework.
//! It implements:
//!
//! - Reactive primitives (refs, reactive wrappers, computed values, effects)
//! - Effect scopes for disposing groups of effects together
//! - A job scheduler that batches deferred updates into one flush
//!
//! Everything is single-threaded: reactive state lives in thread-locals and
//! values are shared with `Rc`.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `scheduler`: Job queue, flush loop, and `next_tick`
//! - `error`: Error type and the reporting channel
//! - `config`: Per-thread runtime configuration
//!
//! # Example
//!
//! ```rust
//! use ripple_core::object;
//! use ripple_core::reactive::{computed, effect, reactive, Ref};
//!
//! // Create some state
//! let count = Ref::new(1);
//! let user = reactive(object! { "name" => "ada" });
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = computed(move || c.get() * 2);
//!
//! // Create an effect
//! let (u, d) = (user.clone(), doubled.clone());
//! let _log = effect(move || {
//!     println!("{:?}: {}", u.get("name"), d.get());
//! });
//!
//! // Update the state; the effect runs again after each write
//! count.set(5);
//! user.set("name", "grace").unwrap();
//! ```

pub mod config;
pub mod error;
mod macros;
pub mod reactive;
pub mod scheduler;

pub use config::{configure, RuntimeConfig};
pub use error::{clear_error_handler, set_error_handler, ReactiveError, Result};
