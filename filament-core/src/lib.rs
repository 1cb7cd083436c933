//! Filament Core
//!
//! This crate provides the core runtime for the Filament fine-grained
//! reactivity framework. It implements:
//!
//! - Reactive value cells with equality-gated invalidation
//! - Automatic dependency tracking via a thread-local computation stack
//! - Auto-rerunning computations with parent/child teardown
//! - A cooperative flush scheduler that coalesces re-runs
//!
//! # Architecture
//!
//! Everything lives in the [`reactive`] module:
//!
//! - [`reactive::ReactiveCell`]: the value container
//! - [`reactive::Dependency`]: per-cell registry of dependent computations
//! - [`reactive::Computation`]: a re-runnable unit of reactive work
//! - [`reactive::Runtime`]: the engine surface (autorun, flush, ambient
//!   context)
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::reactive::{ReactiveCell, Runtime};
//!
//! let a = ReactiveCell::new(1);
//! let b = ReactiveCell::new(1);
//!
//! let observer = {
//!     let (a, b) = (a.clone(), b.clone());
//!     Runtime::autorun(move |_| println!("sum: {}", a.get() + b.get()))
//! };
//! // prints: "sum: 2"
//!
//! a.set(10);
//! b.set(10);
//! Runtime::flush();
//! // prints "sum: 20" once: the two writes coalesce into one re-run
//! ```

pub mod reactive;
