// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # glaze
//!
//! Middle-end of the Glaze shading-language compiler: the structural type
//! model with substitution/canonicalization, and the reverse-mode automatic
//! differentiation checkpointing transform that decides which forward
//! ("primal") intermediate values are stored versus recomputed when the
//! reverse ("differential") derivative function is generated.
//!
//! ## Features
//!
//! - **Checkpointing policy** - Per-value store/recompute/invert decisions
//!   with transitive propagation through operands, variables and phi chains
//! - **Loop analysis** - Induction recognition and closed-form loop-exit
//!   values over a memoized implication prover
//! - **CFG legalization** - Recompute-block construction, loop-indexed
//!   storage synthesis and dominance-safe use rewriting
//! - **Structural types** - Hash-consed type terms with pack expansion,
//!   existential specialization and memoized canonicalization
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use glaze::prelude::*;
//!
//! // `func` comes out of the autodiff transcriber with primal and
//! // differential regions already marked.
//! let hoisted = apply_checkpoint_policy(&mut func)?;
//! println!(
//!     "stored {} values, recomputing {}",
//!     hoisted.store_set.len(),
//!     hoisted.recompute_set.len()
//! );
//! # Ok::<(), glaze::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `glaze` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`ir`] - The instruction/block substrate the transforms operate on
//! - [`types`] - The structural type model
//! - [`autodiff`] - The checkpointing pipeline
//! - [`Error`] and [`Result`] - Error handling
//!
//! ### The checkpointing pipeline
//!
//! [`autodiff::apply_checkpoint_policy`] is the library entry point: it is
//! invoked per function on the in-memory representation, mutates the
//! function in place and returns the bookkeeping later lowering stages
//! consume. [`autodiff::process_module`] fans independent functions out
//! across a thread pool.
//!
//! The pass assumes its input is well formed (it runs after semantic
//! checking and differentiability analysis); internal-consistency
//! violations are treated as compiler defects and abort via assertion
//! rather than surfacing as recoverable errors.

pub mod autodiff;
pub mod ir;
pub mod prelude;
pub mod types;
pub mod utils;

mod error;

pub use error::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
