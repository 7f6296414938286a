use thiserror::Error;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers the failure modes that can occur while constructing IR, running the
/// autodiff checkpointing pipeline, or manipulating the structural type model. Each variant
/// provides specific context about the failure mode to enable appropriate error handling.
///
/// Internal-consistency violations (a value landing in both the store and recompute sets,
/// contradictory loop exit values, a missing predecessor for a loop condition block) are
/// *not* represented here — they signal a defect in an earlier compilation stage and are
/// raised as panics instead of recoverable errors.
///
/// # Error Categories
///
/// ## Graph Construction Errors
/// - [`Error::GraphError`] - Malformed block/instruction graph shapes
/// - [`Error::Empty`] - Empty input provided where content is required
///
/// ## Checkpointing Errors
/// - [`Error::UnboundedLoop`] - Storage sizing requested for a loop without a static bound
/// - [`Error::NotSupported`] - Construct outside the supported normalized CFG shapes
///
/// ## Type Model Errors
/// - [`Error::TypeError`] - General structural type model operation error
#[derive(Error, Debug)]
pub enum Error {
    /// The block or instruction graph is malformed.
    ///
    /// This error occurs when a function violates the structural expectations
    /// of the normalized CFG: a loop whose condition block lacks a conditional
    /// terminator, a branch argument list that does not match the target's
    /// parameter list, or a successor reference to a block outside the function.
    #[error("{0}")]
    GraphError(String),

    /// Empty input provided.
    ///
    /// Returned when an operation requires at least one element, such as
    /// building a function from an empty block list.
    #[error("Empty input provided")]
    Empty,

    /// Indexed storage was requested for a loop without a statically known bound.
    ///
    /// A value defined under a loop region can only be checkpointed into a
    /// fixed-size array when the loop carries a max-iterations annotation.
    /// Sizing storage for an unresolved region must fail loudly rather than
    /// guess a capacity.
    #[error("Cannot size checkpoint storage: loop at block {block} has no static iteration bound")]
    UnboundedLoop {
        /// Index of the loop header block whose bound is unresolved.
        block: usize,
    },

    /// The construct is not supported by the checkpointing pipeline.
    ///
    /// The pipeline operates on normalized control flow produced by earlier
    /// passes; shapes outside that normal form are rejected rather than
    /// handled on a best-effort basis.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// A structural type model operation failed.
    ///
    /// Covers substitution and canonicalization failures, such as a pack
    /// expansion applied with an out-of-range element index.
    #[error("{0}")]
    TypeError(String),
}
