// ============================================================================
// reactive-core - Core Module
// Fundamental types, traits, error taxonomy and the frame-stack context.
// ============================================================================

pub mod cancellation;
pub mod constants;
pub mod context;
pub mod error;
pub(crate) mod scope_tree;
pub mod types;

pub use cancellation::CancellationToken;
pub use constants::*;
pub use context::{current_frame_id, with_context, ReactiveContext};
pub use error::ReactiveError;
pub use types::{
    CellId, CellKind, Observable, SubscriptionSink, TypedObservable,
};
