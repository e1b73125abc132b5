// ============================================================================
// reactive-core - Primitives module
// Inner implementations for the public Cell/Scope/Effect/ReactiveObject
// types. The public surface itself lives in `lib.rs`.
// ============================================================================

pub(crate) mod derived;
pub(crate) mod effect;
pub(crate) mod reactive_object;
pub(crate) mod scope;
pub(crate) mod source;
pub(crate) mod subscription;
