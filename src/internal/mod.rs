//! Internal implementation details.

pub(crate) mod suggest;
