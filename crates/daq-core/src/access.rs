//! Engine-facing access to quantities by fully qualified id.
//!
//! The execution engine and plan validation never see sessions directly; they go
//! through these two traits, implemented by the instrument registry (and by test
//! doubles).

use crate::error::DaqResult;
use crate::value::{DataType, QuantityId, Value};
use async_trait::async_trait;

/// Read-only lookup used while validating a plan.
pub trait QuantityLookup {
    /// Data type of `id`, or `None` when no open session exposes it.
    fn data_type(&self, id: &QuantityId) -> Option<DataType>;

    fn contains(&self, id: &QuantityId) -> bool {
        self.data_type(id).is_some()
    }
}

/// Set and get quantities during a run.
#[async_trait]
pub trait QuantityIo: QuantityLookup + Send {
    /// Set `id` and return the stored user-form value.
    async fn set(&mut self, id: &QuantityId, value: Value) -> DaqResult<Value>;

    /// Read `id` from the instrument.
    async fn get(&mut self, id: &QuantityId) -> DaqResult<Value>;

    /// Cached user-form value without I/O; `None` when unknown.
    fn get_latest(&self, id: &QuantityId) -> Option<Value>;
}
