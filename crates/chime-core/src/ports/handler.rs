//! Handler port: what actually runs when a claimed item comes due.

use async_trait::async_trait;

use crate::domain::WorkItem;

/// Executes one work item. Implementations resolve the item's function and
/// payload however they like; the runner only cares whether it worked.
///
/// The error is a plain message because it lands in the item's `last_error`
/// field as-is.
#[async_trait]
pub trait WorkHandler<T: WorkItem>: Send + Sync {
    async fn run(&self, item: &T) -> Result<(), String>;
}
