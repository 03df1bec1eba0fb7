//! The view of a resource the reconciliation engine needs
//!
//! The engine never interprets a resource's spec or status. It only needs
//! identity (namespace and name), structural equality of the desired state,
//! and a way to set the observed state on a private copy.

/// A declarative object with a desired state (`Spec`) and an observed state
/// (`Status`) that only this controller writes.
pub trait ManagedResource: Clone + Send + Sync + 'static {
    /// Desired state, compared by deep structural equality
    type Spec: PartialEq + Send + Sync;

    /// Observed state
    type Status: Clone + Send + Sync;

    /// Namespace, or `None` for cluster-scoped resources
    fn namespace(&self) -> Option<&str>;

    /// Object name, `None` when the metadata carries no name
    fn name(&self) -> Option<&str>;

    fn spec(&self) -> &Self::Spec;

    fn status(&self) -> Option<&Self::Status>;

    /// Replace the status. Only ever called on a private copy.
    fn set_status(&mut self, status: Self::Status);
}
