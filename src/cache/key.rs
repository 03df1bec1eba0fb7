//! Queue keys: `namespace/name`, or bare `name` for cluster-scoped objects

use crate::error::{Error, Result};
use crate::resource::ManagedResource;

/// Build the key for an object identity.
pub fn meta_namespace_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Key for a resource. Fails when the object carries no name.
pub fn key_for<R: ManagedResource>(obj: &R) -> Result<String> {
    match obj.name() {
        Some(name) if !name.is_empty() => Ok(meta_namespace_key(obj.namespace(), name)),
        _ => Err(Error::InvalidKey(format!(
            "object in namespace {:?} has no name",
            obj.namespace()
        ))),
    }
}

/// Split a key back into namespace and name.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = key.split('/');
    let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => (None, name),
        (Some(ns), Some(name), None) => ((!ns.is_empty()).then_some(ns), name),
        _ => return Err(Error::InvalidKey(format!("unexpected key format: {:?}", key))),
    };
    if name.is_empty() {
        return Err(Error::InvalidKey(format!("key has an empty name: {:?}", key)));
    }
    Ok((namespace, name))
}
