//! Status subresource writes through the Kubernetes API
//!
//! `replace_status` sends the full object including its `resourceVersion`,
//! so the API server rejects the write with 409 when the object changed
//! since it was read.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::PostParams;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::controllers::status::StatusWriter;
use crate::error::{Error, Result};
use crate::resource::ManagedResource;

pub struct KubeStatusWriter<K> {
    client: Client,
    _resource: PhantomData<fn() -> K>,
}

impl<K> KubeStatusWriter<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<K> StatusWriter<K> for KubeStatusWriter<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ManagedResource
        + Serialize
        + DeserializeOwned
        + Debug,
{
    async fn write_status(&self, obj: &K) -> Result<K> {
        let name = ManagedResource::name(obj)
            .ok_or_else(|| Error::validation("cannot write status of an object without a name"))?;
        let namespace = ManagedResource::namespace(obj).unwrap_or("default");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);

        trace!(namespace = %namespace, name = %name, "Replacing status");
        let data = serde_json::to_vec(obj)?;
        Ok(api.replace_status(name, &PostParams::default(), data).await?)
    }
}
