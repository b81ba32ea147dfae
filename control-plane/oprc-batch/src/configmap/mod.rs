//! Create-or-update and delete of a ConfigMap owned by a batch job.

mod memory;
mod store;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use tracing::{debug, error, instrument};

use crate::kinds::ParentRef;

pub use memory::{MemoryConfigMapStore, StoreOp};
pub use store::{
    ConfigMapStore, KubeConfigMapStore, api_error, is_conflict, is_not_found,
};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    /// Error reported by the store, passed through untouched.
    #[error(transparent)]
    Store(#[from] kube::Error),
}

impl ReconcileError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ReconcileError::Store(e) => is_not_found(e),
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Store(e) => is_conflict(e),
        }
    }

    pub fn into_inner(self) -> kube::Error {
        match self {
            ReconcileError::Store(e) => e,
        }
    }
}

/// Make the ConfigMap `name` in the parent's namespace hold exactly `data`.
///
/// A missing ConfigMap is created with a controller owner reference to
/// `parent`. An existing one has its data overwritten; its metadata,
/// including owner references, is left as found. Write conflicts are
/// returned to the caller without retrying.
#[instrument(level = "debug", skip(store, data), fields(parent = %parent))]
pub async fn ensure_config_map<S>(
    store: &S,
    parent: &ParentRef,
    name: &str,
    data: BTreeMap<String, String>,
) -> Result<(), ReconcileError>
where
    S: ConfigMapStore + ?Sized,
{
    let ns = parent.namespace.as_str();
    let mut existing = match store.get(ns, name).await {
        Ok(cm) => cm,
        Err(e) if is_not_found(&e) => {
            let cm = build_config_map(parent, name, data);
            if let Err(e) = store.create(ns, &cm).await {
                debug!(error = %e, "Failed to create ConfigMap for Job <{parent}>");
                return Err(e.into());
            }
            debug!(configmap = name, "created ConfigMap");
            return Ok(());
        }
        Err(e) => {
            debug!(error = %e, "Failed to get ConfigMap for Job <{parent}>");
            return Err(e.into());
        }
    };

    existing.data = Some(data);
    if let Err(e) = store.replace(ns, name, &existing).await {
        debug!(error = %e, "Failed to update ConfigMap for Job <{parent}>");
        return Err(e.into());
    }
    debug!(configmap = name, "updated ConfigMap");
    Ok(())
}

/// Remove the ConfigMap `name` from the parent's namespace. Absence, either
/// up front or by the time the delete lands, counts as success.
#[instrument(level = "debug", skip(store), fields(parent = %parent))]
pub async fn delete_config_map<S>(
    store: &S,
    parent: &ParentRef,
    name: &str,
) -> Result<(), ReconcileError>
where
    S: ConfigMapStore + ?Sized,
{
    let ns = parent.namespace.as_str();
    match store.get(ns, name).await {
        Ok(_) => {}
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => {
            debug!(error = %e, "Failed to get ConfigMap for Job <{parent}>");
            return Err(e.into());
        }
    }

    match store.delete(ns, name).await {
        Ok(()) => {
            debug!(configmap = name, "deleted ConfigMap");
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => {
            error!(error = %e, "Failed to delete ConfigMap of Job {parent}");
            Err(e.into())
        }
    }
}

fn build_config_map(
    parent: &ParentRef,
    name: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(parent.namespace.clone()),
            name: Some(name.to_string()),
            owner_references: Some(vec![parent.controller_owner_ref()]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}
