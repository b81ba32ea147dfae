use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;

use super::store::{ConfigMapStore, api_error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Replace,
    Delete,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), ConfigMap>,
    revision: u64,
    calls: HashMap<StoreOp, usize>,
    failures: HashMap<StoreOp, (u16, String)>,
}

/// In-process [`ConfigMapStore`] with the API server's optimistic
/// concurrency rules: a replace carrying a stale `resourceVersion` is
/// rejected with `409 Conflict`, creating an existing name is rejected with
/// `409 AlreadyExists`, and missing objects yield `404 NotFound`.
#[derive(Default)]
pub struct MemoryConfigMapStore {
    state: Mutex<State>,
}

impl MemoryConfigMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail with the given API status.
    pub fn fail_next(&self, op: StoreOp, code: u16, reason: &str) {
        self.lock().failures.insert(op, (code, reason.to_string()));
    }

    /// Number of times `op` has been invoked.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a stored object, bypassing call accounting.
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock()
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn begin(&self, op: StoreOp) -> Result<MutexGuard<'_, State>, kube::Error> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some((code, reason)) = state.failures.remove(&op) {
            return Err(api_error(code, &reason, format!("injected {op:?} failure")));
        }
        Ok(state)
    }
}

fn not_found(namespace: &str, name: &str) -> kube::Error {
    api_error(
        404,
        "NotFound",
        format!("configmaps \"{name}\" not found in namespace \"{namespace}\""),
    )
}

#[async_trait]
impl ConfigMapStore for MemoryConfigMapStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, kube::Error> {
        let state = self.begin(StoreOp::Get)?;
        state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn create(
        &self,
        namespace: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        let mut state = self.begin(StoreOp::Create)?;
        let name = cm.metadata.name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(api_error(422, "Invalid", "metadata.name: Required value"));
        }
        let key = (namespace.to_string(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("configmaps \"{name}\" already exists"),
            ));
        }
        state.revision += 1;
        let mut stored = cm.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = Some(format!("cm-uid-{}", state.revision));
        stored.metadata.resource_version = Some(state.revision.to_string());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        let mut state = self.begin(StoreOp::Replace)?;
        let key = (namespace.to_string(), name.to_string());
        let current_rv = match state.objects.get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(not_found(namespace, name)),
        };
        if let Some(rv) = &cm.metadata.resource_version {
            if Some(rv) != current_rv.as_ref() {
                return Err(api_error(
                    409,
                    "Conflict",
                    format!(
                        "Operation cannot be fulfilled on configmaps \"{name}\": the object has been modified"
                    ),
                ));
            }
        }
        state.revision += 1;
        let mut stored = cm.clone();
        stored.metadata.resource_version = Some(state.revision.to_string());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        let mut state = self.begin(StoreOp::Delete)?;
        state
            .objects
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(namespace, name))
    }
}
