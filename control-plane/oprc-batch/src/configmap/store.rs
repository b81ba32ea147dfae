use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
    core::ErrorResponse,
};

/// Remote operations the reconciler needs on ConfigMaps. Errors are reported
/// in the API server's own shape so callers can inspect status codes.
#[async_trait]
pub trait ConfigMapStore: Send + Sync {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, kube::Error>;

    async fn create(
        &self,
        namespace: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error>;

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error>;

    async fn delete(&self, namespace: &str, name: &str)
    -> Result<(), kube::Error>;
}

/// [`ConfigMapStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeConfigMapStore {
    client: Client,
}

impl KubeConfigMapStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ConfigMapStore for KubeConfigMapStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, kube::Error> {
        self.api(namespace).get(name).await
    }

    async fn create(
        &self,
        namespace: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        self.api(namespace).create(&PostParams::default(), cm).await
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        self.api(namespace)
            .replace(name, &PostParams::default(), cm)
            .await
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// API error in the same shape the server returns.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}
