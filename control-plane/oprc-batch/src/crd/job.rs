use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Batch job submitted to the workload manager. Only the fields the
/// helpers need are modeled; everything else is preserved by the API server.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "batch.volcano.sh",
    version = "v1alpha1",
    kind = "Job",
    plural = "jobs",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub scheduler_name: Option<String>,
    pub min_available: Option<i32>,
    pub queue: Option<String>,
}
