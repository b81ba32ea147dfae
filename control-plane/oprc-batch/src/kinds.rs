use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt, core::GroupVersionKind};

pub const BATCH_GROUP: &str = "batch.volcano.sh";
pub const BUS_GROUP: &str = "bus.volcano.sh";
pub const API_VERSION_V1ALPHA1: &str = "v1alpha1";

/// Kind descriptor of a batch `Job`.
pub fn job_kind() -> GroupVersionKind {
    GroupVersionKind::gvk(BATCH_GROUP, API_VERSION_V1ALPHA1, "Job")
}

/// Kind descriptor of a bus `Command`.
pub fn command_kind() -> GroupVersionKind {
    GroupVersionKind::gvk(BUS_GROUP, API_VERSION_V1ALPHA1, "Command")
}

/// Identity of the object that owns a managed resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl ParentRef {
    pub fn new(
        gvk: &GroupVersionKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// Build from a typed object. Returns `None` when the object has not been
    /// persisted yet (no name or uid), since an owner reference needs both.
    pub fn from_resource<K: Resource>(
        obj: &K,
        gvk: &GroupVersionKind,
    ) -> Option<Self> {
        let name = obj.meta().name.clone()?;
        let uid = obj.uid()?;
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        Some(Self::new(gvk, namespace, name, uid))
    }

    /// Owner reference marking the parent as the managing controller.
    pub fn controller_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::job::{Job, JobSpec};

    #[test]
    fn kind_descriptors() {
        let job = job_kind();
        assert_eq!(job.api_version(), "batch.volcano.sh/v1alpha1");
        assert_eq!(job.kind, "Job");
        let cmd = command_kind();
        assert_eq!(cmd.api_version(), "bus.volcano.sh/v1alpha1");
        assert_eq!(cmd.kind, "Command");
    }

    #[test]
    fn job_kind_matches_crd() {
        assert_eq!(Job::api_version(&()), job_kind().api_version());
        assert_eq!(Job::kind(&()), job_kind().kind);
    }

    #[test]
    fn from_resource_requires_uid() {
        let mut job = Job::new("job1", JobSpec::default());
        job.metadata.namespace = Some("ns1".into());
        assert!(ParentRef::from_resource(&job, &job_kind()).is_none());

        job.metadata.uid = Some("u1".into());
        let parent = ParentRef::from_resource(&job, &job_kind())
            .expect("parent with uid");
        assert_eq!(parent.namespace, "ns1");
        assert_eq!(parent.name, "job1");
        assert_eq!(parent.uid, "u1");
        assert_eq!(parent.to_string(), "ns1/job1");
    }

    #[test]
    fn controller_owner_ref_is_flagged() {
        let parent = ParentRef::new(&job_kind(), "ns1", "job1", "u1");
        let owner = parent.controller_owner_ref();
        assert_eq!(owner.uid, "u1");
        assert_eq!(owner.kind, "Job");
        assert_eq!(owner.api_version, "batch.volcano.sh/v1alpha1");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }
}
