//! Controller-relationship helpers over object metadata.
//!
//! When an object carries more than one owner reference flagged as
//! controller (which the API server normally rejects), the first one in the
//! order the object lists them wins.

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::GroupVersionKind;

use crate::crd::job::Job;

/// Prefix of the synthetic pod group created for otherwise ungrouped pods.
pub const POD_GROUP_NAME_PREFIX: &str = "podgroup-";

/// Read access to the identity and owners of an object.
pub trait Owned {
    fn identity(&self) -> Option<&str>;
    fn owner_references(&self) -> &[OwnerReference];
}

macro_rules! impl_owned {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Owned for $ty {
                fn identity(&self) -> Option<&str> {
                    self.metadata.uid.as_deref()
                }

                fn owner_references(&self) -> &[OwnerReference] {
                    self.metadata.owner_references.as_deref().unwrap_or(&[])
                }
            }
        )*
    };
}

impl_owned!(Pod, ConfigMap, Job);

/// First owner reference flagged as controller.
pub fn controller_of<T: Owned + ?Sized>(obj: &T) -> Option<&OwnerReference> {
    obj.owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Uid of the controlling owner, if any.
pub fn controller_uid<T: Owned + ?Sized>(obj: &T) -> Option<String> {
    controller_of(obj).map(|r| r.uid.clone())
}

pub fn is_controlled_by<T: Owned + ?Sized>(
    obj: &T,
    gvk: &GroupVersionKind,
) -> bool {
    controller_of(obj).is_some_and(|r| r.kind == gvk.kind)
}

/// Pod group name for an entity: the controller's uid when it has one,
/// otherwise its own uid.
pub fn pod_group_name<T: Owned + ?Sized>(obj: &T) -> String {
    let id = controller_of(obj)
        .map(|r| r.uid.as_str())
        .or_else(|| obj.identity())
        .unwrap_or_default();
    format!("{POD_GROUP_NAME_PREFIX}{id}")
}
