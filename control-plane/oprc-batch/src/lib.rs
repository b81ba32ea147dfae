pub mod config;
pub mod configmap;
pub mod crd;
pub mod health;
pub mod kinds;
pub mod ownership;

pub use configmap::{
    ConfigMapStore, KubeConfigMapStore, MemoryConfigMapStore, ReconcileError,
    delete_config_map, ensure_config_map,
};
pub use health::{HealthServer, HealthServerError, ServerState};
pub use kinds::{ParentRef, command_kind, job_kind};
pub use ownership::{
    Owned, POD_GROUP_NAME_PREFIX, controller_of, controller_uid,
    is_controlled_by, pod_group_name,
};

use tracing_subscriber::{
    EnvFilter, filter::Directive, layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub fn init_tracing(default_env: &str) {
    let default_directive = default_env
        .parse::<Directive>()
        .or_else(|_| "info".parse::<Directive>());
    let mut filter = EnvFilter::builder()
        .with_env_var("RUST_LOG")
        .from_env_lossy();
    if let Ok(directive) = default_directive {
        filter = filter.add_directive(directive);
    }

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
