pub mod service_registry;

pub use service_registry::{
    HealthState, ServiceDescriptor, ServiceHealth, ServiceRegistry, ServiceSummary,
};
