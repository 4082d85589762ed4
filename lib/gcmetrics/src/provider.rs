use crate::collector::CollectorDescriptor;
use crate::pool::MemoryPoolDescriptor;
use typed_builder::TypedBuilder;

/// Static view of the runtime's collectors and memory pools, queried once
/// per bind.
pub trait CollectorDescriptorProvider: Send + Sync {
    fn collectors(&self) -> Vec<CollectorDescriptor>;

    /// Memory pools in the runtime's enumeration order.
    fn memory_pools(&self) -> Vec<MemoryPoolDescriptor>;

    /// Explicit generational flag, when the runtime exposes one.
    fn is_generational_hint(&self) -> Option<bool> {
        None
    }
}

/// Provider over fixed lists, for embedders that enumerate the runtime
/// themselves (and for tests).
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct StaticDescriptorProvider {
    #[builder(default)]
    collectors: Vec<CollectorDescriptor>,
    #[builder(default)]
    memory_pools: Vec<MemoryPoolDescriptor>,
    #[builder(default, setter(strip_option))]
    generational_hint: Option<bool>,
}

impl CollectorDescriptorProvider for StaticDescriptorProvider {
    fn collectors(&self) -> Vec<CollectorDescriptor> {
        self.collectors.clone()
    }

    fn memory_pools(&self) -> Vec<MemoryPoolDescriptor> {
        self.memory_pools.clone()
    }

    fn is_generational_hint(&self) -> Option<bool> {
        self.generational_hint
    }
}
