//! Runtime registry of kernel sets.
//!
//! Kernel sets register themselves under a name so callers can pick one at runtime without
//! naming the concrete type. Registration may happen from any crate.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::kernels::ConvKernels;

/// Factory that builds a fresh kernel set instance.
pub type KernelsConstructor = Box<dyn Fn() -> Arc<dyn ConvKernels> + Send + Sync>;

struct KernelRegistry {
    kernels: RwLock<HashMap<String, KernelsConstructor>>,
}

impl KernelRegistry {
    fn new() -> Self {
        Self {
            kernels: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: KernelsConstructor) {
        self.kernels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn ConvKernels>> {
        let registry = self.kernels.read().unwrap_or_else(PoisonError::into_inner);
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .kernels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn contains(&self, name: &str) -> bool {
        self.kernels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<KernelRegistry> = OnceLock::new();

fn global_registry() -> &'static KernelRegistry {
    GLOBAL_REGISTRY.get_or_init(KernelRegistry::new)
}

/// Registers a kernel set under `name`, replacing any previous registration.
///
/// The constructor runs on every [`create_kernels`] call.
///
/// # Example
/// ```ignore
/// conv_rs::registry::register_kernels("my-kernels", MyKernels::new);
/// ```
pub fn register_kernels<F, K>(name: &str, constructor: F)
where
    F: Fn() -> K + Send + Sync + 'static,
    K: ConvKernels + 'static,
{
    tracing::debug!(name, "registering convolution kernels");
    global_registry().register(
        name.to_string(),
        Box::new(move || Arc::new(constructor()) as Arc<dyn ConvKernels>),
    );
}

/// Builds the kernel set registered under `name`.
pub fn create_kernels(name: &str) -> Option<Arc<dyn ConvKernels>> {
    global_registry().create(name)
}

/// Names of every registered kernel set, sorted.
pub fn list_kernels() -> Vec<String> {
    global_registry().list()
}

pub fn has_kernels(name: &str) -> bool {
    global_registry().contains(name)
}
