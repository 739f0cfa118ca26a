use {
    prometheus::Encoder,
    std::{collections::HashMap, sync::OnceLock},
};

/// Global metrics registry used by all components.
static REGISTRY: OnceLock<prometheus_metric_storage::StorageRegistry> = OnceLock::new();

/// Configure global metrics registry.
///
/// This function allows specifying a common prefix that will be added to all
/// metric names, as well as common labels. It has to be called before the
/// first call to [`get_storage_registry`], ideally at the very beginning of
/// `main`.
///
/// # Panics
///
/// Panics if it's called twice, after the registry was already initialized
/// or with an invalid configuration.
pub fn setup_registry(prefix: Option<String>, labels: Option<HashMap<String, String>>) {
    let registry = prometheus::Registry::new_custom(prefix, labels).unwrap();
    let storage_registry = prometheus_metric_storage::StorageRegistry::new(registry);
    REGISTRY.set(storage_registry).unwrap();
}

/// Get the global instance of the metrics registry.
pub fn get_registry() -> &'static prometheus::Registry {
    get_storage_registry().registry()
}

/// Get the global instance of the metric storage registry.
///
/// Falls back to a default registry if [`setup_registry`] was never called so
/// unit tests don't have to configure metrics before exercising instrumented
/// code.
pub fn get_storage_registry() -> &'static prometheus_metric_storage::StorageRegistry {
    REGISTRY.get_or_init(prometheus_metric_storage::StorageRegistry::default)
}

/// Renders all metrics of the registry in the prometheus text format.
pub fn encode(registry: &prometheus::Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
