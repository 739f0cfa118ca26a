//! Observability setup shared by the library and the binaries: tracing
//! subscriber initialization and the global metrics registry.
pub mod metrics;
pub mod tracing;
