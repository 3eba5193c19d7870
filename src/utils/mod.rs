pub mod config;
pub mod exporter;
pub mod perf;
pub mod profiler;
