//! The backend the demos run on, picked by cargo feature (`cuda`, `wgpu`,
//! `ndarray` by default), and the logging that goes with it.

use burn::prelude::*;
use cfg_if::cfg_if;
use tracing_subscriber::EnvFilter;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        pub type DemoBackend = burn::backend::cuda::Cuda;
        const BACKEND: &str = "cuda";
    } else if #[cfg(feature = "wgpu")] {
        pub type DemoBackend = burn::backend::wgpu::Wgpu;
        const BACKEND: &str = "wgpu";
    } else {
        pub type DemoBackend = burn::backend::ndarray::NdArray;
        const BACKEND: &str = "ndarray";
    }
}

/// Installs the `tracing` subscriber (`RUST_LOG`, `info` when unset) and
/// returns the device decoders are built on.
pub fn init_demo() -> Device<DemoBackend> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let device = Device::<DemoBackend>::default();
    tracing::info!(backend = BACKEND, device = ?device, "demo backend ready");
    device
}
