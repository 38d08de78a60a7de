//! Hardware capability probing.
//!
//! The model availability resolver only ever consumes the snapshot; nothing
//! else in the crate looks at hardware.

use std::env;

use serde::Serialize;

/// Point-in-time capability snapshot consumed by the resolver.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSnapshot {
    /// A CUDA-capable accelerator is present.
    pub has_gpu: bool,
    /// The accelerator supports float16 compute.
    pub supports_fp16: bool,
}

/// Source of hardware snapshots. Re-probed on every resolver call so that a
/// hardware change takes effect without a restart.
pub trait HardwareProbe: Send + Sync {
    fn snapshot(&self) -> HardwareSnapshot;
}

/// Probe driven by environment switches, mirroring deployments that pin the
/// device instead of autodetecting it. `SCRIBA_FORCE_GPU=1` advertises a GPU;
/// `SCRIBA_GPU_FP16=0` masks fp16 support on it.
#[derive(Debug, Default)]
pub struct EnvProbe;

impl HardwareProbe for EnvProbe {
    fn snapshot(&self) -> HardwareSnapshot {
        let has_gpu = env::var("SCRIBA_FORCE_GPU").map(|v| v == "1").unwrap_or(false);
        let supports_fp16 = has_gpu
            && env::var("SCRIBA_GPU_FP16")
                .map(|v| v != "0")
                .unwrap_or(true);
        HardwareSnapshot {
            has_gpu,
            supports_fp16,
        }
    }
}

/// Fixed snapshot, for tests and embedders that probe elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub HardwareSnapshot);

impl HardwareProbe for StaticProbe {
    fn snapshot(&self) -> HardwareSnapshot {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_probe_defaults_to_cpu_only() {
        env::remove_var("SCRIBA_FORCE_GPU");
        env::remove_var("SCRIBA_GPU_FP16");
        let snapshot = EnvProbe.snapshot();
        assert!(!snapshot.has_gpu);
        assert!(!snapshot.supports_fp16);
    }

    #[test]
    #[serial]
    fn forced_gpu_implies_fp16_unless_masked() {
        env::set_var("SCRIBA_FORCE_GPU", "1");
        env::remove_var("SCRIBA_GPU_FP16");
        assert!(EnvProbe.snapshot().supports_fp16);

        env::set_var("SCRIBA_GPU_FP16", "0");
        let snapshot = EnvProbe.snapshot();
        assert!(snapshot.has_gpu);
        assert!(!snapshot.supports_fp16);

        env::remove_var("SCRIBA_FORCE_GPU");
        env::remove_var("SCRIBA_GPU_FP16");
    }
}
