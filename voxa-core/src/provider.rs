//! Hardware-provider selection for the model collaborators.
//!
//! A provider names the execution backend a model should run on. Detection
//! is deliberately conservative: CoreML on macOS, CUDA on Linux only when
//! NVIDIA hardware is actually visible (discrete cards and Jetson SoCs),
//! CPU everywhere else.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Execution backend identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Plain CPU inference; always available.
    #[default]
    Cpu,
    /// NVIDIA CUDA (Linux, discrete GPU or Jetson SoC).
    Cuda,
    /// Apple Neural Engine via CoreML (macOS).
    CoreMl,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }

    /// Pick the best provider for this machine.
    pub fn detect() -> Provider {
        #[cfg(target_os = "macos")]
        {
            info!("detected macOS, selecting coreml provider");
            return Provider::CoreMl;
        }

        #[cfg(target_os = "linux")]
        {
            if has_nvidia_accelerator() {
                info!("detected NVIDIA accelerator, selecting cuda provider");
                return Provider::Cuda;
            }
        }

        #[allow(unreachable_code)]
        {
            info!("selecting cpu provider");
            Provider::Cpu
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Provider::Cpu),
            "cuda" => Ok(Provider::Cuda),
            "coreml" => Ok(Provider::CoreMl),
            other => Err(format!(
                "unknown provider '{other}' (expected cpu, cuda or coreml)"
            )),
        }
    }
}

/// NVIDIA visibility check covering discrete GPUs and Jetson-family SoCs.
#[cfg(target_os = "linux")]
fn has_nvidia_accelerator() -> bool {
    use std::path::Path;

    const INDICATORS: &[&str] = &[
        // nvidia-smi installs (discrete GPUs)
        "/usr/bin/nvidia-smi",
        "/usr/local/bin/nvidia-smi",
        "/opt/nvidia/bin/nvidia-smi",
        // Device nodes
        "/dev/nvidia0",
        "/dev/nvidiactl",
        // Jetson SoC devices
        "/dev/nvhost-gpu",
        "/dev/nvhost-ctrl-gpu",
        "/dev/nvmap",
        // Jetson L4T release marker
        "/etc/nv_tegra_release",
    ];

    if INDICATORS.iter().any(|path| Path::new(path).exists()) {
        return true;
    }

    // Device-tree compatible string covers remaining Tegra boards.
    if let Ok(compatible) = std::fs::read("/proc/device-tree/compatible") {
        let compatible = String::from_utf8_lossy(&compatible);
        if compatible.contains("nvidia,tegra") || compatible.contains("nvidia,jetson") {
            return true;
        }
    }

    false
}

/// Global worker-thread default: a third of the online CPUs, at least one.
/// Leaves headroom so recognizer, synthesizer and the language model can
/// share a small machine without oversubscription.
pub fn default_worker_threads() -> usize {
    (num_cpus::get() / 3).max(1)
}

/// Resolve a configured thread count, where 0 requests auto-selection.
pub fn resolve_thread_count(requested: usize, fallback: usize) -> usize {
    if requested == 0 {
        fallback
    } else {
        requested
    }
}
