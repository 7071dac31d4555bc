use std::process::Command;
use std::sync::OnceLock;

use prodshot_contracts::events::{map_object, Diagnostics};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Cpu,
}

impl DeviceKind {
    pub fn id(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Cpu => "cpu",
        }
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, DeviceKind::Cuda)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub name: Option<String>,
    pub memory_total_mib: Option<u64>,
}

impl DeviceInfo {
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            name: None,
            memory_total_mib: None,
        }
    }

    pub fn accelerated(info: AcceleratorInfo) -> Self {
        Self {
            kind: DeviceKind::Cuda,
            name: Some(info.name),
            memory_total_mib: info.memory_total_mib,
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind.id()
    }

    pub fn is_accelerated(&self) -> bool {
        self.kind.is_accelerated()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorInfo {
    pub name: String,
    pub memory_total_mib: Option<u64>,
}

pub trait DeviceProbe: Send + Sync {
    /// `None` means no usable accelerator; that is not an error.
    fn probe(&self) -> Option<AcceleratorInfo>;
}

/// Asks `nvidia-smi` for the first GPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct NvidiaSmiProbe;

impl DeviceProbe for NvidiaSmiProbe {
    fn probe(&self) -> Option<AcceleratorInfo> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuOnlyProbe;

impl DeviceProbe for CpuOnlyProbe {
    fn probe(&self) -> Option<AcceleratorInfo> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
}

/// Probes at most once; every later call returns the cached device.
pub struct DeviceSelector {
    probe: Box<dyn DeviceProbe>,
    selected: OnceLock<DeviceInfo>,
}

impl DeviceSelector {
    pub fn new(probe: impl DeviceProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
            selected: OnceLock::new(),
        }
    }

    pub fn for_preference(preference: DevicePreference) -> Self {
        match preference {
            DevicePreference::Auto => Self::new(NvidiaSmiProbe),
            DevicePreference::Cpu => Self::new(CpuOnlyProbe),
        }
    }

    pub fn select(&self, diagnostics: &Diagnostics) -> DeviceInfo {
        self.selected
            .get_or_init(|| {
                let device = match self.probe.probe() {
                    Some(info) => DeviceInfo::accelerated(info),
                    None => DeviceInfo::cpu(),
                };
                diagnostics.info(
                    "device_selected",
                    map_object(json!({
                        "device": device.id(),
                        "name": device.name,
                        "memory_total_mib": device.memory_total_mib,
                    })),
                );
                if !device.is_accelerated() {
                    diagnostics.warn(
                        "device_fallback",
                        map_object(json!({
                            "message": "no accelerator available, running on CPU (slower)",
                        })),
                    );
                }
                device
            })
            .clone()
    }
}

fn parse_nvidia_smi(stdout: &str) -> Option<AcceleratorInfo> {
    let line = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let mut fields = line.split(',').map(str::trim);
    let name = fields.next().filter(|value| !value.is_empty())?.to_string();
    let memory_total_mib = fields.next().and_then(|value| value.parse::<u64>().ok());
    Some(AcceleratorInfo {
        name,
        memory_total_mib,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use prodshot_contracts::events::Diagnostics;

    use super::{
        parse_nvidia_smi, AcceleratorInfo, DeviceKind, DeviceProbe, DeviceSelector,
        DevicePreference,
    };

    struct CountingProbe {
        calls: Arc<AtomicUsize>,
        result: Option<AcceleratorInfo>,
    }

    impl DeviceProbe for CountingProbe {
        fn probe(&self) -> Option<AcceleratorInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[test]
    fn selection_is_probed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = DeviceSelector::new(CountingProbe {
            calls: calls.clone(),
            result: Some(AcceleratorInfo {
                name: "NVIDIA GeForce RTX 4090".to_string(),
                memory_total_mib: Some(24564),
            }),
        });
        let diagnostics = Diagnostics::new();

        let first = selector.select(&diagnostics);
        let second = selector.select(&diagnostics);
        assert_eq!(first, second);
        assert_eq!(first.kind, DeviceKind::Cuda);
        assert_eq!(first.id(), "cuda");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_accelerator_falls_back_to_cpu() {
        let selector = DeviceSelector::for_preference(DevicePreference::Cpu);
        let device = selector.select(&Diagnostics::new());
        assert_eq!(device.id(), "cpu");
        assert!(!device.is_accelerated());
        assert!(device.name.is_none());
    }

    #[test]
    fn nvidia_smi_output_parses_first_gpu() {
        let parsed = parse_nvidia_smi("\nNVIDIA A100-SXM4-40GB, 40960\nTesla T4, 15360\n");
        assert_eq!(
            parsed,
            Some(AcceleratorInfo {
                name: "NVIDIA A100-SXM4-40GB".to_string(),
                memory_total_mib: Some(40960),
            })
        );
        assert_eq!(parse_nvidia_smi(""), None);
        assert_eq!(
            parse_nvidia_smi("Tesla T4, [N/A]").and_then(|info| info.memory_total_mib),
            None
        );
    }
}
