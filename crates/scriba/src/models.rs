//! Model catalog and the availability resolver.

use serde::{Deserialize, Serialize};

use crate::hardware::HardwareSnapshot;

/// Languages accepted as transcription hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "pt")]
    Portuguese,
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// ISO 639-1 code passed to the engines.
    pub fn code(self) -> &'static str {
        match self {
            Language::Portuguese => "pt",
            Language::English => "en",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Numeric precision a local engine runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compute {
    Float16,
    Int8,
}

/// The engine implementation behind a model identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineKind {
    /// CTranslate2-style local engine with an explicit compute type.
    FasterWhisper { compute: Compute },
    /// Transformers-pipeline-style local engine.
    HfPipeline,
    /// Hosted speech-to-text API; needs a configured credential.
    RemoteApi,
}

/// One catalog entry: everything the pool needs to bind a slot to an engine.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: &'static str,
    pub kind: EngineKind,
    /// Upstream model name handed to the engine loader.
    pub upstream: &'static str,
    pub requires_gpu: bool,
    /// Slot count for this model; `None` falls back to the configured default.
    pub workers: Option<usize>,
    pub description: &'static str,
}

/// The built-in set of transcription models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    specs: Vec<ModelSpec>,
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        Self {
            specs: vec![
                ModelSpec {
                    id: "distil_large_v3_ptbr",
                    kind: EngineKind::HfPipeline,
                    upstream: "freds0/distil-whisper-large-v3-ptbr",
                    requires_gpu: false,
                    workers: Some(1),
                    description: "Recommended for local testing. Great quality in PT-BR, \
                                  lightweight and fast on CPU.",
                },
                ModelSpec {
                    id: "faster_medium_fp16",
                    kind: EngineKind::FasterWhisper {
                        compute: Compute::Float16,
                    },
                    upstream: "medium",
                    requires_gpu: true,
                    workers: Some(1),
                    description: "Excellent balance between speed and quality on GPU.",
                },
                ModelSpec {
                    id: "faster_large_v3_fp16",
                    kind: EngineKind::FasterWhisper {
                        compute: Compute::Float16,
                    },
                    upstream: "large-v3",
                    requires_gpu: true,
                    workers: Some(1),
                    description: "Maximum quality and precision. Requires a powerful GPU \
                                  (VRAM > 8GB).",
                },
                ModelSpec {
                    id: "faster_large_v3_int8",
                    kind: EngineKind::FasterWhisper {
                        compute: Compute::Int8,
                    },
                    upstream: "large-v3",
                    requires_gpu: false,
                    workers: Some(1),
                    description: "Quality of large-v3 with lower memory usage. Ideal for \
                                  powerful CPUs or GPUs with limited VRAM.",
                },
                ModelSpec {
                    id: "cloud_speech_v2",
                    kind: EngineKind::RemoteApi,
                    upstream: "speech-v2",
                    requires_gpu: false,
                    workers: Some(2),
                    description: "Hosted speech-to-text API. Requires a cloud credential.",
                },
            ],
        }
    }

    /// Catalog with caller-supplied specs, mainly for tests.
    pub fn with_specs(specs: Vec<ModelSpec>) -> Self {
        Self { specs }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelSpec> {
        self.specs.iter().find(|s| s.id == model_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.specs.iter()
    }
}

/// Computes the currently usable subset of the catalog from a hardware
/// snapshot and the configured credential. Stateless so callers can re-run it
/// on every request and pick up credential or hardware changes immediately.
pub fn resolve_available<'a>(
    catalog: &'a ModelCatalog,
    hardware: HardwareSnapshot,
    cloud_api_key: Option<&str>,
) -> Vec<&'a ModelSpec> {
    catalog
        .iter()
        .filter(|spec| {
            if spec.requires_gpu && !hardware.has_gpu {
                return false;
            }
            match &spec.kind {
                EngineKind::FasterWhisper {
                    compute: Compute::Float16,
                } => hardware.supports_fp16,
                EngineKind::FasterWhisper { .. } | EngineKind::HfPipeline => true,
                EngineKind::RemoteApi => cloud_api_key.is_some(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(specs: &[&ModelSpec]) -> Vec<&'static str> {
        specs.iter().map(|s| s.id).collect()
    }

    #[test]
    fn cpu_only_excludes_gpu_and_fp16_models() {
        let catalog = ModelCatalog::builtin();
        let available = resolve_available(&catalog, HardwareSnapshot::default(), None);
        assert_eq!(
            ids(&available),
            vec!["distil_large_v3_ptbr", "faster_large_v3_int8"]
        );
    }

    #[test]
    fn gpu_with_fp16_enables_local_models() {
        let catalog = ModelCatalog::builtin();
        let hardware = HardwareSnapshot {
            has_gpu: true,
            supports_fp16: true,
        };
        let available = resolve_available(&catalog, hardware, None);
        assert_eq!(
            ids(&available),
            vec![
                "distil_large_v3_ptbr",
                "faster_medium_fp16",
                "faster_large_v3_fp16",
                "faster_large_v3_int8",
            ]
        );
    }

    #[test]
    fn gpu_without_fp16_keeps_int8_variant_only() {
        let catalog = ModelCatalog::builtin();
        let hardware = HardwareSnapshot {
            has_gpu: true,
            supports_fp16: false,
        };
        let available = resolve_available(&catalog, hardware, None);
        assert!(!ids(&available).contains(&"faster_medium_fp16"));
        assert!(ids(&available).contains(&"faster_large_v3_int8"));
    }

    #[test]
    fn credential_gates_remote_model() {
        let catalog = ModelCatalog::builtin();
        let without = resolve_available(&catalog, HardwareSnapshot::default(), None);
        assert!(!ids(&without).contains(&"cloud_speech_v2"));

        let with = resolve_available(&catalog, HardwareSnapshot::default(), Some("key"));
        assert!(ids(&with).contains(&"cloud_speech_v2"));
    }

    #[test]
    fn language_codes() {
        assert_eq!(Language::Portuguese.code(), "pt");
        assert_eq!(Language::English.to_string(), "en");
        let parsed: Language = serde_json::from_str("\"pt\"").unwrap();
        assert_eq!(parsed, Language::Portuguese);
    }
}
