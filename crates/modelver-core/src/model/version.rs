//! The `ModelTemplateVersion` resource and its serving configuration.
//!
//! The serving blocks (`deploymentConfig`, `engineConfig`, `scalingConfig`)
//! are opaque to the versioning controller; they are typed here so that the
//! CLI and stored objects agree on shape and defaults.

use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::meta::ObjectMeta;

/// One immutable, numbered version of a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateVersion {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: ModelTemplateVersionSpec,
    /// Observed state maintained by the version assigner.
    #[serde(default)]
    pub status: ModelTemplateVersionStatus,
}

impl ModelTemplateVersion {
    /// Creates a version of `template_name` with default serving config.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        template_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ModelTemplateVersionSpec {
                template_name: template_name.into(),
                ..ModelTemplateVersionSpec::default()
            },
            status: ModelTemplateVersionStatus::default(),
        }
    }
}

/// Desired state of a template version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateVersionSpec {
    /// Name of the owning template, in the same namespace.
    pub template_name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Deployment settings.
    #[serde(default)]
    pub deployment_config: DeploymentConfig,
    /// Inference engine settings.
    #[serde(default)]
    pub engine_config: EngineConfig,
    /// Per-replica resources.
    #[serde(default)]
    pub scaling_config: ScalingConfig,
}

/// Observed state of a template version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateVersionStatus {
    /// Assigned version number; zero until assigned.
    #[serde(default)]
    pub version: u64,
    /// Status conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Deployment settings for a version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Replica autoscaling.
    #[serde(default)]
    pub auto_scaling_config: AutoScalingConfig,
    /// Concurrent queries allowed per replica.
    #[serde(default)]
    pub max_concurrent_queries: u32,
    /// Ray actor options.
    #[serde(default)]
    pub ray_actor_options: RayActorOptions,
}

/// Replica autoscaling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoScalingConfig {
    pub min_replicas: u32,
    pub initial_replicas: u32,
    pub max_replicas: u32,
    pub target_num_ongoing_requests_per_replica: f64,
    pub metrics_interval_s: f64,
    pub look_back_period_s: f64,
    pub smoothing_factor: f64,
    pub downscale_delay_s: f64,
    pub upscale_delay_s: f64,
}

impl Default for AutoScalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            initial_replicas: 1,
            max_replicas: 8,
            target_num_ongoing_requests_per_replica: 0.0,
            metrics_interval_s: 10.0,
            look_back_period_s: 30.0,
            smoothing_factor: 1.0,
            downscale_delay_s: 300.0,
            upscale_delay_s: 90.0,
        }
    }
}

/// Ray actor options. Resource requests are free-form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RayActorOptions {
    #[serde(default)]
    pub resources: serde_json::Map<String, serde_json::Value>,
}

/// Inference engine family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceEngineType {
    #[default]
    #[serde(rename = "VLLMEngine")]
    Vllm,
    #[serde(rename = "TRTLLMEngine")]
    TrtLlm,
    #[serde(rename = "EmbeddingEngine")]
    Embedding,
}

/// Inference engine settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hf_model_id: String,
    #[serde(default, rename = "type")]
    pub engine_type: InferenceEngineType,
    #[serde(default)]
    pub engine_kwargs: EngineKwargs,
    #[serde(default)]
    pub max_total_tokens: u32,
    #[serde(default)]
    pub generation: Generation,
}

/// Engine keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineKwargs {
    pub trust_remote_code: bool,
    pub max_num_batched_tokens: u32,
    pub max_num_seqs: u32,
    pub gpu_memory_utilization: f64,
}

impl Default for EngineKwargs {
    fn default() -> Self {
        Self {
            trust_remote_code: true,
            max_num_batched_tokens: 0,
            max_num_seqs: 0,
            gpu_memory_utilization: 0.0,
        }
    }
}

/// Text generation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    #[serde(default)]
    pub prompt_format: PromptFormat,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stopping_sequences: Vec<String>,
}

/// Chat prompt template pieces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptFormat {
    pub system: String,
    pub assistant: String,
    pub trailing_assistant: String,
    pub user: String,
    pub system_in_user: bool,
    pub default_system_message: String,
}

/// Replica placement strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementStrategy {
    #[default]
    StrictPack,
    Pack,
    StrictSpread,
    Spread,
}

/// Per-replica worker resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    #[serde(default)]
    pub num_workers: u32,
    #[serde(default)]
    pub num_gpus_per_worker: u32,
    #[serde(default)]
    pub num_cpus_per_worker: u32,
    #[serde(default)]
    pub placement_strategy: PlacementStrategy,
    #[serde(default)]
    pub resources_per_worker: serde_json::Map<String, serde_json::Value>,
}
