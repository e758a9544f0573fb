//! Node-type registry for pipeline graphs.
//!
//! The set of sampler, loader and encoder type names grows with every new
//! node pack, so the registry is plain data: it ships with a built-in table,
//! can be extended from configuration, and is passed explicitly to the graph
//! parser and the extractor.
//!
//! # Roles
//!
//! - **Sinks**: sampler-like nodes; one parameter record per sink
//! - **Model loaders**, **text encoders**, **latent sources**: terminal producers
//! - **Sampler selectors**, **schedulers**, **guiders**: split-out sampler inputs
//! - **Primitives**: nodes that only hold a value for another node's input
//! - **Pass-through**: nodes traced through (LoRA, model patches, conditioning math)

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version of the built-in registry tables.
pub const REGISTRY_VERSION: u32 = 2;

/// Maximum number of hops a backward trace may take.
pub const DEFAULT_MAX_TRACE_DEPTH: usize = 20;

const SINKS: &[&str] = &[
    "KSampler",
    "KSamplerAdvanced",
    "SamplerCustom",
    "SamplerCustomAdvanced",
    "KSamplerEfficient",
    "KSampler (Efficient)",
    "DetailerForEach",
    "FaceDetailer",
    "SamplerDPMPP_2M_SDE",
    "WanVideoSampler",
    "UltimateSDUpscale",
];

const MODEL_LOADERS: &[&str] = &[
    "CheckpointLoaderSimple",
    "CheckpointLoader",
    "Load Checkpoint",
    "UNETLoader",
    "Load Diffusion Model",
    "UnetLoaderGGUF",
    "DualCLIPLoader",
    "ImageOnlyCheckpointLoader",
];

const TEXT_ENCODERS: &[&str] = &[
    "CLIPTextEncode",
    "CLIP Text Encode (Prompt)",
    "CLIPTextEncodeSDXL",
    "CLIPTextEncodeSDXLRefiner",
    "CLIPTextEncodeFlux",
    "TextEncodeQwenImageEditPlus",
];

const LATENT_SOURCES: &[&str] = &[
    "EmptyLatentImage",
    "EmptySD3LatentImage",
    "EmptyHunyuanLatentVideo",
    "WanImageToVideo",
    "LatentUpscale",
];

const SAMPLER_SELECTORS: &[&str] = &["KSamplerSelect"];

const SCHEDULERS: &[&str] = &[
    "BasicScheduler",
    "KarrasScheduler",
    "ExponentialScheduler",
    "SgmUniformScheduler",
    "AlignYourStepsScheduler",
];

const GUIDERS: &[&str] = &["CFGGuider", "BasicGuider", "DualCFGGuider"];

const PRIMITIVES: &[&str] = &[
    "PrimitiveNode",
    "Primitive",
    "PrimitiveFloat",
    "PrimitiveInt",
    "PrimitiveString",
    "PrimitiveStringMultiline",
];

const PASS_THROUGH: &[&str] = &[
    "LoraLoader",
    "LoraLoaderModelOnly",
    "ModelSamplingDiscrete",
    "ModelSamplingSD3",
    "ModelSamplingFlux",
    "ModelSamplingAuraFlow",
    "FreeU",
    "FreeU_V2",
    "ConditioningCombine",
    "ConditioningConcat",
    "ConditioningAverage",
    "ConditioningSetArea",
    "ConditioningSetTimestepRange",
    "ConditioningZeroOut",
    "ControlNetApply",
    "ControlNetApplyAdvanced",
    "FluxGuidance",
    "Reroute",
    "LatentUpscaleBy",
    "RepeatLatentBatch",
    "SetLatentNoiseMask",
];

/// Positional widget names for the explicit-link shape, which stores widget
/// values as an array.
const WIDGET_LAYOUTS: &[(&str, &[&str])] = &[
    (
        "KSampler",
        &["seed", "control_after_generate", "steps", "cfg", "sampler_name", "scheduler", "denoise"],
    ),
    (
        "KSamplerAdvanced",
        &[
            "add_noise",
            "noise_seed",
            "control_after_generate",
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "start_at_step",
            "end_at_step",
            "return_with_leftover_noise",
        ],
    ),
    ("SamplerCustom", &["add_noise", "noise_seed", "control_after_generate", "cfg"]),
    (
        "KSampler (Efficient)",
        &["seed", "control_after_generate", "steps", "cfg", "sampler_name", "scheduler", "denoise", "preview_method", "vae_decode"],
    ),
    (
        "KSamplerEfficient",
        &["seed", "control_after_generate", "steps", "cfg", "sampler_name", "scheduler", "denoise", "preview_method", "vae_decode"],
    ),
    (
        "FaceDetailer",
        &[
            "guide_size",
            "guide_size_for",
            "max_size",
            "seed",
            "control_after_generate",
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "denoise",
            "feather",
            "noise_mask",
            "force_inpaint",
        ],
    ),
    (
        "DetailerForEach",
        &[
            "guide_size",
            "guide_size_for",
            "max_size",
            "seed",
            "control_after_generate",
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "denoise",
            "feather",
            "noise_mask",
            "force_inpaint",
        ],
    ),
    (
        "WanVideoSampler",
        &["steps", "cfg", "shift", "seed", "control_after_generate", "force_offload", "scheduler"],
    ),
    (
        "UltimateSDUpscale",
        &["upscale_by", "seed", "control_after_generate", "steps", "cfg", "sampler_name", "scheduler", "denoise"],
    ),
    ("CheckpointLoaderSimple", &["ckpt_name"]),
    ("CheckpointLoader", &["config_name", "ckpt_name"]),
    ("ImageOnlyCheckpointLoader", &["ckpt_name"]),
    ("UNETLoader", &["unet_name", "weight_dtype"]),
    ("UnetLoaderGGUF", &["unet_name"]),
    ("DualCLIPLoader", &["clip_name1", "clip_name2", "type"]),
    ("CLIPTextEncode", &["text"]),
    (
        "CLIPTextEncodeSDXL",
        &["width", "height", "crop_w", "crop_h", "target_width", "target_height", "text_g", "text_l"],
    ),
    ("CLIPTextEncodeSDXLRefiner", &["ascore", "width", "height", "text"]),
    ("CLIPTextEncodeFlux", &["clip_l", "t5xxl", "guidance"]),
    ("EmptyLatentImage", &["width", "height", "batch_size"]),
    ("EmptySD3LatentImage", &["width", "height", "batch_size"]),
    ("EmptyHunyuanLatentVideo", &["width", "height", "length", "batch_size"]),
    ("WanImageToVideo", &["width", "height", "length", "batch_size"]),
    ("LatentUpscale", &["upscale_method", "width", "height", "crop"]),
    ("KSamplerSelect", &["sampler_name"]),
    ("BasicScheduler", &["scheduler", "steps", "denoise"]),
    ("KarrasScheduler", &["steps", "sigma_max", "sigma_min", "rho"]),
    ("ExponentialScheduler", &["steps", "sigma_max", "sigma_min"]),
    ("SgmUniformScheduler", &["steps", "denoise"]),
    ("AlignYourStepsScheduler", &["model_type", "steps", "denoise"]),
    ("CFGGuider", &["cfg"]),
    ("DualCFGGuider", &["cfg_conds", "cfg_cond2_negative"]),
    ("PrimitiveNode", &["value", "control_after_generate"]),
    ("PrimitiveFloat", &["value"]),
    ("PrimitiveInt", &["value"]),
    ("PrimitiveString", &["value"]),
    ("PrimitiveStringMultiline", &["value"]),
    ("LoraLoader", &["lora_name", "strength_model", "strength_clip"]),
    ("LoraLoaderModelOnly", &["lora_name", "strength_model"]),
    ("FluxGuidance", &["guidance"]),
];

static BUILTIN: Lazy<NodeRegistry> = Lazy::new(|| {
    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    NodeRegistry {
        version: REGISTRY_VERSION,
        max_trace_depth: DEFAULT_MAX_TRACE_DEPTH,
        sinks: set(SINKS),
        model_loaders: set(MODEL_LOADERS),
        text_encoders: set(TEXT_ENCODERS),
        latent_sources: set(LATENT_SOURCES),
        sampler_selectors: set(SAMPLER_SELECTORS),
        schedulers: set(SCHEDULERS),
        guiders: set(GUIDERS),
        primitives: set(PRIMITIVES),
        pass_through: set(PASS_THROUGH),
        widget_layouts: WIDGET_LAYOUTS
            .iter()
            .map(|(ty, names)| (ty.to_string(), names.iter().map(|n| n.to_string()).collect()))
            .collect(),
    }
});

/// What a node type does in the graph, as far as extraction is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Sampler,
    ModelLoader,
    TextEncoder,
    LatentSource,
    SamplerSelect,
    Scheduler,
    Guider,
    Primitive,
    PassThrough,
}

/// Versioned table of node type names per role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRegistry {
    pub version: u32,
    pub max_trace_depth: usize,
    pub sinks: BTreeSet<String>,
    pub model_loaders: BTreeSet<String>,
    pub text_encoders: BTreeSet<String>,
    pub latent_sources: BTreeSet<String>,
    pub sampler_selectors: BTreeSet<String>,
    pub schedulers: BTreeSet<String>,
    pub guiders: BTreeSet<String>,
    pub primitives: BTreeSet<String>,
    pub pass_through: BTreeSet<String>,
    /// Type name -> widget names in positional order.
    pub widget_layouts: BTreeMap<String, Vec<String>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Additions layered on top of the built-in registry, usually from config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOverrides {
    pub max_trace_depth: Option<usize>,
    pub extra_sinks: Vec<String>,
    pub extra_model_loaders: Vec<String>,
    pub extra_text_encoders: Vec<String>,
    pub extra_latent_sources: Vec<String>,
    pub extra_sampler_selectors: Vec<String>,
    pub extra_schedulers: Vec<String>,
    pub extra_guiders: Vec<String>,
    pub extra_primitives: Vec<String>,
    pub extra_pass_through: Vec<String>,
    pub widget_layouts: BTreeMap<String, Vec<String>>,
}

impl RegistryOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl NodeRegistry {
    /// The registry shipped with this build.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Layer configured names on top of this registry.
    ///
    /// A type name added to one role is removed from every other role, so a
    /// node pack can reclassify a built-in type.
    pub fn merge(&mut self, overrides: RegistryOverrides) {
        if let Some(depth) = overrides.max_trace_depth {
            self.max_trace_depth = depth.max(1);
        }

        let groups = [
            (NodeRole::Sampler, overrides.extra_sinks),
            (NodeRole::ModelLoader, overrides.extra_model_loaders),
            (NodeRole::TextEncoder, overrides.extra_text_encoders),
            (NodeRole::LatentSource, overrides.extra_latent_sources),
            (NodeRole::SamplerSelect, overrides.extra_sampler_selectors),
            (NodeRole::Scheduler, overrides.extra_schedulers),
            (NodeRole::Guider, overrides.extra_guiders),
            (NodeRole::Primitive, overrides.extra_primitives),
            (NodeRole::PassThrough, overrides.extra_pass_through),
        ];
        for (role, names) in groups {
            for name in names {
                self.assign(&name, role);
            }
        }

        self.widget_layouts.extend(overrides.widget_layouts);
    }

    fn assign(&mut self, name: &str, role: NodeRole) {
        for set in self.all_sets_mut() {
            set.remove(name);
        }
        self.set_mut(role).insert(name.to_string());
    }

    fn all_sets_mut(&mut self) -> [&mut BTreeSet<String>; 9] {
        [
            &mut self.sinks,
            &mut self.model_loaders,
            &mut self.text_encoders,
            &mut self.latent_sources,
            &mut self.sampler_selectors,
            &mut self.schedulers,
            &mut self.guiders,
            &mut self.primitives,
            &mut self.pass_through,
        ]
    }

    fn set_mut(&mut self, role: NodeRole) -> &mut BTreeSet<String> {
        match role {
            NodeRole::Sampler => &mut self.sinks,
            NodeRole::ModelLoader => &mut self.model_loaders,
            NodeRole::TextEncoder => &mut self.text_encoders,
            NodeRole::LatentSource => &mut self.latent_sources,
            NodeRole::SamplerSelect => &mut self.sampler_selectors,
            NodeRole::Scheduler => &mut self.schedulers,
            NodeRole::Guider => &mut self.guiders,
            NodeRole::Primitive => &mut self.primitives,
            NodeRole::PassThrough => &mut self.pass_through,
        }
    }

    /// Role of a node type, or `None` for types the registry does not know.
    pub fn role(&self, class_type: &str) -> Option<NodeRole> {
        if self.sinks.contains(class_type) {
            Some(NodeRole::Sampler)
        } else if self.model_loaders.contains(class_type) {
            Some(NodeRole::ModelLoader)
        } else if self.text_encoders.contains(class_type) {
            Some(NodeRole::TextEncoder)
        } else if self.latent_sources.contains(class_type) {
            Some(NodeRole::LatentSource)
        } else if self.sampler_selectors.contains(class_type) {
            Some(NodeRole::SamplerSelect)
        } else if self.schedulers.contains(class_type) {
            Some(NodeRole::Scheduler)
        } else if self.guiders.contains(class_type) {
            Some(NodeRole::Guider)
        } else if self.primitives.contains(class_type) {
            Some(NodeRole::Primitive)
        } else if self.pass_through.contains(class_type) {
            Some(NodeRole::PassThrough)
        } else {
            None
        }
    }

    pub fn widget_layout(&self, class_type: &str) -> Option<&[String]> {
        self.widget_layouts.get(class_type).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_roles() {
        let registry = NodeRegistry::builtin();
        assert_eq!(registry.version, REGISTRY_VERSION);
        assert_eq!(registry.role("KSampler"), Some(NodeRole::Sampler));
        assert_eq!(registry.role("UltimateSDUpscale"), Some(NodeRole::Sampler));
        assert_eq!(registry.role("CheckpointLoaderSimple"), Some(NodeRole::ModelLoader));
        assert_eq!(registry.role("CLIPTextEncode"), Some(NodeRole::TextEncoder));
        assert_eq!(registry.role("LoraLoader"), Some(NodeRole::PassThrough));
        assert_eq!(registry.role("VAEDecode"), None);
    }

    #[test]
    fn test_widget_layout_lookup() {
        let registry = NodeRegistry::builtin();
        let layout = registry.widget_layout("KSampler").unwrap();
        assert_eq!(layout.iter().position(|n| n == "cfg"), Some(3));
        for sink in ["FaceDetailer", "DetailerForEach", "KSampler (Efficient)", "KSamplerEfficient", "WanVideoSampler"] {
            let layout = registry
                .widget_layout(sink)
                .unwrap_or_else(|| panic!("no layout for {}", sink));
            assert!(layout.iter().any(|n| n == "cfg"), "{} has no cfg widget", sink);
            assert!(layout.iter().any(|n| n == "steps"), "{} has no steps widget", sink);
        }
        assert!(registry.widget_layout("SaveImage").is_none());
    }

    #[test]
    fn test_merge_reclassifies_and_extends() {
        let mut registry = NodeRegistry::builtin();
        let overrides: RegistryOverrides = toml::from_str(
            r#"
max_trace_depth = 8
extra_sinks = ["MyFancySampler"]
extra_pass_through = ["KSamplerEfficient"]

[widget_layouts]
MyFancySampler = ["seed", "steps", "cfg"]
"#,
        )
        .unwrap();
        registry.merge(overrides);

        assert_eq!(registry.max_trace_depth, 8);
        assert_eq!(registry.role("MyFancySampler"), Some(NodeRole::Sampler));
        assert_eq!(registry.role("KSamplerEfficient"), Some(NodeRole::PassThrough));
        assert_eq!(registry.widget_layout("MyFancySampler").unwrap().len(), 3);
    }

    #[test]
    fn test_registry_serde_defaults() {
        let registry: NodeRegistry = serde_json::from_str(r#"{"version": 7}"#).unwrap();
        assert_eq!(registry.version, 7);
        assert!(registry.sinks.contains("KSampler"));
    }
}
