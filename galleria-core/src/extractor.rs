//! Parameter extraction from a normalized pipeline graph.
//!
//! Every active sampler node ("sink") yields one [`SinkParameters`]. Fields
//! read directly from the sink (cfg, steps, sampler, scheduler) come from its
//! own values; model, prompts and dimensions are found by tracing the sink's
//! inputs backward through pass-through nodes until a terminal producer is
//! reached. A trace that fails leaves the field `None`; it never drops the sink.

use crate::graph::{GraphModel, Node, NodeKind, NodeMode, Resolved};
use crate::registry::NodeRegistry;
use crate::types::SinkParameters;
use serde_json::Value;
use tracing::debug;

/// Keys a model loader may store its model file name under, in priority order.
const MODEL_NAME_KEYS: &[&str] = &["ckpt_name", "unet_name", "model_name", "clip_name1"];

/// Keys a text encoder may store its prompt under, in priority order.
const PROMPT_KEYS: &[&str] = &["text", "text_g", "text_l", "clip_l", "t5xxl", "prompt"];

const LATENT_INPUTS: &[&str] = &["latent_image", "latent", "samples", "latent_in"];

/// The kind of terminal producer a trace is looking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Model,
    Conditioning,
    Latent,
    SamplerSelect,
    Sigmas,
    Guider,
}

impl Target {
    fn accepts(self, kind: NodeKind) -> bool {
        matches!(
            (self, kind),
            (Target::Model, NodeKind::ModelLoader)
                | (Target::Conditioning, NodeKind::TextEncoder)
                | (Target::Latent, NodeKind::LatentSource)
                | (Target::SamplerSelect, NodeKind::SamplerSelect)
                | (Target::Sigmas, NodeKind::Scheduler)
                | (Target::Guider, NodeKind::Guider)
        )
    }

    /// Inputs a pass-through node may carry the traced value on.
    fn fallback_inputs(self) -> &'static [&'static str] {
        match self {
            Target::Model => &["model", "unet"],
            Target::Conditioning => &[
                "conditioning",
                "conditioning_1",
                "conditioning_to",
                "conditioning_from",
                "base_conditioning",
            ],
            Target::Latent => LATENT_INPUTS,
            Target::SamplerSelect => &["sampler"],
            Target::Sigmas => &["sigmas"],
            Target::Guider => &["guider"],
        }
    }
}

/// Result of a backward trace.
#[derive(Clone, Copy, Debug)]
pub enum Trace<'g> {
    Found(&'g Node),
    Unresolved(Unresolved),
}

/// Why a trace stopped without reaching a terminal producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unresolved {
    /// Input absent, dangling, or a literal where a node was expected.
    Missing,
    /// A producer that is neither terminal nor traversable.
    DeadEnd,
    /// The depth bound was hit, typically a cyclic link table.
    DepthExceeded,
}

impl<'g> Trace<'g> {
    fn found(self) -> Option<&'g Node> {
        match self {
            Trace::Found(node) => Some(node),
            Trace::Unresolved(_) => None,
        }
    }
}

/// Extract one parameter set per active sink, in sink order.
pub fn extract(graph: &GraphModel, registry: &NodeRegistry) -> Vec<SinkParameters> {
    let extractor = Extractor {
        graph,
        max_depth: registry.max_trace_depth,
    };

    sinks(graph)
        .into_iter()
        .enumerate()
        .map(|(index, sink)| extractor.extract_sink(index as u32, sink))
        .collect()
}

/// Active sinks ordered by declared evaluation order when every sink has
/// one, otherwise by ascending node id.
pub fn sinks(graph: &GraphModel) -> Vec<&Node> {
    let mut sinks: Vec<&Node> = graph
        .nodes()
        .filter(|n| n.kind == NodeKind::Sampler && n.mode == NodeMode::Active)
        .collect();

    let ordered = !sinks.is_empty() && sinks.iter().all(|n| n.order.is_some());
    if ordered {
        sinks.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| id_key(&a.id).cmp(&id_key(&b.id))));
    } else {
        sinks.sort_by(|a, b| id_key(&a.id).cmp(&id_key(&b.id)));
    }
    sinks
}

/// Numeric ids sort numerically and before any non-numeric id.
fn id_key(id: &str) -> (u8, i64, &str) {
    match id.parse::<i64>() {
        Ok(n) => (0, n, ""),
        Err(_) => (1, 0, id),
    }
}

struct Extractor<'g> {
    graph: &'g GraphModel,
    max_depth: usize,
}

impl<'g> Extractor<'g> {
    fn extract_sink(&self, sink_index: u32, sink: &'g Node) -> SinkParameters {
        let guider = if sink.is_linked("guider") {
            self.trace(sink, "guider", Target::Guider).found()
        } else {
            None
        };

        let model = self
            .trace_with_guider(sink, guider, &["model"], Target::Model)
            .and_then(|loader| self.first_text(loader, MODEL_NAME_KEYS));
        let positive_prompt = self
            .trace_with_guider(sink, guider, &["positive", "conditioning", "cond1"], Target::Conditioning)
            .and_then(|encoder| self.first_text(encoder, PROMPT_KEYS));
        let negative_prompt = self
            .trace_with_guider(sink, guider, &["negative"], Target::Conditioning)
            .and_then(|encoder| self.first_text(encoder, PROMPT_KEYS));

        let sampler = self.text(sink, "sampler_name").or_else(|| {
            self.trace(sink, "sampler", Target::SamplerSelect)
                .found()
                .and_then(|select| self.text(select, "sampler_name"))
        });

        let sigmas = if sink.is_linked("sigmas") {
            self.trace(sink, "sigmas", Target::Sigmas).found()
        } else {
            None
        };
        let scheduler = self
            .text(sink, "scheduler")
            .or_else(|| sigmas.and_then(|s| self.text(s, "scheduler")));
        let steps = self
            .int(sink, "steps")
            .or_else(|| sigmas.and_then(|s| self.int(s, "steps")));

        let cfg = self
            .float(sink, "cfg")
            .or_else(|| guider.and_then(|g| self.float(g, "cfg")));

        let latent = LATENT_INPUTS
            .iter()
            .find(|name| sink.is_linked(name))
            .and_then(|name| self.trace(sink, name, Target::Latent).found());
        let width = latent.and_then(|l| self.int(l, "width"));
        let height = latent.and_then(|l| self.int(l, "height"));

        SinkParameters {
            sink_index,
            model,
            sampler,
            scheduler,
            cfg,
            steps,
            positive_prompt,
            negative_prompt,
            width,
            height,
        }
    }

    /// Trace the first of `names` the sink carries, or the same inputs on its guider.
    fn trace_with_guider(
        &self,
        sink: &'g Node,
        guider: Option<&'g Node>,
        names: &[&str],
        target: Target,
    ) -> Option<&'g Node> {
        let owner = if names.iter().any(|n| sink.input(n).is_some()) {
            sink
        } else {
            guider?
        };
        let name = names.iter().find(|n| owner.input(n).is_some())?;
        self.trace(owner, name, target).found()
    }

    /// Follow `start.input(name)` backward until a node accepted by `target`.
    fn trace(&self, start: &'g Node, name: &str, target: Target) -> Trace<'g> {
        let origin = name;
        let mut current = start;
        let mut input = name.to_string();

        for _ in 0..self.max_depth {
            let producer = match self.graph.resolve_input(current, &input) {
                Resolved::Producer { node, .. } => node,
                Resolved::Literal(_) | Resolved::Missing => {
                    debug!(node = %current.id, input = %input, "trace: input unresolved");
                    return Trace::Unresolved(Unresolved::Missing);
                }
            };

            if producer.mode == NodeMode::Active && target.accepts(producer.kind) {
                return Trace::Found(producer);
            }

            match self.next_input(producer, &input, origin, target) {
                Some(next) => {
                    current = producer;
                    input = next;
                }
                None => {
                    debug!(node = %producer.id, class_type = %producer.class_type, "trace: dead end");
                    return Trace::Unresolved(Unresolved::DeadEnd);
                }
            }
        }

        debug!(start = %start.id, input = origin, depth = self.max_depth, "trace: depth exceeded");
        Trace::Unresolved(Unresolved::DepthExceeded)
    }

    /// Which input of a non-terminal `node` to continue through, if any.
    fn next_input(&self, node: &Node, input: &str, origin: &str, target: Target) -> Option<String> {
        let traversable = node.mode == NodeMode::Bypassed
            || match node.kind {
                NodeKind::PassThrough | NodeKind::Unknown => true,
                // Refine chains: a second sampler consumes the first one's latent.
                NodeKind::Sampler => target == Target::Latent,
                _ => false,
            };
        if !traversable {
            return None;
        }

        if let Some(name) = [input, origin].into_iter().find(|n| node.is_linked(n)) {
            return Some(name.to_string());
        }
        if let Some(name) = target.fallback_inputs().iter().find(|n| node.is_linked(n)) {
            return Some(name.to_string());
        }

        // Reroute-style nodes with a single unnamed wire.
        let mut linked = node.linked_inputs();
        match (linked.next(), linked.next()) {
            (Some(only), None) => Some(only.to_string()),
            _ => None,
        }
    }

    fn text(&self, node: &Node, name: &str) -> Option<String> {
        self.graph.param(node, name).and_then(coerce_text)
    }

    fn first_text(&self, node: &Node, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.text(node, name))
    }

    fn int(&self, node: &Node, name: &str) -> Option<i64> {
        self.graph.param(node, name).and_then(coerce_int)
    }

    fn float(&self, node: &Node, name: &str) -> Option<f64> {
        self.graph.param(node, name).and_then(coerce_float)
    }
}

/// Non-blank strings, kept verbatim.
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Integers, integral floats and numeric strings.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

/// Numbers and numeric strings; NaN and infinities are rejected.
pub fn coerce_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}
