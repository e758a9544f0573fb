//! In-memory pipeline graph, normalized from either document shape.
//!
//! Two shapes are accepted:
//!
//! ```text
//! explicit-link: {"nodes": [{id, type, inputs: [{name, link}], widgets_values}], "links": [[id, from, from_slot, to, to_slot, type]]}
//! id-keyed:      {"<id>": {"class_type": "...", "inputs": {"<name>": literal | [producer_id, slot]}}}
//! ```
//!
//! Shape detection happens once in [`GraphModel::parse`]. Everything after
//! that goes through [`GraphModel::resolve_input`] and [`GraphModel::param`],
//! which behave the same for both shapes.

use crate::error::GraphError;
use crate::registry::{NodeRegistry, NodeRole};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type NodeId = String;

/// Wrapper keys under which some writers nest the actual document.
const WRAPPER_KEYS: &[&str] = &["workflow", "prompt"];

/// Tagged node classification. Extraction dispatches on this, never on the raw type string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Sampler,
    ModelLoader,
    TextEncoder,
    LatentSource,
    SamplerSelect,
    Scheduler,
    Guider,
    Primitive,
    PassThrough,
    /// Type not in the registry. The node's raw data is still available.
    Unknown,
}

impl From<Option<NodeRole>> for NodeKind {
    fn from(role: Option<NodeRole>) -> Self {
        match role {
            Some(NodeRole::Sampler) => NodeKind::Sampler,
            Some(NodeRole::ModelLoader) => NodeKind::ModelLoader,
            Some(NodeRole::TextEncoder) => NodeKind::TextEncoder,
            Some(NodeRole::LatentSource) => NodeKind::LatentSource,
            Some(NodeRole::SamplerSelect) => NodeKind::SamplerSelect,
            Some(NodeRole::Scheduler) => NodeKind::Scheduler,
            Some(NodeRole::Guider) => NodeKind::Guider,
            Some(NodeRole::Primitive) => NodeKind::Primitive,
            Some(NodeRole::PassThrough) => NodeKind::PassThrough,
            None => NodeKind::Unknown,
        }
    }
}

/// Execution mode of a node (explicit-link shape only; id-keyed nodes are always active).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeMode {
    Active,
    Muted,
    Bypassed,
}

impl NodeMode {
    fn from_code(code: i64) -> Self {
        match code {
            2 => NodeMode::Muted,
            4 => NodeMode::Bypassed,
            _ => NodeMode::Active,
        }
    }
}

/// Which document shape a graph was parsed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphShape {
    ExplicitLink,
    IdKeyed,
}

/// A named input slot as declared in the document.
#[derive(Clone, Debug, PartialEq)]
pub enum InputSlot {
    /// Explicit-link shape: index into the link table.
    Link(i64),
    /// Id-keyed shape: direct reference to a producer output.
    Ref { node: NodeId, slot: u32 },
    /// Literal value given in place.
    Literal(Value),
}

/// An edge from a producer output, keyed by link id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub id: i64,
    pub from_node: NodeId,
    pub from_slot: u32,
}

#[derive(Clone, Debug, Default)]
enum Widgets {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

/// One node of the normalized graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub class_type: String,
    pub kind: NodeKind,
    /// Declared evaluation order, when the document records one.
    pub order: Option<i64>,
    pub mode: NodeMode,
    inputs: Vec<(String, InputSlot)>,
    widgets: Widgets,
    widget_index: HashMap<String, usize>,
    properties: Map<String, Value>,
}

impl Node {
    fn new(id: NodeId, class_type: String, registry: &NodeRegistry) -> Self {
        let kind = NodeKind::from(registry.role(&class_type));
        let widget_index = registry
            .widget_layout(&class_type)
            .map(|names| {
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name.clone(), i))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id,
            class_type,
            kind,
            order: None,
            mode: NodeMode::Active,
            inputs: Vec::new(),
            widgets: Widgets::None,
            widget_index,
            properties: Map::new(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&InputSlot> {
        self.inputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slot)| slot)
    }

    /// True when `name` is wired to another node rather than holding a literal.
    pub fn is_linked(&self, name: &str) -> bool {
        matches!(self.input(name), Some(InputSlot::Link(_) | InputSlot::Ref { .. }))
    }

    /// Names of all linked inputs, in declaration order.
    pub fn linked_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|(_, slot)| !matches!(slot, InputSlot::Literal(_)))
            .map(|(name, _)| name.as_str())
    }

    /// Widget value by name, using the layout for positional widgets.
    pub fn widget(&self, name: &str) -> Option<&Value> {
        match &self.widgets {
            Widgets::None => None,
            Widgets::Named(map) => map.get(name),
            Widgets::Positional(values) => {
                let idx = *self.widget_index.get(name)?;
                values.get(idx)
            }
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// A value held by the node itself: literal input, then widget, then property.
    pub fn literal(&self, name: &str) -> Option<&Value> {
        if let Some(InputSlot::Literal(v)) = self.input(name) {
            return Some(v);
        }
        self.widget(name).or_else(|| self.property(name))
    }
}

/// Outcome of resolving a named input.
#[derive(Clone, Copy, Debug)]
pub enum Resolved<'g> {
    /// The input is wired to `node`'s output `slot`.
    Producer { node: &'g Node, slot: u32 },
    /// The input holds a literal value.
    Literal(&'g Value),
    /// Absent input, dangling link, or unknown producer.
    Missing,
}

/// Normalized node table plus link table.
#[derive(Clone, Debug)]
pub struct GraphModel {
    shape: GraphShape,
    nodes: HashMap<NodeId, Node>,
    links: HashMap<i64, Link>,
}

impl GraphModel {
    /// Parse raw document bytes.
    ///
    /// Fails with [`GraphError::MalformedGraph`] when the bytes are not JSON
    /// or the document root is not an object.
    pub fn parse(bytes: &[u8], registry: &NodeRegistry) -> Result<Self, GraphError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value, registry)
    }

    pub fn from_value(value: Value, registry: &NodeRegistry) -> Result<Self, GraphError> {
        let document = unwrap_document(value)?;

        if matches!(document.get("nodes"), Some(Value::Array(_))) {
            Ok(Self::from_explicit_links(&document, registry))
        } else {
            Ok(Self::from_id_keyed(&document, registry))
        }
    }

    fn from_explicit_links(document: &Map<String, Value>, registry: &NodeRegistry) -> Self {
        let widget_overrides = document
            .get("widget_idx_map")
            .and_then(Value::as_object);

        let mut nodes = HashMap::new();
        for raw in document
            .get("nodes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(obj) = raw.as_object() else { continue };
            let Some(id) = obj.get("id").and_then(id_string) else { continue };
            let class_type = obj
                .get("type")
                .or_else(|| obj.get("class_type"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let mut node = Node::new(id.clone(), class_type, registry);
            node.order = obj.get("order").and_then(Value::as_i64);
            node.mode = NodeMode::from_code(obj.get("mode").and_then(Value::as_i64).unwrap_or(0));

            for input in obj
                .get("inputs")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let Some(name) = input.get("name").and_then(Value::as_str) else { continue };
                if let Some(link) = input.get("link").and_then(Value::as_i64) {
                    node.inputs.push((name.to_string(), InputSlot::Link(link)));
                }
            }

            node.widgets = match obj.get("widgets_values") {
                Some(Value::Array(values)) => Widgets::Positional(values.clone()),
                Some(Value::Object(map)) => Widgets::Named(map.clone()),
                _ => Widgets::None,
            };
            if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                node.properties = props.clone();
            }
            if let Some(map) = widget_overrides
                .and_then(|m| m.get(&id))
                .and_then(Value::as_object)
            {
                for (name, idx) in map {
                    if let Some(idx) = idx.as_u64() {
                        node.widget_index.insert(name.clone(), idx as usize);
                    }
                }
            }

            nodes.insert(id, node);
        }

        let links = document
            .get("links")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(parse_link)
            .map(|link| (link.id, link))
            .collect();

        Self {
            shape: GraphShape::ExplicitLink,
            nodes,
            links,
        }
    }

    fn from_id_keyed(document: &Map<String, Value>, registry: &NodeRegistry) -> Self {
        let mut nodes = HashMap::new();
        for (id, raw) in document {
            let Some(obj) = raw.as_object() else { continue };
            let Some(class_type) = obj.get("class_type").and_then(Value::as_str) else {
                continue;
            };

            let mut node = Node::new(id.clone(), class_type.to_string(), registry);
            if let Some(inputs) = obj.get("inputs").and_then(Value::as_object) {
                for (name, value) in inputs {
                    let slot = match as_reference(value) {
                        Some((node, slot)) => InputSlot::Ref { node, slot },
                        None => InputSlot::Literal(value.clone()),
                    };
                    node.inputs.push((name.clone(), slot));
                }
            }
            nodes.insert(id.clone(), node);
        }

        Self {
            shape: GraphShape::IdKeyed,
            nodes,
            links: HashMap::new(),
        }
    }

    pub fn shape(&self) -> GraphShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn link(&self, id: i64) -> Option<&Link> {
        self.links.get(&id)
    }

    /// Follow `node`'s input `name` one hop back. Never fails; unknown
    /// references come back as [`Resolved::Missing`].
    pub fn resolve_input<'g>(&'g self, node: &'g Node, name: &str) -> Resolved<'g> {
        match node.input(name) {
            None => Resolved::Missing,
            Some(InputSlot::Literal(value)) => Resolved::Literal(value),
            Some(InputSlot::Ref { node: id, slot }) => match self.nodes.get(id) {
                Some(producer) => Resolved::Producer {
                    node: producer,
                    slot: *slot,
                },
                None => Resolved::Missing,
            },
            Some(InputSlot::Link(link_id)) => {
                let Some(link) = self.links.get(link_id) else {
                    return Resolved::Missing;
                };
                match self.nodes.get(&link.from_node) {
                    Some(producer) => Resolved::Producer {
                        node: producer,
                        slot: link.from_slot,
                    },
                    None => Resolved::Missing,
                }
            }
        }
    }

    /// Read a parameter value of `node`.
    ///
    /// Lookup order: literal input, value of a linked primitive node, widget
    /// value, node property.
    pub fn param<'g>(&'g self, node: &'g Node, name: &str) -> Option<&'g Value> {
        let mut current = node;
        let mut key = name;
        for _ in 0..4 {
            match self.resolve_input(current, key) {
                Resolved::Literal(value) => return Some(value),
                Resolved::Producer { node: producer, .. } if producer.kind == NodeKind::Primitive => {
                    if let Some(value) = producer.literal("value") {
                        return Some(value);
                    }
                    // Primitive fed by another primitive.
                    current = producer;
                    key = "value";
                    continue;
                }
                _ => break,
            }
        }
        node.widget(name).or_else(|| node.property(name))
    }
}

/// Descend through string-encoded and wrapper documents to the graph object.
fn unwrap_document(value: Value) -> Result<Map<String, Value>, GraphError> {
    let mut current = value;
    for _ in 0..4 {
        current = match current {
            Value::String(s) => serde_json::from_str(&s)?,
            Value::Object(map) => {
                if looks_like_graph(&map) {
                    // UI documents may carry the resolved id-keyed graph too.
                    if let Some(api) = embedded_api_graph(&map) {
                        return Ok(api.clone());
                    }
                    return Ok(map);
                }
                match wrapped_document(&map) {
                    Some(inner) => inner.clone(),
                    None => return Ok(map),
                }
            }
            other => {
                return Err(GraphError::MalformedGraph(format!(
                    "document root is {}, expected an object",
                    json_type(&other)
                )))
            }
        };
    }
    Err(GraphError::MalformedGraph("document nested too deeply".to_string()))
}

fn looks_like_graph(map: &Map<String, Value>) -> bool {
    matches!(map.get("nodes"), Some(Value::Array(_)))
        || map
            .values()
            .any(|v| v.get("class_type").and_then(Value::as_str).is_some())
}

/// `extra.prompt` of an explicit-link document, when it holds an id-keyed graph.
fn embedded_api_graph(map: &Map<String, Value>) -> Option<&Map<String, Value>> {
    if !matches!(map.get("nodes"), Some(Value::Array(_))) {
        return None;
    }
    map.get("extra")?
        .get("prompt")?
        .as_object()
        .filter(|api| looks_like_graph(api))
}

fn wrapped_document(map: &Map<String, Value>) -> Option<&Value> {
    WRAPPER_KEYS.iter().find_map(|key| {
        map.iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(key) && (v.is_object() || v.is_string()))
            .map(|(_, v)| v)
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Node ids appear as numbers or strings depending on the writer.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// `[producer_id, slot]` reference in the id-keyed shape.
fn as_reference(value: &Value) -> Option<(NodeId, u32)> {
    let pair = value.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    let slot = pair[1].as_u64()?;
    let id = id_string(&pair[0])?;
    Some((id, u32::try_from(slot).ok()?))
}

/// Link entries come either as arrays or as objects.
fn parse_link(value: &Value) -> Option<Link> {
    match value {
        Value::Array(items) if items.len() >= 3 => Some(Link {
            id: items[0].as_i64()?,
            from_node: id_string(&items[1])?,
            from_slot: u32::try_from(items[2].as_u64()?).ok()?,
        }),
        Value::Object(obj) => Some(Link {
            id: obj.get("id")?.as_i64()?,
            from_node: id_string(obj.get("origin_id")?)?,
            from_slot: u32::try_from(obj.get("origin_slot")?.as_u64()?).ok()?,
        }),
        _ => None,
    }
}
