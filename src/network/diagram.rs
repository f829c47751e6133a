use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use petgraph::{
    Direction,
    algo::toposort,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};
use thiserror::Error;

/// The value type carried by a port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortKind {
    /// A fixed-size numeric vector.
    Vector(usize),
    Image(ImageKind),
    /// A structured value identified by its type name.
    Abstract(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Color,
    Depth,
    Label,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// A named, typed port on a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub kind: PortKind,
}

impl PortSpec {
    pub fn vector(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Vector(size),
        }
    }

    pub fn image(name: impl Into<String>, kind: ImageKind) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Image(kind),
        }
    }

    pub fn value(name: impl Into<String>, type_name: &'static str) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Abstract(type_name),
        }
    }
}

/// What a block computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    World,
    SceneGraph,
    PassThrough,
    Demultiplexer,
    Adder,
    StateInterpolator,
    InverseDynamicsController,
    EndEffectorController,
    EndEffectorStateMap,
    RgbdCamera,
}

/// A node of the diagram.
#[derive(Clone, Debug)]
pub struct Block {
    pub name: String,
    pub kind: BlockKind,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    /// True when some output depends on the current value of some input.
    pub direct_feedthrough: bool,
}

impl Block {
    pub fn new(name: impl Into<String>, kind: BlockKind, direct_feedthrough: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            direct_feedthrough,
        }
    }

    pub fn input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    fn port(&self, direction: PortDirection, name: &str) -> Option<(usize, &PortSpec)> {
        let ports = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };
        ports.iter().enumerate().find(|(_, p)| p.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(NodeIndex);

/// An edge: one output port feeding one input port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wire {
    pub output: usize,
    pub input: usize,
}

/// A port of an inner block exposed on the diagram boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedPort {
    pub block: BlockId,
    pub port: usize,
    pub kind: PortKind,
}

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("a block named `{0}` already exists")]
    DuplicateBlock(String),

    #[error("block `{block}` has no {direction} port `{port}`")]
    UnknownPort {
        block: String,
        direction: PortDirection,
        port: String,
    },

    #[error("cannot connect `{from}` ({from_kind:?}) to `{to}` ({to_kind:?})")]
    KindMismatch {
        from: String,
        from_kind: PortKind,
        to: String,
        to_kind: PortKind,
    },

    #[error("input `{0}` is already connected or exported")]
    InputTaken(String),

    #[error("an exported {direction} port named `{name}` already exists")]
    DuplicateExport {
        direction: PortDirection,
        name: String,
    },

    #[error("input `{0}` is neither connected nor exported")]
    DanglingInput(String),

    #[error("algebraic loop through block `{0}`")]
    AlgebraicLoop(String),
}

/// A signal-flow graph of blocks connected output-to-input.
#[derive(Clone, Debug, Default)]
pub struct Diagram {
    graph: DiGraph<Block, Wire>,
    node_map: HashMap<String, NodeIndex>,
    taken_inputs: HashSet<(NodeIndex, usize)>,
    inputs: BTreeMap<String, ExportedPort>,
    outputs: BTreeMap<String, ExportedPort>,
}

impl Diagram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block: Block) -> Result<BlockId, DiagramError> {
        if self.node_map.contains_key(&block.name) {
            return Err(DiagramError::DuplicateBlock(block.name));
        }
        let name = block.name.clone();
        let index = self.graph.add_node(block);
        self.node_map.insert(name, index);
        Ok(BlockId(index))
    }

    /// Feeds output `from.1` of block `from.0` into input `to.1` of block `to.0`.
    ///
    /// One output may feed any number of inputs; an input accepts one source.
    pub fn connect(
        &mut self,
        from: (BlockId, &str),
        to: (BlockId, &str),
    ) -> Result<(), DiagramError> {
        let (output, from_spec) = self.locate(from.0, PortDirection::Output, from.1)?;
        let (input, to_spec) = self.locate(to.0, PortDirection::Input, to.1)?;
        if from_spec.kind != to_spec.kind {
            return Err(DiagramError::KindMismatch {
                from: self.qualified(from.0, from.1),
                from_kind: from_spec.kind.clone(),
                to: self.qualified(to.0, to.1),
                to_kind: to_spec.kind.clone(),
            });
        }
        self.take_input(to.0, input, to.1)?;
        self.graph.add_edge(from.0.0, to.0.0, Wire { output, input });
        Ok(())
    }

    /// Exposes an inner input under `name`. The input may not also be connected.
    pub fn export_input(&mut self, name: &str, port: (BlockId, &str)) -> Result<(), DiagramError> {
        if self.inputs.contains_key(name) {
            return Err(DiagramError::DuplicateExport {
                direction: PortDirection::Input,
                name: name.to_string(),
            });
        }
        let (index, spec) = self.locate(port.0, PortDirection::Input, port.1)?;
        let kind = spec.kind.clone();
        self.take_input(port.0, index, port.1)?;
        self.inputs.insert(
            name.to_string(),
            ExportedPort {
                block: port.0,
                port: index,
                kind,
            },
        );
        Ok(())
    }

    /// Exposes an inner output under `name`. One output may be exported under
    /// several names.
    pub fn export_output(&mut self, name: &str, port: (BlockId, &str)) -> Result<(), DiagramError> {
        if self.outputs.contains_key(name) {
            return Err(DiagramError::DuplicateExport {
                direction: PortDirection::Output,
                name: name.to_string(),
            });
        }
        let (index, spec) = self.locate(port.0, PortDirection::Output, port.1)?;
        let kind = spec.kind.clone();
        self.outputs.insert(
            name.to_string(),
            ExportedPort {
                block: port.0,
                port: index,
                kind,
            },
        );
        Ok(())
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.graph[id.0]
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.node_map.get(name).copied().map(BlockId)
    }

    pub fn input_port(&self, name: &str) -> Option<&ExportedPort> {
        self.inputs.get(name)
    }

    pub fn output_port(&self, name: &str) -> Option<&ExportedPort> {
        self.outputs.get(name)
    }

    pub fn input_port_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn output_port_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn num_blocks(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_connections(&self) -> usize {
        self.graph.edge_count()
    }

    /// Sources feeding `block`, as `(source block, output port, input port)` names.
    pub fn incoming(&self, block: &str) -> Vec<(&str, &str, &str)> {
        let Some(&index) = self.node_map.get(block) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| {
                let source = &self.graph[edge.source()];
                let wire = edge.weight();
                (
                    source.name.as_str(),
                    source.outputs[wire.output].name.as_str(),
                    self.graph[index].inputs[wire.input].name.as_str(),
                )
            })
            .collect()
    }

    /// Fails on the first input that is neither connected nor exported.
    pub fn check_complete(&self) -> Result<(), DiagramError> {
        for index in self.graph.node_indices() {
            let block = &self.graph[index];
            for (port, spec) in block.inputs.iter().enumerate() {
                if !self.taken_inputs.contains(&(index, port)) {
                    let port = format!("{}.{}", block.name, spec.name);
                    return Err(DiagramError::DanglingInput(port));
                }
            }
        }
        Ok(())
    }

    /// Block names in an order where every direct-feedthrough block follows the
    /// blocks feeding it. Wires into blocks without feedthrough do not constrain
    /// the order, so feedback through such a block is not a loop.
    pub fn evaluation_order(&self) -> Result<Vec<&str>, DiagramError> {
        let mut constraints =
            DiGraph::<(), ()>::with_capacity(self.graph.node_count(), self.graph.edge_count());
        for _ in self.graph.node_indices() {
            constraints.add_node(());
        }
        for edge in self.graph.edge_references() {
            if self.graph[edge.target()].direct_feedthrough {
                constraints.add_edge(edge.source(), edge.target(), ());
            }
        }
        let order = toposort(&constraints, None).map_err(|cycle| {
            DiagramError::AlgebraicLoop(self.graph[cycle.node_id()].name.clone())
        })?;
        Ok(order.into_iter().map(|i| self.graph[i].name.as_str()).collect())
    }

    fn locate(
        &self,
        block: BlockId,
        direction: PortDirection,
        port: &str,
    ) -> Result<(usize, &PortSpec), DiagramError> {
        let node = &self.graph[block.0];
        node.port(direction, port).ok_or_else(|| DiagramError::UnknownPort {
            block: node.name.clone(),
            direction,
            port: port.to_string(),
        })
    }

    fn take_input(&mut self, block: BlockId, input: usize, name: &str) -> Result<(), DiagramError> {
        if !self.taken_inputs.insert((block.0, input)) {
            return Err(DiagramError::InputTaken(self.qualified(block, name)));
        }
        Ok(())
    }

    fn qualified(&self, block: BlockId, port: &str) -> String {
        format!("{}.{}", self.graph[block.0].name, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain(name: &str) -> Block {
        Block::new(name, BlockKind::PassThrough, true)
            .input(PortSpec::vector("u", 2))
            .output(PortSpec::vector("y", 2))
    }

    #[test]
    fn order_follows_feedthrough_wires() {
        let mut diagram = Diagram::new();
        let c = diagram.add_block(gain("c")).unwrap();
        let a = diagram.add_block(gain("a")).unwrap();
        let b = diagram.add_block(gain("b")).unwrap();
        diagram.export_input("in", (a, "u")).unwrap();
        diagram.connect((a, "y"), (b, "u")).unwrap();
        diagram.connect((b, "y"), (c, "u")).unwrap();
        diagram.check_complete().unwrap();
        assert_eq!(diagram.evaluation_order().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(diagram.incoming("c"), vec![("b", "y", "u")]);
    }

    #[test]
    fn feedback_through_stateful_block_is_not_a_loop() {
        let mut diagram = Diagram::new();
        let plant = diagram
            .add_block(
                Block::new("plant", BlockKind::World, false)
                    .input(PortSpec::vector("u", 2))
                    .output(PortSpec::vector("x", 2)),
            )
            .unwrap();
        let ctrl = diagram.add_block(gain("ctrl")).unwrap();
        diagram.connect((plant, "x"), (ctrl, "u")).unwrap();
        diagram.connect((ctrl, "y"), (plant, "u")).unwrap();
        assert_eq!(diagram.evaluation_order().unwrap(), vec!["plant", "ctrl"]);

        let mut looped = Diagram::new();
        let a = looped.add_block(gain("a")).unwrap();
        let b = looped.add_block(gain("b")).unwrap();
        looped.connect((a, "y"), (b, "u")).unwrap();
        looped.connect((b, "y"), (a, "u")).unwrap();
        assert!(matches!(looped.evaluation_order(), Err(DiagramError::AlgebraicLoop(_))));
    }

    #[test]
    fn wiring_errors_are_reported() {
        let mut diagram = Diagram::new();
        let a = diagram.add_block(gain("a")).unwrap();
        let wide = diagram
            .add_block(
                Block::new("wide", BlockKind::Adder, true)
                    .input(PortSpec::vector("u", 3))
                    .output(PortSpec::vector("y", 3)),
            )
            .unwrap();
        assert!(matches!(diagram.add_block(gain("a")), Err(DiagramError::DuplicateBlock(_))));
        assert!(matches!(
            diagram.connect((a, "y"), (wide, "u")),
            Err(DiagramError::KindMismatch { .. })
        ));
        assert!(matches!(
            diagram.connect((a, "nope"), (wide, "u")),
            Err(DiagramError::UnknownPort { .. })
        ));
        diagram.export_input("in", (a, "u")).unwrap();
        assert!(matches!(
            diagram.connect((a, "y"), (a, "u")),
            Err(DiagramError::InputTaken(_))
        ));
        assert!(matches!(
            diagram.check_complete(),
            Err(DiagramError::DanglingInput(p)) if p == "wide.u"
        ));
    }
}
