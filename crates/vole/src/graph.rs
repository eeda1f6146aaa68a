// Graph IR — the static representation of a captured model.
//
// A Program is a set of named Graphs; "main" is the entry point. Each Graph
// is a flat list of Nodes in SSA form: a node names its operation and the
// NodeIds of its operands, and the graph designates one node as its output.
//
// Control flow is structured, not traced: an If node refers to two subgraphs
// (one per branch) and a Scan node refers to a body subgraph that is applied
// once per step of the leading dimension. This is what lets a single capture
// stay valid for every input value — the branch is taken at run time, inside
// the VM, not at capture time.

use vole_core::{DType, Shape};

/// Identifier of a node within its graph (index into `Graph::nodes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// The operation a node performs.
#[derive(Debug, Clone)]
pub enum OpKind {
    /// A positional graph input, bound by the caller.
    Input,
    /// A named model parameter, bound from the shared parameter map.
    Param,
    /// A constant tensor filled with `value` (shape taken from the node).
    Constant { value: f64, dtype: DType },

    // Unary
    Neg,
    Tanh,
    Identity,

    // Binary (element-wise, broadcasting)
    Add,
    Sub,
    Mul,

    /// Scalar comparison: 1.0 if lhs > rhs else 0.0.
    Greater,

    /// Sum of all elements to a scalar.
    SumAll,

    /// Dense layer: inputs are (x, weight, [bias]).
    Linear { bias: bool },

    /// Branch on a scalar condition; both branches are subgraphs taking the
    /// same positional arguments (the node's inputs after the condition).
    If {
        then_graph: String,
        else_graph: String,
    },

    /// Fold the body subgraph over dim 0 of the first input; the second
    /// input is the initial carry. The body takes (x_t, carry) and returns
    /// the next carry; the node's value is the final carry.
    Scan { body_graph: String },
}

/// One operation in a graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable name; for Input/Param nodes this is the binding key.
    pub name: String,
    pub op: OpKind,
    /// Operand node ids, in positional order.
    pub inputs: Vec<NodeId>,
    /// Declared shape, where known (Input and Constant nodes).
    pub shape: Option<Shape>,
}

/// A single function: a flat SSA node list with one designated output.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    /// Positional inputs (ids of Input nodes, in call order).
    pub inputs: Vec<NodeId>,
    /// The node whose value is the graph's result.
    pub output: NodeId,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph {
            name: name.into(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            output: NodeId(0),
        }
    }

    /// Append a node and return its id.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: OpKind,
        inputs: Vec<NodeId>,
        shape: Option<Shape>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        if matches!(op, OpKind::Input) {
            self.inputs.push(id);
        }
        self.nodes.push(Node {
            id,
            name: name.into(),
            op,
            inputs,
            shape,
        });
        id
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Topological order of the nodes reachable from the output.
    ///
    /// Nodes are appended in construction order, which is already a valid
    /// schedule (operands always precede their users), so this is a simple
    /// reachability walk followed by an id sort.
    pub fn topo_order(&self) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![self.output];
        // Inputs are always live: the caller binds them positionally, so the
        // schedule must load them even if the output doesn't depend on one.
        stack.extend(self.inputs.iter().copied());
        while let Some(id) = stack.pop() {
            if visited[id.0] {
                continue;
            }
            visited[id.0] = true;
            stack.extend(self.node(id).inputs.iter().copied());
        }
        (0..self.nodes.len())
            .filter(|&i| visited[i])
            .map(NodeId)
            .collect()
    }
}

/// A collection of graphs with a designated entry point.
#[derive(Debug, Clone)]
pub struct Program {
    pub graphs: Vec<Graph>,
    /// Name of the entry graph.
    pub main: String,
}

impl Program {
    /// Look up a graph by name.
    pub fn get_graph(&self, name: &str) -> Option<&Graph> {
        self.graphs.iter().find(|g| g.name == name)
    }

    /// The entry graph.
    pub fn main_graph(&self) -> Option<&Graph> {
        self.get_graph(&self.main)
    }
}
