// Frontend — capture an eager model as a static Program.
//
// Eager modules run one op at a time on concrete tensors; the VM wants a
// whole Program up front. The bridge is the Script trait: a model describes
// its computation once against a FuncBuilder, which records every op as a
// graph node instead of executing it.
//
// Data-dependent control flow cannot be captured by tracing — a trace bakes
// in whichever branch the example input happened to take. The builder
// instead exposes structured combinators: cond() captures BOTH branches as
// subgraphs behind an If node, and scan() captures the loop body once
// behind a Scan node. The resulting Program is valid for every input value.
//
// Parameters are captured by name: param() records a Param node AND collects
// the concrete tensor into a side map. The caller later passes that same map
// (plus the input) to the VM, so eager and compiled execution consume
// identical parameter values.

use std::collections::HashMap;

use vole_core::{DType, Error, Result, Shape, Tensor};
use vole_nn::{GateCell, GatedRnn, SignGate};

use crate::graph::{Graph, NodeId, OpKind, Program};

/// A model that can describe itself as a static graph.
///
/// `build` receives the node id of the graph input and returns the node id
/// of the output, recording every intermediate op on the builder.
pub trait Script {
    fn build(&self, fb: &mut FuncBuilder, input: NodeId) -> Result<NodeId>;
}

/// Shared state across the main graph and all captured subgraphs.
#[derive(Default)]
struct ImportState {
    graphs: Vec<Graph>,
    params: HashMap<String, Tensor>,
    next_sub: usize,
}

/// Records operations into one graph; subgraph builders share the same
/// underlying import state.
pub struct FuncBuilder<'a> {
    state: &'a mut ImportState,
    graph: Graph,
}

impl<'a> FuncBuilder<'a> {
    /// Declare a positional graph input.
    pub fn input(&mut self, name: &str, shape: Option<Shape>) -> NodeId {
        self.graph.add_node(name, OpKind::Input, vec![], shape)
    }

    /// Declare a named parameter, capturing its concrete tensor.
    ///
    /// The same tensor may be re-declared under its name from several
    /// subgraphs; they all bind to one entry in the parameter map. Declaring
    /// a name again with a different tensor is a conversion error — the VM
    /// would otherwise silently compute with whichever tensor won.
    pub fn param(&mut self, name: &str, tensor: &Tensor) -> Result<NodeId> {
        match self.state.params.get(name) {
            Some(existing) if !existing.same_storage(tensor) => {
                return Err(Error::Conversion(format!(
                    "parameter '{name}' captured twice with different tensors"
                )));
            }
            Some(_) => {}
            None => {
                self.state.params.insert(name.to_string(), tensor.clone());
            }
        }
        Ok(self
            .graph
            .add_node(name, OpKind::Param, vec![], Some(tensor.shape().clone())))
    }

    /// A scalar constant.
    pub fn scalar(&mut self, value: f64) -> NodeId {
        self.constant_full(value, Shape::from(()), DType::F64)
    }

    /// A constant tensor of the given shape, filled with `value`.
    pub fn constant_full(&mut self, value: f64, shape: Shape, dtype: DType) -> NodeId {
        self.op(OpKind::Constant { value, dtype }, vec![], Some(shape))
    }

    pub fn neg(&mut self, x: NodeId) -> NodeId {
        self.op(OpKind::Neg, vec![x], None)
    }

    pub fn tanh(&mut self, x: NodeId) -> NodeId {
        self.op(OpKind::Tanh, vec![x], None)
    }

    pub fn identity(&mut self, x: NodeId) -> NodeId {
        self.op(OpKind::Identity, vec![x], None)
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.op(OpKind::Add, vec![lhs, rhs], None)
    }

    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.op(OpKind::Sub, vec![lhs, rhs], None)
    }

    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.op(OpKind::Mul, vec![lhs, rhs], None)
    }

    /// Scalar comparison producing 1.0 / 0.0.
    pub fn greater(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.op(OpKind::Greater, vec![lhs, rhs], None)
    }

    /// Sum of all elements to a scalar.
    pub fn sum_all(&mut self, x: NodeId) -> NodeId {
        self.op(OpKind::SumAll, vec![x], None)
    }

    /// Dense layer application: x @ weight^T (+ bias).
    pub fn linear(&mut self, x: NodeId, weight: NodeId, bias: Option<NodeId>) -> NodeId {
        let mut inputs = vec![x, weight];
        let has_bias = bias.is_some();
        if let Some(b) = bias {
            inputs.push(b);
        }
        self.op(OpKind::Linear { bias: has_bias }, inputs, None)
    }

    /// Capture both branches of a value-dependent conditional.
    ///
    /// `args` are passed positionally to whichever branch runs; each branch
    /// closure receives its own builder and the branch-local argument nodes.
    pub fn cond(
        &mut self,
        cond: NodeId,
        args: &[NodeId],
        then_f: impl FnOnce(&mut FuncBuilder, &[NodeId]) -> Result<NodeId>,
        else_f: impl FnOnce(&mut FuncBuilder, &[NodeId]) -> Result<NodeId>,
    ) -> Result<NodeId> {
        let then_graph = self.build_subgraph("then", args.len(), then_f)?;
        let else_graph = self.build_subgraph("else", args.len(), else_f)?;
        let mut inputs = vec![cond];
        inputs.extend_from_slice(args);
        Ok(self.op(
            OpKind::If {
                then_graph,
                else_graph,
            },
            inputs,
            None,
        ))
    }

    /// Capture a fold over the leading dimension of `xs`.
    ///
    /// The body closure receives (x_t, carry) nodes and returns the next
    /// carry; the scan node's value is the carry after the last step.
    pub fn scan(
        &mut self,
        xs: NodeId,
        init: NodeId,
        body: impl FnOnce(&mut FuncBuilder, NodeId, NodeId) -> Result<NodeId>,
    ) -> Result<NodeId> {
        let body_graph = self.build_subgraph("body", 2, |fb, args| body(fb, args[0], args[1]))?;
        Ok(self.op(OpKind::Scan { body_graph }, vec![xs, init], None))
    }

    /// The declared shape of a node, if known.
    pub fn shape_of(&self, id: NodeId) -> Option<&Shape> {
        self.graph.node(id).shape.as_ref()
    }

    fn op(&mut self, op: OpKind, inputs: Vec<NodeId>, shape: Option<Shape>) -> NodeId {
        let name = format!("{}_{}", op_name(&op), self.graph.nodes.len());
        self.graph.add_node(name, op, inputs, shape)
    }

    fn build_subgraph(
        &mut self,
        kind: &str,
        arity: usize,
        f: impl FnOnce(&mut FuncBuilder, &[NodeId]) -> Result<NodeId>,
    ) -> Result<String> {
        let name = format!("{}_{}_{}", self.graph.name, kind, self.state.next_sub);
        self.state.next_sub += 1;

        let mut sub = FuncBuilder {
            state: &mut *self.state,
            graph: Graph::new(name.clone()),
        };
        let args: Vec<NodeId> = (0..arity)
            .map(|i| sub.input(&format!("arg{i}"), None))
            .collect();
        let out = f(&mut sub, &args)?;
        sub.graph.output = out;

        let graph = sub.graph;
        self.state.graphs.push(graph);
        Ok(name)
    }
}

fn op_name(op: &OpKind) -> &'static str {
    match op {
        OpKind::Input => "input",
        OpKind::Param => "param",
        OpKind::Constant { .. } => "const",
        OpKind::Neg => "neg",
        OpKind::Tanh => "tanh",
        OpKind::Identity => "id",
        OpKind::Add => "add",
        OpKind::Sub => "sub",
        OpKind::Mul => "mul",
        OpKind::Greater => "gt",
        OpKind::SumAll => "sum",
        OpKind::Linear { .. } => "linear",
        OpKind::If { .. } => "if",
        OpKind::Scan { .. } => "scan",
    }
}

/// Capture `model` as a Program with a single named input.
///
/// Returns the Program together with the captured parameter map; the caller
/// adds the input tensor under `input_name` and hands the whole map to the
/// VM.
pub fn import<M: Script>(
    model: &M,
    input_name: &str,
    input_shape: impl Into<Shape>,
) -> Result<(Program, HashMap<String, Tensor>)> {
    let mut state = ImportState::default();
    let mut fb = FuncBuilder {
        state: &mut state,
        graph: Graph::new("main"),
    };
    let x = fb.input(input_name, Some(input_shape.into()));
    let out = model.build(&mut fb, x)?;
    fb.graph.output = out;

    let graph = fb.graph;
    state.graphs.push(graph);

    let program = Program {
        graphs: state.graphs,
        main: "main".to_string(),
    };
    Ok((program, state.params))
}

// Lowerings for the recurrent modules.

/// gate(x) = x if sum(x) > 0 else -x, as an If over two one-arg subgraphs.
fn lower_sign_gate(fb: &mut FuncBuilder, x: NodeId) -> Result<NodeId> {
    let total = fb.sum_all(x);
    let zero = fb.scalar(0.0);
    let cond = fb.greater(total, zero);
    fb.cond(
        cond,
        &[x],
        |fb, args| Ok(fb.identity(args[0])),
        |fb, args| Ok(fb.neg(args[0])),
    )
}

/// One recurrence step: tanh(gate(linear(x)) + h). Parameter names are
/// prefixed so the captured map matches `Module::named_parameters`.
fn lower_cell_step(
    fb: &mut FuncBuilder,
    cell: &GateCell,
    prefix: &str,
    x: NodeId,
    h: NodeId,
) -> Result<NodeId> {
    let w = fb.param(&format!("{prefix}linear.weight"), cell.linear().weight())?;
    let b = match cell.linear().bias() {
        Some(b) => Some(fb.param(&format!("{prefix}linear.bias"), b)?),
        None => None,
    };
    let lin = fb.linear(x, w, b);
    let gated = lower_sign_gate(fb, lin)?;
    let sum = fb.add(gated, h);
    Ok(fb.tanh(sum))
}

impl Script for SignGate {
    fn build(&self, fb: &mut FuncBuilder, input: NodeId) -> Result<NodeId> {
        lower_sign_gate(fb, input)
    }
}

impl Script for GateCell {
    /// Single step from a zero hidden state, matching the eager `forward`.
    fn build(&self, fb: &mut FuncBuilder, input: NodeId) -> Result<NodeId> {
        let shape = declared_shape(fb, input)?;
        if shape.rank() != 2 {
            return Err(Error::Conversion(format!(
                "cell capture expects a [batch, features] input, got {shape}"
            )));
        }
        let batch = shape.dims()[0];
        let dtype = self.linear().weight().dtype();
        let h0 = fb.constant_full(
            0.0,
            Shape::from((batch, self.linear().out_features())),
            dtype,
        );
        lower_cell_step(fb, self, "", input, h0)
    }
}

impl Script for GatedRnn {
    /// The whole unrolled recurrence as one Scan node whose body holds the
    /// cell step (including its data-dependent branch).
    fn build(&self, fb: &mut FuncBuilder, input: NodeId) -> Result<NodeId> {
        let shape = declared_shape(fb, input)?;
        if shape.rank() != 3 {
            return Err(Error::Conversion(format!(
                "recurrent capture expects a [seq, batch, features] input, got {shape}"
            )));
        }
        let batch = shape.dims()[1];
        let dtype = self.cell().linear().weight().dtype();
        let h0 = fb.constant_full(0.0, Shape::from((batch, self.hidden_features())), dtype);
        fb.scan(input, h0, |fb, x_t, h| {
            lower_cell_step(fb, self.cell(), "cell.", x_t, h)
        })
    }
}

fn declared_shape(fb: &FuncBuilder, id: NodeId) -> Result<Shape> {
    fb.shape_of(id).cloned().ok_or_else(|| {
        Error::Conversion("capture requires a declared input shape".to_string())
    })
}
