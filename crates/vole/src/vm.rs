// VM — compile Programs into instruction tapes and execute them.
//
// Rather than interpreting the graph node-by-node (HashMap lookups, OpKind
// matching per call), each graph is compiled once into a flat execution
// plan:
//
//   CompiledGraph — the plan for one graph: a Vec<Instruction> plus slot
//                   metadata
//   Instruction   — one operation with pre-resolved buffer slots
//   VmExecutor    — holds every compiled graph and runs "main"
//   CompileStats  — per-graph compilation statistics
//
// Buffer slots are a register analogy: every node gets a slot, instructions
// read and write slots by index, and a liveness pass inserts Free
// instructions so intermediates are dropped right after their last use.
//
// CALLING CONVENTION:
//
// Two binding paths feed a running graph. Positional locals carry the
// caller's arguments into LoadInput (the main graph's locals are resolved
// from the binding map by input name; subgraph locals come from If/Scan
// argument slots). The shared binding map also serves LoadParam by
// parameter name from any graph, so a Scan body reaches the model weights
// without threading them through the carry.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use tracing::debug;
use vole_core::{DType, Error, Result, Shape, Tensor};

use crate::graph::{Graph, OpKind, Program};

/// Unary operation variants (pre-dispatched).
#[derive(Debug, Clone, Copy)]
pub enum UnaryInstr {
    Neg,
    Tanh,
}

/// Binary operation variants (pre-dispatched).
#[derive(Debug, Clone, Copy)]
pub enum BinaryInstr {
    Add,
    Sub,
    Mul,
}

/// A single operation in a compiled execution plan.
///
/// Instructions carry pre-resolved buffer slot indices — no name lookups
/// at run time except for the two Load variants, which bridge to the
/// caller's bindings.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Load the caller's positional argument `index` into a slot.
    LoadInput {
        name: String,
        index: usize,
        dst: usize,
    },
    /// Load a named parameter from the shared binding map.
    LoadParam { name: String, dst: usize },
    /// Materialize a constant tensor.
    Constant {
        value: f64,
        shape: Shape,
        dtype: DType,
        dst: usize,
    },
    Unary {
        op: UnaryInstr,
        src: usize,
        dst: usize,
    },
    Binary {
        op: BinaryInstr,
        lhs: usize,
        rhs: usize,
        dst: usize,
    },
    /// Scalar comparison: dst = 1.0 if lhs > rhs else 0.0.
    Greater { lhs: usize, rhs: usize, dst: usize },
    /// Sum all elements to a scalar.
    SumAll { src: usize, dst: usize },
    /// Dense layer: dst = input @ weight^T (+ bias).
    Linear {
        input: usize,
        weight: usize,
        bias: Option<usize>,
        dst: usize,
    },
    /// Pass-through.
    Copy { src: usize, dst: usize },
    /// Branch on a scalar condition; runs one of two subgraphs with the
    /// argument slots as its positional locals.
    If {
        cond: usize,
        args: Vec<usize>,
        then_graph: String,
        else_graph: String,
        dst: usize,
    },
    /// Fold the body subgraph over dim 0 of xs, starting from init.
    Scan {
        xs: usize,
        init: usize,
        body_graph: String,
        dst: usize,
    },
    /// Drop a dead intermediate.
    Free { slot: usize },
}

/// Statistics from compiling one graph.
#[derive(Debug, Clone)]
pub struct CompileStats {
    pub num_instructions: usize,
    pub num_source_nodes: usize,
    pub num_slots: usize,
    pub num_frees: usize,
    pub compile_time_us: u64,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instructions ({} source nodes), {} slots, {} frees, compiled in {}μs",
            self.num_instructions,
            self.num_source_nodes,
            self.num_slots,
            self.num_frees,
            self.compile_time_us,
        )
    }
}

/// The compiled execution plan for a single graph.
#[derive(Debug)]
pub struct CompiledGraph {
    pub graph_name: String,
    /// Flat instruction tape — executed sequentially.
    pub instructions: Vec<Instruction>,
    /// Total number of buffer slots.
    pub num_slots: usize,
    /// Slot holding the graph's result after the tape runs.
    pub output_slot: usize,
    /// Positional input names, in call order.
    pub input_names: Vec<String>,
    /// Declared input shapes (None where the graph accepts any shape).
    pub input_shapes: Vec<Option<Shape>>,
    pub stats: CompileStats,
}

/// Compile a single graph into an execution plan.
pub fn compile_graph(graph: &Graph) -> Result<CompiledGraph> {
    let start = Instant::now();
    let order = graph.topo_order();

    // One slot per live node.
    let mut node_to_slot: HashMap<usize, usize> = HashMap::new();
    for (slot, &node_id) in order.iter().enumerate() {
        node_to_slot.insert(node_id.0, slot);
    }

    let external: HashSet<usize> = order
        .iter()
        .filter(|&&id| {
            matches!(
                graph.node(id).op,
                OpKind::Input | OpKind::Param | OpKind::Constant { .. }
            )
        })
        .map(|id| id.0)
        .collect();

    let mut instructions: Vec<Instruction> = Vec::with_capacity(order.len());
    let mut last_used_at: HashMap<usize, usize> = HashMap::new();

    for (instr_idx, &node_id) in order.iter().enumerate() {
        let node = graph.node(node_id);
        let dst = node_to_slot[&node_id.0];

        for &input_id in &node.inputs {
            last_used_at.insert(input_id.0, instr_idx);
        }

        let slot = |idx: usize| -> Result<usize> {
            let input_id = node.inputs.get(idx).ok_or_else(|| {
                Error::Compile(format!(
                    "node '{}' expected operand at index {}, has {}",
                    node.name,
                    idx,
                    node.inputs.len()
                ))
            })?;
            node_to_slot.get(&input_id.0).copied().ok_or_else(|| {
                Error::Compile(format!(
                    "node '{}' operand {} not in the slot map",
                    node.name, input_id.0
                ))
            })
        };

        let instr = match &node.op {
            OpKind::Input => {
                let index = graph
                    .inputs
                    .iter()
                    .position(|&id| id == node_id)
                    .ok_or_else(|| {
                        Error::Compile(format!("input node '{}' not in input list", node.name))
                    })?;
                Instruction::LoadInput {
                    name: node.name.clone(),
                    index,
                    dst,
                }
            }
            OpKind::Param => Instruction::LoadParam {
                name: node.name.clone(),
                dst,
            },
            OpKind::Constant { value, dtype } => Instruction::Constant {
                value: *value,
                shape: node.shape.clone().unwrap_or_else(|| Shape::from(())),
                dtype: *dtype,
                dst,
            },
            OpKind::Neg => Instruction::Unary {
                op: UnaryInstr::Neg,
                src: slot(0)?,
                dst,
            },
            OpKind::Tanh => Instruction::Unary {
                op: UnaryInstr::Tanh,
                src: slot(0)?,
                dst,
            },
            OpKind::Identity => Instruction::Copy { src: slot(0)?, dst },
            OpKind::Add => Instruction::Binary {
                op: BinaryInstr::Add,
                lhs: slot(0)?,
                rhs: slot(1)?,
                dst,
            },
            OpKind::Sub => Instruction::Binary {
                op: BinaryInstr::Sub,
                lhs: slot(0)?,
                rhs: slot(1)?,
                dst,
            },
            OpKind::Mul => Instruction::Binary {
                op: BinaryInstr::Mul,
                lhs: slot(0)?,
                rhs: slot(1)?,
                dst,
            },
            OpKind::Greater => Instruction::Greater {
                lhs: slot(0)?,
                rhs: slot(1)?,
                dst,
            },
            OpKind::SumAll => Instruction::SumAll { src: slot(0)?, dst },
            OpKind::Linear { bias } => Instruction::Linear {
                input: slot(0)?,
                weight: slot(1)?,
                bias: if *bias { Some(slot(2)?) } else { None },
                dst,
            },
            OpKind::If {
                then_graph,
                else_graph,
            } => {
                let args = (1..node.inputs.len())
                    .map(|i| slot(i))
                    .collect::<Result<Vec<_>>>()?;
                Instruction::If {
                    cond: slot(0)?,
                    args,
                    then_graph: then_graph.clone(),
                    else_graph: else_graph.clone(),
                    dst,
                }
            }
            OpKind::Scan { body_graph } => Instruction::Scan {
                xs: slot(0)?,
                init: slot(1)?,
                body_graph: body_graph.clone(),
                dst,
            },
        };
        instructions.push(instr);
    }

    // Liveness: free each intermediate right after its last consumer.
    // Outputs survive the tape; Input/Param/Constant slots are left alone
    // (params are shared handles, inputs belong to the caller).
    let mut free_points: Vec<(usize, usize)> = Vec::new();
    for (instr_idx, &node_id) in order.iter().enumerate() {
        if node_id == graph.output || external.contains(&node_id.0) {
            continue;
        }
        let last = last_used_at.get(&node_id.0).copied().unwrap_or(instr_idx);
        if last + 1 < instructions.len() {
            free_points.push((node_to_slot[&node_id.0], last));
        }
    }
    // Insert from latest to earliest so earlier positions stay valid.
    free_points.sort_by(|a, b| b.1.cmp(&a.1));
    let num_frees = free_points.len();
    for (slot, after_idx) in &free_points {
        instructions.insert(after_idx + 1, Instruction::Free { slot: *slot });
    }

    let output_slot = node_to_slot
        .get(&graph.output.0)
        .copied()
        .ok_or_else(|| Error::Compile(format!("graph '{}' output not scheduled", graph.name)))?;

    let input_names = graph
        .inputs
        .iter()
        .map(|&id| graph.node(id).name.clone())
        .collect();
    let input_shapes = graph
        .inputs
        .iter()
        .map(|&id| graph.node(id).shape.clone())
        .collect();

    let stats = CompileStats {
        num_instructions: instructions.len(),
        num_source_nodes: graph.nodes.len(),
        num_slots: order.len(),
        num_frees,
        compile_time_us: start.elapsed().as_micros() as u64,
    };

    Ok(CompiledGraph {
        graph_name: graph.name.clone(),
        instructions,
        num_slots: order.len(),
        output_slot,
        input_names,
        input_shapes,
        stats,
    })
}

/// Executes a compiled Program.
///
/// `evaluate` runs the entry graph against a binding map that holds the
/// model parameters and the named input tensor(s) together.
pub struct VmExecutor {
    graphs: HashMap<String, CompiledGraph>,
    main: String,
}

impl VmExecutor {
    /// Compile every graph in the program.
    pub fn compile(program: &Program) -> Result<Self> {
        let mut graphs = HashMap::new();
        for graph in &program.graphs {
            let compiled = compile_graph(graph)?;
            debug!(graph = %graph.name, stats = %compiled.stats, "compiled graph");
            graphs.insert(graph.name.clone(), compiled);
        }
        if !graphs.contains_key(&program.main) {
            return Err(Error::Compile(format!(
                "entry graph '{}' not found in program",
                program.main
            )));
        }
        // Every If/Scan target must resolve before anything runs.
        for compiled in graphs.values() {
            for instr in &compiled.instructions {
                let targets: Vec<&String> = match instr {
                    Instruction::If {
                        then_graph,
                        else_graph,
                        ..
                    } => vec![then_graph, else_graph],
                    Instruction::Scan { body_graph, .. } => vec![body_graph],
                    _ => continue,
                };
                for t in targets {
                    if !graphs.contains_key(t.as_str()) {
                        return Err(Error::Compile(format!(
                            "graph '{}' calls unknown subgraph '{}'",
                            compiled.graph_name, t
                        )));
                    }
                }
            }
        }
        Ok(VmExecutor {
            graphs,
            main: program.main.clone(),
        })
    }

    /// Compilation statistics for one graph, if it exists.
    pub fn stats(&self, graph_name: &str) -> Option<&CompileStats> {
        self.graphs.get(graph_name).map(|g| &g.stats)
    }

    /// Run the entry graph. The binding map must hold a tensor for every
    /// parameter and every named input of the entry graph.
    pub fn evaluate(&self, bindings: &HashMap<String, Tensor>) -> Result<Tensor> {
        let main = self
            .graphs
            .get(&self.main)
            .ok_or_else(|| Error::Compile(format!("entry graph '{}' missing", self.main)))?;
        let locals = main
            .input_names
            .iter()
            .map(|name| {
                bindings
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::MissingBinding { name: name.clone() })
            })
            .collect::<Result<Vec<_>>>()?;
        self.run(&self.main, &locals, bindings)
    }

    fn run(
        &self,
        graph_name: &str,
        locals: &[Tensor],
        bindings: &HashMap<String, Tensor>,
    ) -> Result<Tensor> {
        let graph = self
            .graphs
            .get(graph_name)
            .ok_or_else(|| Error::Compile(format!("unknown graph '{graph_name}'")))?;

        if locals.len() != graph.input_names.len() {
            return Err(Error::msg(format!(
                "graph '{}' takes {} inputs, got {}",
                graph_name,
                graph.input_names.len(),
                locals.len()
            )));
        }
        for (i, local) in locals.iter().enumerate() {
            if let Some(declared) = &graph.input_shapes[i] {
                if local.shape() != declared {
                    return Err(Error::ShapeMismatch {
                        expected: declared.clone(),
                        got: local.shape().clone(),
                    });
                }
            }
        }

        let mut slots: Vec<Option<Tensor>> = vec![None; graph.num_slots];

        for instr in &graph.instructions {
            match instr {
                Instruction::LoadInput { index, dst, .. } => {
                    slots[*dst] = Some(locals[*index].clone());
                }
                Instruction::LoadParam { name, dst } => {
                    let t = bindings
                        .get(name)
                        .cloned()
                        .ok_or_else(|| Error::MissingBinding { name: name.clone() })?;
                    slots[*dst] = Some(t);
                }
                Instruction::Constant {
                    value,
                    shape,
                    dtype,
                    dst,
                } => {
                    slots[*dst] = Some(Tensor::full(shape.clone(), *value, *dtype)?);
                }
                Instruction::Unary { op, src, dst } => {
                    let x = read(&slots, *src)?;
                    let y = match op {
                        UnaryInstr::Neg => x.neg()?,
                        UnaryInstr::Tanh => x.tanh()?,
                    };
                    slots[*dst] = Some(y);
                }
                Instruction::Binary { op, lhs, rhs, dst } => {
                    let a = read(&slots, *lhs)?;
                    let b = read(&slots, *rhs)?;
                    let y = match op {
                        BinaryInstr::Add => a.add(b)?,
                        BinaryInstr::Sub => a.sub(b)?,
                        BinaryInstr::Mul => a.mul(b)?,
                    };
                    slots[*dst] = Some(y);
                }
                Instruction::Greater { lhs, rhs, dst } => {
                    let a = read(&slots, *lhs)?.to_scalar()?;
                    let b = read(&slots, *rhs)?.to_scalar()?;
                    let v = if a > b { 1.0 } else { 0.0 };
                    slots[*dst] = Some(Tensor::full((), v, DType::F64)?);
                }
                Instruction::SumAll { src, dst } => {
                    slots[*dst] = Some(read(&slots, *src)?.sum_all()?);
                }
                Instruction::Linear {
                    input,
                    weight,
                    bias,
                    dst,
                } => {
                    let x = read(&slots, *input)?;
                    let w = read(&slots, *weight)?;
                    let mut y = x.matmul(&w.t()?)?;
                    if let Some(b) = bias {
                        y = y.add(read(&slots, *b)?)?;
                    }
                    slots[*dst] = Some(y);
                }
                Instruction::Copy { src, dst } => {
                    slots[*dst] = Some(read(&slots, *src)?.clone());
                }
                Instruction::If {
                    cond,
                    args,
                    then_graph,
                    else_graph,
                    dst,
                } => {
                    let taken = read(&slots, *cond)?.to_scalar()? != 0.0;
                    let call_locals = args
                        .iter()
                        .map(|&s| read(&slots, s).cloned())
                        .collect::<Result<Vec<_>>>()?;
                    let target = if taken { then_graph } else { else_graph };
                    slots[*dst] = Some(self.run(target, &call_locals, bindings)?);
                }
                Instruction::Scan {
                    xs,
                    init,
                    body_graph,
                    dst,
                } => {
                    let xs = read(&slots, *xs)?.clone();
                    let mut carry = read(&slots, *init)?.clone();
                    let steps = xs.shape().dim(0)?;
                    for t in 0..steps {
                        let x_t = xs.narrow(0, t, 1)?.squeeze(0)?;
                        carry = self.run(body_graph, &[x_t, carry], bindings)?;
                    }
                    slots[*dst] = Some(carry);
                }
                Instruction::Free { slot } => {
                    slots[*slot] = None;
                }
            }
        }

        slots[graph.output_slot]
            .take()
            .ok_or_else(|| Error::msg(format!("graph '{graph_name}' produced no output")))
    }

    /// Human-readable listing of every compiled tape, for debugging.
    pub fn dump(&self) -> String {
        let mut names: Vec<&String> = self.graphs.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            let g = &self.graphs[name];
            out.push_str(&format!("graph {} ({})\n", g.graph_name, g.stats));
            for (i, instr) in g.instructions.iter().enumerate() {
                out.push_str(&format!("  {i:>3}: {instr:?}\n"));
            }
        }
        out
    }
}

fn read(slots: &[Option<Tensor>], i: usize) -> Result<&Tensor> {
    slots
        .get(i)
        .and_then(|s| s.as_ref())
        .ok_or_else(|| Error::msg(format!("read of freed buffer slot {i}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn tanh_graph() -> Graph {
        let mut g = Graph::new("main");
        let x = g.add_node("x", OpKind::Input, vec![], None);
        let n = g.add_node("n", OpKind::Neg, vec![x], None);
        let t = g.add_node("t", OpKind::Tanh, vec![n], None);
        g.output = t;
        g
    }

    #[test]
    fn test_compile_counts() {
        let compiled = compile_graph(&tanh_graph()).unwrap();
        // LoadInput, Neg, Free(neg), Tanh — the neg intermediate dies after
        // the tanh consumes it, but tanh is the last instruction so no free
        // is inserted after it.
        assert_eq!(compiled.num_slots, 3);
        assert_eq!(compiled.stats.num_source_nodes, 3);
        assert!(compiled.stats.num_frees <= 1);
    }

    #[test]
    fn test_run_tape() {
        let g = tanh_graph();
        let program = Program {
            graphs: vec![g],
            main: "main".to_string(),
        };
        let vm = VmExecutor::compile(&program).unwrap();
        let mut bindings = HashMap::new();
        bindings.insert(
            "x".to_string(),
            Tensor::from_f64_slice(&[0.5], 1, DType::F64).unwrap(),
        );
        let out = vm.evaluate(&bindings).unwrap();
        assert_eq!(out.to_f64_vec().unwrap(), vec![(-0.5f64).tanh()]);
    }

    #[test]
    fn test_missing_binding() {
        let program = Program {
            graphs: vec![tanh_graph()],
            main: "main".to_string(),
        };
        let vm = VmExecutor::compile(&program).unwrap();
        let bindings = HashMap::new();
        assert!(matches!(
            vm.evaluate(&bindings),
            Err(Error::MissingBinding { .. })
        ));
    }

    #[test]
    fn test_unknown_subgraph_rejected() {
        let mut g = Graph::new("main");
        let x = g.add_node("x", OpKind::Input, vec![], None);
        let c = g.add_node("c", OpKind::SumAll, vec![x], None);
        let i = g.add_node(
            "i",
            OpKind::If {
                then_graph: "nope".to_string(),
                else_graph: "nada".to_string(),
            },
            vec![c, x],
            None,
        );
        g.output = i;
        let program = Program {
            graphs: vec![g],
            main: "main".to_string(),
        };
        assert!(matches!(
            VmExecutor::compile(&program),
            Err(Error::Compile(_))
        ));
    }

    #[test]
    fn test_declared_shape_enforced() {
        let mut g = Graph::new("main");
        let x = g.add_node("x", OpKind::Input, vec![], Some(Shape::from((2, 2))));
        g.output = x;
        let program = Program {
            graphs: vec![g],
            main: "main".to_string(),
        };
        let vm = VmExecutor::compile(&program).unwrap();
        let mut bindings = HashMap::new();
        bindings.insert("x".to_string(), Tensor::zeros((3, 3), DType::F64).unwrap());
        assert!(matches!(
            vm.evaluate(&bindings),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
