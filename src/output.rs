//! XML rendering of inference results.
//!
//! One `<proofgraph>` document per solution: timing, timeout flags,
//! requirement status, then the literals, explanations (chain edges), and
//! unifications with their active flags.

use crate::engine::InferenceResult;
use crate::fol::PredicateLibrary;
use crate::ilp::Solution;
use crate::pg::{EdgeType, NodeType};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;

/// Write every solution of `result` as a `<proofgraph>` document. The
/// library resolves predicate names for the literal texts.
pub fn write_solutions<W: Write>(
    out: W,
    library: &PredicateLibrary,
    result: &InferenceResult,
) -> quick_xml::Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    for solution in &result.solutions {
        write_proofgraph(&mut writer, library, result, solution)?;
    }
    Ok(())
}

fn write_proofgraph<W: Write>(
    writer: &mut Writer<W>,
    library: &PredicateLibrary,
    result: &InferenceResult,
    solution: &Solution,
) -> quick_xml::Result<()> {
    let graph = &result.graph;
    let problem = &result.problem;

    let mut root = BytesStart::new("proofgraph");
    root.push_attribute(("name", graph.name()));
    root.push_attribute(("state", kind_str(solution)));
    root.push_attribute(("objective", format!("{:.4}", solution.objective()).as_str()));
    writer.write_event(Event::Start(root))?;

    let mut time = BytesStart::new("time");
    time.push_attribute(("lhs", format!("{:.3}", result.times.lhs.as_secs_f64()).as_str()));
    time.push_attribute(("ilp", format!("{:.3}", result.times.ilp.as_secs_f64()).as_str()));
    time.push_attribute(("sol", format!("{:.3}", result.times.sol.as_secs_f64()).as_str()));
    writer.write_event(Event::Empty(time))?;

    let mut timeout = BytesStart::new("timeout");
    timeout.push_attribute(("lhs", bool_str(graph.is_timed_out())));
    timeout.push_attribute(("ilp", bool_str(problem.timed_out)));
    timeout.push_attribute(("sol", bool_str(solution.timed_out())));
    writer.write_event(Event::Empty(timeout))?;

    writer.write_event(Event::Start(BytesStart::new("requirements")))?;
    for &(node, violation) in problem.requirements() {
        let mut elem = BytesStart::new("requirement");
        elem.push_attribute(("node", node.to_string().as_str()));
        let satisfied = !solution.variable_active(violation);
        elem.push_attribute(("satisfied", bool_str(satisfied)));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(
            &graph.node(node).atom().display_with(library),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("requirement")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("requirements")))?;

    writer.write_event(Event::Start(BytesStart::new("literals")))?;
    for (i, node) in graph.nodes().iter().enumerate() {
        let mut elem = BytesStart::new("literal");
        elem.push_attribute(("id", i.to_string().as_str()));
        elem.push_attribute(("type", type_str(node.node_type())));
        elem.push_attribute(("depth", node.depth().to_string().as_str()));
        elem.push_attribute(("active", bool_str(solution.node_active(problem, i))));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(
            &node.atom().display_with(library),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("literal")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("literals")))?;

    writer.write_event(Event::Start(BytesStart::new("explanations")))?;
    for (e, edge) in graph.edges().iter().enumerate() {
        if !edge.is_chain_edge() {
            continue;
        }
        let mut elem = BytesStart::new("explanation");
        elem.push_attribute(("id", e.to_string().as_str()));
        elem.push_attribute((
            "kind",
            if edge.edge_type() == EdgeType::Hypothesize {
                "abduction"
            } else {
                "deduction"
            },
        ));
        if let Some(rule) = edge.rule() {
            elem.push_attribute(("rule", rule.to_string().as_str()));
        }
        elem.push_attribute(("tail", join_nodes(graph.hypernode(edge.tail())).as_str()));
        if let Some(head) = edge.head() {
            elem.push_attribute(("head", join_nodes(graph.hypernode(head)).as_str()));
        }
        elem.push_attribute(("active", bool_str(solution.edge_active(problem, e))));
        writer.write_event(Event::Empty(elem))?;
    }
    writer.write_event(Event::End(BytesEnd::new("explanations")))?;

    writer.write_event(Event::Start(BytesStart::new("unifications")))?;
    for (e, edge) in graph.edges().iter().enumerate() {
        if !edge.is_unify_edge() {
            continue;
        }
        let tail = graph.hypernode(edge.tail());
        let mut elem = BytesStart::new("unification");
        elem.push_attribute(("id", e.to_string().as_str()));
        elem.push_attribute(("l", tail.first().copied().unwrap_or(0).to_string().as_str()));
        elem.push_attribute(("r", tail.get(1).copied().unwrap_or(0).to_string().as_str()));
        elem.push_attribute(("active", bool_str(solution.edge_active(problem, e))));
        match edge.head() {
            Some(head) => {
                writer.write_event(Event::Start(elem))?;
                let subs: Vec<String> = graph
                    .hypernode(head)
                    .iter()
                    .map(|&n| graph.node(n).atom().display_with(library))
                    .collect();
                writer.write_event(Event::Text(BytesText::new(&subs.join(", "))))?;
                writer.write_event(Event::End(BytesEnd::new("unification")))?;
            }
            None => writer.write_event(Event::Empty(elem))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new("unifications")))?;

    writer.write_event(Event::End(BytesEnd::new("proofgraph")))?;
    Ok(())
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn kind_str(solution: &Solution) -> &'static str {
    match solution.kind() {
        crate::ilp::SolutionKind::Optimal => "optimal",
        crate::ilp::SolutionKind::SubOptimal => "sub-optimal",
        crate::ilp::SolutionKind::NotAvailable => "not-available",
    }
}

fn type_str(ntype: NodeType) -> &'static str {
    match ntype {
        NodeType::Observation => "observable",
        NodeType::Hypothesis => "hypothesis",
        NodeType::Required => "requirement",
    }
}

fn join_nodes(nodes: &[usize]) -> String {
    nodes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
