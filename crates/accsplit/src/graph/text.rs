//! Compact text form for graphs, used by tests and debug logging.
//!
//! ```text
//! graph @sin_cos(%a: tensor<f32, 4>) {
//!   %b = call sin(%a) : tensor<f32, 4>
//!   %c = call cos(%a) : tensor<f32, 4>
//!   %d = call add(%b, %c) : tensor<f32, 4>
//!   return %d
//! }
//! ```
//!
//! Values typed `opaque` carry no tensor metadata. Attribute reads are written
//! `%w = get_attr weight : tensor<f32, 4>`.

use std::fmt;

use super::{DType, Graph, GraphError, NodeId, OpKind, TensorMeta};

/// Parses a graph written in the compact text form.
///
/// # Example
/// ```
/// use accsplit::graph::text::parse_graph;
///
/// let graph = parse_graph(r#"
/// graph @neg(%x: tensor<f32, 2x2>) {
///   %y = call neg(%x) : tensor<f32, 2x2>
///   return %y
/// }
/// "#).expect("valid graph");
/// assert_eq!(graph.name, "neg");
/// assert_eq!(graph.callable_ids().count(), 1);
/// ```
pub fn parse_graph(src: &str) -> Result<Graph, GraphError> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Err(parse_error("input is empty"));
    }
    let header_end = trimmed
        .find('{')
        .ok_or_else(|| parse_error("missing `{` to start graph body"))?;
    let body_end = trimmed
        .rfind('}')
        .ok_or_else(|| parse_error("missing `}` to end graph body"))?;
    if body_end < header_end {
        return Err(parse_error("graph body is not closed"));
    }

    let (name, params) = parse_header(trimmed[..header_end].trim())?;
    let mut graph = Graph::new(name);
    for (param, meta) in params {
        graph.add_placeholder(param, meta)?;
    }

    let mut returned = false;
    for line in trimmed[header_end + 1..body_end].lines() {
        let statement = line.trim();
        if statement.is_empty() || statement.starts_with("//") {
            continue;
        }
        if returned {
            return Err(parse_error("statements after `return` are not allowed"));
        }
        if let Some(values) = statement.strip_prefix("return") {
            let results = split_top_level(values.trim(), ',')
                .into_iter()
                .map(|value| lookup(&graph, value))
                .collect::<Result<Vec<_>, _>>()?;
            graph.set_output(results)?;
            returned = true;
            continue;
        }
        parse_statement(&mut graph, statement)?;
    }

    if !returned {
        return Err(parse_error("graph body must end with a `return` statement"));
    }
    Ok(graph)
}

#[macro_export]
macro_rules! graph {
    ($src:expr) => {{
        $crate::graph::text::parse_graph($src).expect("failed to parse graph text")
    }};
}

type Parameter = (String, Option<TensorMeta>);

fn parse_header(header: &str) -> Result<(String, Vec<Parameter>), GraphError> {
    let header = header
        .strip_prefix("graph")
        .ok_or_else(|| parse_error("graph header must start with `graph`"))?
        .trim_start();
    let open = header
        .find('(')
        .ok_or_else(|| parse_error("missing `(` in graph header"))?;
    let close = header
        .rfind(')')
        .ok_or_else(|| parse_error("missing `)` to close parameter list"))?;
    if close < open {
        return Err(parse_error("malformed parameter list"));
    }
    let name = header[..open].trim().trim_start_matches('@').trim();
    if name.is_empty() {
        return Err(parse_error("graph name cannot be empty"));
    }

    let params = split_top_level(&header[open + 1..close], ',')
        .into_iter()
        .map(|decl| {
            let (name, ty) = decl
                .split_once(':')
                .ok_or_else(|| parse_error("parameter must be `%name: type`"))?;
            let name = normalize_value_name(name);
            if name.is_empty() {
                return Err(parse_error("parameter name cannot be empty"));
            }
            Ok((name, parse_type(ty)?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name.to_string(), params))
}

fn parse_statement(graph: &mut Graph, statement: &str) -> Result<(), GraphError> {
    let (result, rest) = statement
        .split_once('=')
        .ok_or_else(|| parse_error("statements must be of the form `%result = ...`"))?;
    let result = normalize_value_name(result);
    if result.is_empty() {
        return Err(parse_error("result identifier cannot be empty"));
    }
    let (expr, ty) = rest
        .rsplit_once(':')
        .ok_or_else(|| parse_error(format!("statement `{result}` is missing a type")))?;
    let meta = parse_type(ty)?;
    let expr = expr.trim();

    if let Some(target) = expr.strip_prefix("get_attr") {
        let target = target.trim();
        if target.is_empty() {
            return Err(parse_error("`get_attr` needs a target"));
        }
        graph.add_get_attr(result, target, meta)?;
        return Ok(());
    }

    let call = expr
        .strip_prefix("call")
        .ok_or_else(|| parse_error(format!("unknown statement kind in `{expr}`")))?
        .trim();
    let open = call
        .find('(')
        .ok_or_else(|| parse_error("call is missing `(`"))?;
    let args = call[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| parse_error("call is missing `)`"))?;
    let target = call[..open].trim();
    if target.is_empty() {
        return Err(parse_error("call target cannot be empty"));
    }
    let inputs = split_top_level(args, ',')
        .into_iter()
        .map(|arg| lookup(graph, arg))
        .collect::<Result<Vec<_>, _>>()?;
    graph.add_call(result, target, inputs, meta)?;
    Ok(())
}

fn parse_type(src: &str) -> Result<Option<TensorMeta>, GraphError> {
    let trimmed = src.trim();
    if trimmed == "opaque" {
        return Ok(None);
    }
    let body = trimmed
        .strip_prefix("tensor<")
        .and_then(|rest| rest.strip_suffix('>'))
        .ok_or_else(|| parse_error(format!("unsupported type `{trimmed}`")))?;
    let (dtype, dims) = match body.split_once(',') {
        Some((dtype, dims)) => (dtype, dims.trim()),
        None => (body, ""),
    };
    let dtype = DType::from_name(dtype)
        .ok_or_else(|| parse_error(format!("unsupported dtype `{}`", dtype.trim())))?;
    let shape = if dims.is_empty() {
        Vec::new()
    } else {
        dims.split('x')
            .map(|dim| {
                dim.trim()
                    .parse::<usize>()
                    .map_err(|_| parse_error(format!("invalid dimension `{dim}`")))
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(Some(TensorMeta::new(dtype, shape)))
}

fn lookup(graph: &Graph, raw: &str) -> Result<NodeId, GraphError> {
    let name = normalize_value_name(raw);
    graph
        .find(&name)
        .ok_or_else(|| parse_error(format!("unknown value `%{name}`")))
}

fn normalize_value_name(name: &str) -> String {
    name.trim().trim_start_matches('%').to_string()
}

fn split_top_level(input: &str, delimiter: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if c == delimiter && depth == 0 => {
                let piece = input[start..idx].trim();
                if !piece.is_empty() {
                    pieces.push(piece);
                }
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        pieces.push(tail);
    }
    pieces
}

fn parse_error(msg: impl Into<String>) -> GraphError {
    GraphError::Parse(msg.into())
}

struct TypeText<'a>(&'a Option<TensorMeta>);

impl fmt::Display for TypeText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(meta) = self.0 else {
            return f.write_str("opaque");
        };
        if meta.shape.is_empty() {
            return write!(f, "tensor<{}>", meta.dtype);
        }
        let dims = meta
            .shape
            .iter()
            .map(|dim| dim.to_string())
            .collect::<Vec<_>>()
            .join("x");
        write!(f, "tensor<{}, {}>", meta.dtype, dims)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .iter()
            .filter(|(_, node)| node.op == OpKind::Placeholder)
            .map(|(_, node)| format!("%{}: {}", node.name, TypeText(&node.meta)))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "graph @{}({}) {{", self.name, params)?;

        let value_list = |ids: &[NodeId]| {
            ids.iter()
                .map(|id| format!("%{}", self.node(*id).name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        for (_, node) in self.iter() {
            match node.op {
                OpKind::Placeholder => {}
                OpKind::GetAttr => writeln!(
                    f,
                    "  %{} = get_attr {} : {}",
                    node.name,
                    node.target,
                    TypeText(&node.meta)
                )?,
                OpKind::Call => writeln!(
                    f,
                    "  %{} = call {}({}) : {}",
                    node.name,
                    node.target,
                    value_list(&node.inputs),
                    TypeText(&node.meta)
                )?,
                OpKind::Output => writeln!(f, "  return {}", value_list(&node.inputs))?,
            }
        }
        write!(f, "}}")
    }
}
