//! Layer name resolver: maps a graph node's source tensors to the layer
//! name the node belongs to, for the catalogue lookup.

use crate::graph::{GraphNode, TensorSource};

/// Resolve a node to the layer name its weights belong to.
///
/// Iterates sources in order. For each source, the `blk` rule and the
/// three substring rules are mutually exclusive: a name that starts with
/// `"blk"` and contains at least one `.` takes the `blk` branch
/// exclusively — if it lacks a *second* `.` that branch still matches
/// nothing, but the other three rules are never tried against that same
/// name, and the resolver moves on to the next source. Only a name that
/// does *not* start with `"blk"` and contain a `.` falls into the
/// `output_norm`/`output`/`token_embd` substring chain.
///
/// Returns the empty string if no source matches.
pub fn resolve_layer_name<N: GraphNode>(node: &N) -> String {
    for src in node.sources() {
        let name = src.name();

        if name.starts_with("blk") && name.contains('.') {
            if let Some(blk_name) = blk_prefix(name) {
                return blk_name;
            }
            // Outer "blk" + has-a-dot condition matched, but there is no
            // second dot: this source is a non-match, and per the
            // original's if/else-if exclusivity the other three rules are
            // never tried against it.
            continue;
        }
        if name.contains("output_norm") {
            return "output_norm".to_string();
        }
        if name.contains("output") {
            return "output_weight".to_string();
        }
        if name.contains("token_embd") {
            return "token_embd".to_string();
        }
    }
    String::new()
}

/// If `name` has at least two dot-separated segments, return `"blk.<n>"`
/// (the prefix up to, but excluding, the second `.`). Otherwise `None`.
/// Callers must already have checked `name.starts_with("blk")`.
fn blk_prefix(name: &str) -> Option<String> {
    let first_dot = name.find('.')?;
    let second_dot = name[first_dot + 1..].find('.')? + first_dot + 1;
    Some(name[..second_dot].to_string())
}
