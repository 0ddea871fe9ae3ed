//! Placeholder counting and argument matching.

use crate::{
    error::{QueryError, QueryResult},
    template::{Node, Template},
    value::Bindings,
};

/// Counts the `"?"` leaves under a list of object entries.
///
/// Objects are walked recursively, as are objects held in arrays. Scalars held
/// directly in arrays have no key to be named after and are not counted.
pub fn count_placeholders(entries: &[(String, Node)]) -> usize {
    entries
        .iter()
        .map(|(_, node)| count_node(node))
        .sum()
}

fn count_node(node: &Node) -> usize {
    match node {
        Node::Placeholder => 1,
        Node::Object(entries) => count_placeholders(entries),
        Node::Array(items) => items
            .iter()
            .filter_map(Node::as_object)
            .map(count_placeholders)
            .sum(),
        Node::Scalar(_) => 0,
    }
}

/// Returns `true` iff the binding count equals the template's placeholder count.
pub fn match_arguments(template: &Template, bindings: &Bindings) -> bool {
    count_placeholders(template.entries()) == bindings.len()
}

/// Fails with [`QueryError::ParameterCountMismatch`] unless [`match_arguments`] holds.
pub fn ensure_arguments(template: &Template, bindings: &Bindings) -> QueryResult<()> {
    let placeholders = count_placeholders(template.entries());

    if placeholders != bindings.len() {
        return Err(QueryError::ParameterCountMismatch {
            placeholders,
            bindings: bindings.len(),
        });
    }

    Ok(())
}
