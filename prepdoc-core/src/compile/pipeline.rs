//! Aggregation pipeline compilation and lookup layout.

use bson::{Bson, Document, doc};
use tracing::debug;

use crate::{
    error::{QueryError, QueryResult},
    fields::{
        CASE_INSENSITIVE_OPTION, DEPENDENCY_FIELD, GROUP_FIELD, LIMIT_FIELD, LOOKUP_ALIAS_FIELD,
        LOOKUP_FIELD, MATCH_FIELD, OPTIONS_FIELD, PROJECT_FIELD, REGEX_FIELD, SORT_FIELD,
        UNWIND_FIELD, USER_NAME_FIELD, is_lookup_key, is_unwind_key,
    },
    options::{LookupMode, StatementOptions},
    template::{Node, Template, find_entry},
    value::Bindings,
};

use super::{CompiledPipeline, Resolver};

/// Compiles an aggregation template into an ordered pipeline.
///
/// Stages are emitted as `$limit`, `$lookup`, `$unwind`, `$match`, `$sort`,
/// `$group`, `$project`, whatever their order in the template. Empty stages
/// are left out.
pub fn compile_pipeline(
    template: &Template,
    bindings: &Bindings,
    options: &StatementOptions,
) -> QueryResult<CompiledPipeline> {
    let collection = template
        .collection()
        .ok_or(QueryError::NoCollection)?
        .to_string();
    let resolver = Resolver::new(bindings, options.placeholders);
    let mode = options.lookup_mode_for(template);

    let mut parts = PipelineParts::default();

    for (key, node) in template.body() {
        if key == LIMIT_FIELD {
            parts.limit = resolve_limit(resolver, node)?;
        } else if is_lookup_key(key) {
            parts.lookups.push(LookupStage::compile(resolver, key, node)?);
        } else if is_unwind_key(key) {
            if let Some(unwind) = resolver.resolve_node(key, node)? {
                parts.unwinds.push(unwind);
            }
        } else if key == PROJECT_FIELD {
            parts.project = stage_body(resolver, key, node)?;
        } else if key == SORT_FIELD {
            parts.sort = stage_body(resolver, key, node)?;
        } else if key == GROUP_FIELD {
            parts.group = stage_body(resolver, key, node)?;
        } else {
            parts.add_match(resolver, key, node)?;
        }
    }

    debug!(
        collection = collection.as_str(),
        ?mode,
        lookups = parts.lookups.len(),
        unwinds = parts.unwinds.len(),
        "assembling pipeline"
    );

    Ok(CompiledPipeline {
        collection,
        stages: parts.into_stages(mode),
    })
}

fn stage_body(resolver: Resolver<'_>, key: &str, node: &Node) -> QueryResult<Document> {
    match node {
        Node::Object(entries) => resolver.resolve_entries(entries),
        _ => Err(QueryError::MalformedTemplate(format!(
            "{key} stage must be an object"
        ))),
    }
}

/// Resolves `$limit` from a numeric literal or from the `$limit` binding.
fn resolve_limit(resolver: Resolver<'_>, node: &Node) -> QueryResult<Option<i64>> {
    let limit = match node {
        Node::Scalar(Bson::Int32(value)) => i64::from(*value),
        Node::Scalar(Bson::Int64(value)) => *value,
        Node::Scalar(Bson::Double(value)) if value.fract() == 0.0 => *value as i64,
        Node::Scalar(Bson::String(value))
            if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) =>
        {
            value
                .parse()
                .map_err(|_| QueryError::InvalidLimit(value.clone()))?
        }
        Node::Placeholder | Node::Scalar(Bson::String(_)) => match resolver.lookup(LIMIT_FIELD) {
            Some(bound) => bound
                .as_limit()
                .ok_or_else(|| QueryError::InvalidLimit(format!("{:?}", bound)))?,
            None => {
                resolver.unbound(LIMIT_FIELD, node)?;
                return Ok(None);
            }
        },
        other => return Err(QueryError::InvalidLimit(format!("{:?}", other.to_bson()))),
    };

    if limit <= 0 {
        return Err(QueryError::InvalidLimit(limit.to_string()));
    }

    Ok(Some(limit))
}

#[derive(Debug, Clone)]
struct LookupStage {
    body: Document,
    alias: Option<String>,
    dependent: bool,
}

impl LookupStage {
    fn compile(resolver: Resolver<'_>, key: &str, node: &Node) -> QueryResult<Self> {
        let mut body = stage_body(resolver, key, node)?;
        let dependent = body.remove(DEPENDENCY_FIELD).is_some();
        let alias = body
            .get_str(LOOKUP_ALIAS_FIELD)
            .ok()
            .map(str::to_string);

        Ok(Self { body, alias, dependent })
    }

    fn to_stage(&self) -> Document {
        doc! { LOOKUP_FIELD: self.body.clone() }
    }
}

#[derive(Debug, Default)]
struct PipelineParts {
    limit: Option<i64>,
    lookups: Vec<LookupStage>,
    unwinds: Vec<Bson>,
    matched: Document,
    match_case_insensitive: Document,
    sort: Document,
    group: Document,
    project: Document,
}

impl PipelineParts {
    /// Adds a `$match` body. Non-object values are matched under their own key.
    fn add_match(&mut self, resolver: Resolver<'_>, key: &str, node: &Node) -> QueryResult<()> {
        match node {
            Node::Object(entries) => {
                for (element, value) in entries {
                    self.match_element(resolver, element, value)?;
                }
                Ok(())
            }
            other => self.match_element(resolver, key, other),
        }
    }

    fn match_element(&mut self, resolver: Resolver<'_>, element: &str, node: &Node) -> QueryResult<()> {
        match node {
            Node::Object(inner) => match find_entry(inner, REGEX_FIELD) {
                Some(pattern) => {
                    let bound = resolver
                        .lookup(element)
                        .or_else(|| resolver.lookup(REGEX_FIELD));

                    match bound {
                        Some(value) if value.is_filter_operator() => Ok(()),
                        Some(value) => {
                            self.match_case_insensitive
                                .insert(REGEX_FIELD, value.to_bson());
                            self.match_case_insensitive
                                .insert(OPTIONS_FIELD, CASE_INSENSITIVE_OPTION);
                            Ok(())
                        }
                        None => resolver.unbound(REGEX_FIELD, pattern),
                    }
                }
                None => {
                    let resolved = match resolver.lookup(element) {
                        Some(value) => value.to_bson(),
                        None => Bson::Document(resolver.resolve_entries(inner)?),
                    };
                    if resolved != Bson::Document(Document::new()) {
                        self.matched.insert(element, resolved);
                    }
                    Ok(())
                }
            },
            _ => match resolver.lookup(element) {
                Some(value) if value.is_filter_operator() => Ok(()),
                Some(value) => {
                    self.matched.insert(element, value.to_bson());
                    Ok(())
                }
                None => resolver.unbound(element, node),
            },
        }
    }

    fn into_stages(self, mode: LookupMode) -> Vec<Document> {
        let mut stages = Vec::new();

        if let Some(limit) = self.limit {
            stages.push(doc! { LIMIT_FIELD: limit });
        }

        let orphans = match mode {
            LookupMode::Single => {
                stages.extend(self.lookups.iter().map(LookupStage::to_stage));
                self.unwinds
            }
            LookupMode::Interleaved => interleave(self.lookups, self.unwinds, &mut stages),
        };

        stages.extend(
            orphans
                .into_iter()
                .map(|unwind| doc! { UNWIND_FIELD: unwind }),
        );

        if !self.matched.is_empty() || !self.match_case_insensitive.is_empty() {
            let mut matched = self.matched;
            if !self.match_case_insensitive.is_empty() {
                matched.insert(USER_NAME_FIELD, self.match_case_insensitive);
            }
            stages.push(doc! { MATCH_FIELD: matched });
        }

        for (operator, body) in [
            (SORT_FIELD, self.sort),
            (GROUP_FIELD, self.group),
            (PROJECT_FIELD, self.project),
        ] {
            if !body.is_empty() {
                stages.push(doc! { operator: body });
            }
        }

        stages
    }
}

/// Emits lookups interleaved with the unwinds of their aliases.
///
/// A lookup is followed by every pending unwind targeting `"$" + as`. A
/// dependent lookup is preceded by those unwinds instead; met before any lookup
/// has been emitted, it drops its marker and is retried on the next scan.
/// Returns the unwinds no lookup claimed.
fn interleave(lookups: Vec<LookupStage>, unwinds: Vec<Bson>, stages: &mut Vec<Document>) -> Vec<Bson> {
    let mut claimed = vec![false; unwinds.len()];
    let mut emitted = 0usize;
    let mut pending = lookups;

    while !pending.is_empty() {
        let mut deferred = Vec::new();

        for mut lookup in pending {
            let stage = lookup.to_stage();
            if stages.contains(&stage) {
                continue;
            }

            if lookup.dependent && emitted == 0 {
                lookup.dependent = false;
                deferred.push(lookup);
                continue;
            }

            let unwind_stages = claim_unwinds(&unwinds, &mut claimed, lookup.alias.as_deref());
            if lookup.dependent {
                stages.extend(unwind_stages);
                stages.push(stage);
            } else {
                stages.push(stage);
                stages.extend(unwind_stages);
            }
            emitted += 1;
        }

        pending = deferred;
    }

    unwinds
        .into_iter()
        .zip(claimed)
        .filter(|(_, claimed)| !claimed)
        .map(|(unwind, _)| unwind)
        .collect()
}

fn claim_unwinds(unwinds: &[Bson], claimed: &mut [bool], alias: Option<&str>) -> Vec<Document> {
    let Some(alias) = alias else {
        return Vec::new();
    };
    let target = format!("${alias}");

    unwinds
        .iter()
        .zip(claimed.iter_mut())
        .filter(|(unwind, claimed)| !**claimed && unwinds_path(unwind, &target))
        .map(|(unwind, claimed)| {
            *claimed = true;
            doc! { UNWIND_FIELD: unwind.clone() }
        })
        .collect()
}

/// Returns `true` if an `$unwind` body (path string or options object) targets `path`.
fn unwinds_path(unwind: &Bson, path: &str) -> bool {
    match unwind {
        Bson::String(s) => s == path,
        Bson::Document(options) => options
            .values()
            .any(|value| matches!(value, Bson::String(s) if s == path)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(alias: &str, dependent: bool) -> LookupStage {
        LookupStage {
            body: doc! { "from": alias, "localField": "id", "foreignField": "id", "as": alias },
            alias: Some(alias.to_string()),
            dependent,
        }
    }

    #[test]
    fn dependent_lookup_follows_its_unwind() {
        let mut stages = Vec::new();
        let orphans = interleave(
            vec![lookup("a", false), lookup("b", true)],
            vec![Bson::String("$a".into()), Bson::String("$b".into())],
            &mut stages,
        );

        assert!(orphans.is_empty());
        assert_eq!(
            stages,
            vec![
                lookup("a", false).to_stage(),
                doc! { "$unwind": "$a" },
                doc! { "$unwind": "$b" },
                lookup("b", false).to_stage(),
            ]
        );
    }

    #[test]
    fn leading_dependent_lookup_is_retried_as_independent() {
        let mut stages = Vec::new();
        interleave(
            vec![lookup("b", true), lookup("a", false)],
            vec![Bson::String("$b".into())],
            &mut stages,
        );

        assert_eq!(
            stages,
            vec![
                lookup("a", false).to_stage(),
                lookup("b", false).to_stage(),
                doc! { "$unwind": "$b" },
            ]
        );
    }

    #[test]
    fn unclaimed_unwinds_are_returned() {
        let mut stages = Vec::new();
        let orphans = interleave(
            vec![lookup("a", false)],
            vec![doc! { "path": "$a" }.into(), Bson::String("$tags".into())],
            &mut stages,
        );

        assert_eq!(orphans, vec![Bson::String("$tags".into())]);
        assert_eq!(stages[1], doc! { "$unwind": { "path": "$a" } });
    }

    #[test]
    fn identical_lookups_are_emitted_once() {
        let mut stages = Vec::new();
        interleave(vec![lookup("a", false), lookup("a", false)], Vec::new(), &mut stages);

        assert_eq!(stages.len(), 1);
    }
}
