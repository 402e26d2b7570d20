//! SQL backend for the filter DSL. Compilation emits parameterized SQL
//! text; literal values never reach the SQL string, they land in a
//! parameter map keyed by the generated `@P{n}` placeholders.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::debug;

use crate::ast::AstValue;
use crate::error::{Error, SemanticError, SyntaxError};
use crate::filter::{strip_quotes, token_value, CompareOp, FilterMode, FilterParser};
use crate::types::{resolve_column, ParamValue};
use crate::visitor::Visitor;

/// Compilation output plus the parameter numbering shared across calls.
/// Reusing one state for several compilations keeps `@P{n}` placeholders
/// unique across all of them.
#[derive(Debug, Default)]
pub struct SqlFilterState {
    /// Values for every placeholder emitted so far.
    pub parameters: HashMap<String, ParamValue>,
    /// Result of the most recent compilation: a `WHERE ...` clause in
    /// filter mode, a comma-separated placeholder list in params mode.
    pub sql: String,
    predicates: Vec<String>,
    positional: BTreeMap<usize, String>,
}

impl SqlFilterState {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_param(&mut self) -> String {
        format!("P{}", self.parameters.len())
    }

    fn pop_fragments(&mut self, n: usize) -> Vec<String> {
        let at = self.predicates.len().saturating_sub(n);
        self.predicates.split_off(at)
    }
}

/// Compiles a filter expression to SQL against the given column set. The
/// result lands in `state.sql` and `state.parameters`.
pub fn compile(
    parser: &FilterParser,
    input: &str,
    columns: &[&str],
    state: &mut SqlFilterState,
) -> Result<(), Error> {
    let node = parser.parse(input)?;
    let columns: Rc<Vec<String>> = Rc::new(columns.iter().map(|c| c.to_string()).collect());
    state.positional.clear();
    build_visitor(parser.mode(), columns).visit(&node, state)?;
    debug!(sql = %state.sql, params = state.parameters.len(), "filter compiled");
    Ok(())
}

fn visit_children(
    visitor: &Visitor<SqlFilterState>,
    items: &[AstValue],
    state: &mut SqlFilterState,
) -> Result<(), Error> {
    for item in items {
        let AstValue::Node(child) = item else {
            return Err(SyntaxError::MalformedTree.into());
        };
        visitor.visit(child, state)?;
    }
    Ok(())
}

fn build_visitor(mode: FilterMode, columns: Rc<Vec<String>>) -> Visitor<SqlFilterState> {
    let mut visitor = Visitor::new();

    visitor.on("search_condition", move |v, node, state: &mut SqlFilterState| {
        let items = node.list("OR").ok_or(SyntaxError::MalformedTree)?;
        visit_children(v, items, state)?;
        match mode {
            FilterMode::Filter => {
                let joined = state.pop_fragments(items.len()).join(" OR ");
                state.sql = format!("WHERE {joined}");
                state.predicates.push(joined);
            }
            FilterMode::Params => {
                state.sql = state
                    .positional
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ");
            }
        }
        Ok(())
    });

    visitor.on("boolean_term", move |v, node, state: &mut SqlFilterState| {
        let items = node.list("AND").ok_or(SyntaxError::MalformedTree)?;
        visit_children(v, items, state)?;
        if mode == FilterMode::Filter {
            let joined = state.pop_fragments(items.len()).join(" AND ");
            state.predicates.push(joined);
        }
        Ok(())
    });

    // Only the parenthesized alternative produces a boolean_primary node;
    // the others pass their predicate straight through.
    visitor.on("boolean_primary", |v, node, state: &mut SqlFilterState| {
        if let Some(condition) = node.node("CONDITION") {
            v.visit(condition, state)?;
            let inner = state.predicates.pop().ok_or(SyntaxError::MalformedTree)?;
            state.predicates.push(format!("({inner})"));
        }
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("comparison_predicate", move |_, node, state: &mut SqlFilterState| {
        let op_token = node.token("OPERATOR").ok_or(SyntaxError::MalformedTree)?;
        let op = CompareOp::from_token(&op_token.name)
            .filter(|op| op.allowed_in(mode))
            .ok_or_else(|| SemanticError::OperatorNotAllowed(op_token.value.clone()))?;
        let lhv = token_value(node, "LHV")?;
        let (index, _) = resolve_column(&cols, &lhv)?;
        let value = strip_quotes(&token_value(node, "RHV")?);
        let param = state.next_param();
        match mode {
            FilterMode::Filter => {
                state.predicates.push(format!("{lhv} {} @{param}", op.sql()));
            }
            FilterMode::Params => {
                state.positional.insert(index, format!("@{param}"));
            }
        }
        state.parameters.insert(param, ParamValue::Scalar(value));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("in_predicate", move |_, node, state: &mut SqlFilterState| {
        if mode == FilterMode::Params {
            return Err(SemanticError::NotSupportedForParams("IN").into());
        }
        let lhv = token_value(node, "LHV")?;
        resolve_column(&cols, &lhv)?;
        let values: Vec<String> = node
            .list("RHV")
            .ok_or(SyntaxError::MalformedTree)?
            .iter()
            .filter_map(AstValue::as_token)
            .map(|t| strip_quotes(&t.value))
            .collect();
        let keyword = if node.has("NOT") { "NOT IN" } else { "IN" };
        let param = state.next_param();
        state.predicates.push(format!("{lhv} {keyword} @{param}"));
        state.parameters.insert(param, ParamValue::List(values));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("between_predicate", move |_, node, state: &mut SqlFilterState| {
        if mode == FilterMode::Params {
            return Err(SemanticError::NotSupportedForParams("BETWEEN").into());
        }
        let lhv = token_value(node, "LHV")?;
        resolve_column(&cols, &lhv)?;
        let low = strip_quotes(&token_value(node, "OP1")?);
        let high = strip_quotes(&token_value(node, "OP2")?);
        let keyword = if node.has("NOT") { "NOT BETWEEN" } else { "BETWEEN" };
        let p_low = state.next_param();
        state.parameters.insert(p_low.clone(), ParamValue::Scalar(low));
        let p_high = state.next_param();
        state.parameters.insert(p_high.clone(), ParamValue::Scalar(high));
        state
            .predicates
            .push(format!("{lhv} {keyword} @{p_low} AND @{p_high}"));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("contains_predicate", move |_, node, state: &mut SqlFilterState| {
        if mode == FilterMode::Params {
            return Err(SemanticError::NotSupportedForParams("CONTAINS").into());
        }
        let lhv = token_value(node, "LHV")?;
        resolve_column(&cols, &lhv)?;
        let value = format!("%{}%", strip_quotes(&token_value(node, "RHV")?));
        let keyword = if node.has("NOT") { "NOT LIKE" } else { "LIKE" };
        let param = state.next_param();
        state.predicates.push(format!("{lhv} {keyword} @{param}"));
        state.parameters.insert(param, ParamValue::Scalar(value));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("blank_predicate", move |_, node, state: &mut SqlFilterState| {
        if mode == FilterMode::Params {
            return Err(SemanticError::NotSupportedForParams("ISBLANK").into());
        }
        let lhv = token_value(node, "LHV")?;
        resolve_column(&cols, &lhv)?;
        let keyword = if node.has("NOT") { "IS NOT NULL" } else { "IS NULL" };
        state.predicates.push(format!("{lhv} {keyword}"));
        Ok(())
    });

    visitor
}
