//! In-memory backend for the filter DSL. Compilation produces a closure
//! over rows of dynamically typed values; literals are compared in the
//! cell's own type, and a null or missing cell never matches a comparison.

use std::rc::Rc;

use tracing::debug;

use crate::ast::AstValue;
use crate::error::{Error, SemanticError, SyntaxError};
use crate::filter::{strip_quotes, token_value, CompareOp, FilterMode, FilterParser};
use crate::types::{resolve_column, Row, Value};
use crate::visitor::Visitor;

pub type Predicate = Box<dyn Fn(&Row) -> bool>;

#[derive(Default)]
struct PredicateState {
    stack: Vec<Predicate>,
}

impl PredicateState {
    fn pop_children(&mut self, n: usize) -> Vec<Predicate> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }
}

/// Compiles a filter expression into a row predicate.
pub fn compile(parser: &FilterParser, input: &str, columns: &[&str]) -> Result<Predicate, Error> {
    if parser.mode() == FilterMode::Params {
        return Err(SemanticError::ParamsUnsupported.into());
    }
    let node = parser.parse(input)?;
    let columns: Rc<Vec<String>> = Rc::new(columns.iter().map(|c| c.to_string()).collect());
    let mut state = PredicateState::default();
    build_visitor(columns).visit(&node, &mut state)?;
    debug!("filter predicate compiled");
    state
        .stack
        .pop()
        .ok_or_else(|| SyntaxError::MalformedTree.into())
}

fn visit_children(
    visitor: &Visitor<PredicateState>,
    items: &[AstValue],
    state: &mut PredicateState,
) -> Result<(), Error> {
    for item in items {
        let AstValue::Node(child) = item else {
            return Err(SyntaxError::MalformedTree.into());
        };
        visitor.visit(child, state)?;
    }
    Ok(())
}

fn compare(op: CompareOp, cell: &Value, literal: &str) -> bool {
    use std::cmp::Ordering;
    match cell.compare_literal(literal) {
        Some(ord) => match op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        },
        None => false,
    }
}

fn build_visitor(columns: Rc<Vec<String>>) -> Visitor<PredicateState> {
    let mut visitor = Visitor::new();

    visitor.on("search_condition", |v, node, state: &mut PredicateState| {
        let items = node.list("OR").ok_or(SyntaxError::MalformedTree)?;
        visit_children(v, items, state)?;
        let children = state.pop_children(items.len());
        state
            .stack
            .push(Box::new(move |row| children.iter().any(|p| p(row))));
        Ok(())
    });

    visitor.on("boolean_term", |v, node, state: &mut PredicateState| {
        let items = node.list("AND").ok_or(SyntaxError::MalformedTree)?;
        visit_children(v, items, state)?;
        let children = state.pop_children(items.len());
        state
            .stack
            .push(Box::new(move |row| children.iter().all(|p| p(row))));
        Ok(())
    });

    visitor.on("boolean_primary", |v, node, state: &mut PredicateState| {
        if let Some(condition) = node.node("CONDITION") {
            v.visit(condition, state)?;
        }
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("comparison_predicate", move |_, node, state: &mut PredicateState| {
        let op_token = node.token("OPERATOR").ok_or(SyntaxError::MalformedTree)?;
        let op = CompareOp::from_token(&op_token.name)
            .ok_or_else(|| SemanticError::OperatorNotAllowed(op_token.value.clone()))?;
        let (_, column) = resolve_column(&cols, &token_value(node, "LHV")?)?;
        let literal = strip_quotes(&token_value(node, "RHV")?);
        state.stack.push(Box::new(move |row| {
            row.get(&column)
                .is_some_and(|cell| compare(op, cell, &literal))
        }));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("in_predicate", move |_, node, state: &mut PredicateState| {
        let (_, column) = resolve_column(&cols, &token_value(node, "LHV")?)?;
        let values: Vec<String> = node
            .list("RHV")
            .ok_or(SyntaxError::MalformedTree)?
            .iter()
            .filter_map(AstValue::as_token)
            .map(|t| strip_quotes(&t.value))
            .collect();
        let negated = node.has("NOT");
        state.stack.push(Box::new(move |row| {
            let hit = row.get(&column).is_some_and(|cell| {
                values.iter().any(|v| compare(CompareOp::Eq, cell, v))
            });
            hit != negated
        }));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("between_predicate", move |_, node, state: &mut PredicateState| {
        let (_, column) = resolve_column(&cols, &token_value(node, "LHV")?)?;
        let low = strip_quotes(&token_value(node, "OP1")?);
        let high = strip_quotes(&token_value(node, "OP2")?);
        let negated = node.has("NOT");
        state.stack.push(Box::new(move |row| {
            let hit = row.get(&column).is_some_and(|cell| {
                compare(CompareOp::Ge, cell, &low) && compare(CompareOp::Le, cell, &high)
            });
            hit != negated
        }));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("contains_predicate", move |_, node, state: &mut PredicateState| {
        let (_, column) = resolve_column(&cols, &token_value(node, "LHV")?)?;
        let needle = strip_quotes(&token_value(node, "RHV")?);
        let negated = node.has("NOT");
        state.stack.push(Box::new(move |row| {
            let hit = row
                .get(&column)
                .is_some_and(|cell| !cell.is_blank() && cell.render().contains(&needle));
            hit != negated
        }));
        Ok(())
    });

    let cols = Rc::clone(&columns);
    visitor.on("blank_predicate", move |_, node, state: &mut PredicateState| {
        let (_, column) = resolve_column(&cols, &token_value(node, "LHV")?)?;
        let negated = node.has("NOT");
        state.stack.push(Box::new(move |row| {
            let blank = row.get(&column).is_none_or(|cell| cell.is_blank());
            blank != negated
        }));
        Ok(())
    });

    visitor
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[&str] = &["ID", "NAME", "AMOUNT", "CITY"];

    fn row(id: i64, name: &str, amount: f64, city: Value) -> Row {
        Row::from([
            ("ID".to_string(), Value::Int(id)),
            ("NAME".to_string(), Value::from(name)),
            ("AMOUNT".to_string(), Value::Float(amount)),
            ("CITY".to_string(), city),
        ])
    }

    fn rows() -> Vec<Row> {
        vec![
            row(1, "alice", 12.5, Value::from("lyon")),
            row(2, "bob", 40.0, Value::Null),
            row(3, "carol", 7.0, Value::from("")),
        ]
    }

    fn matching(input: &str) -> Vec<i64> {
        let parser = FilterParser::new(FilterMode::Filter).unwrap();
        let predicate = compile(&parser, input, COLUMNS).unwrap();
        rows()
            .iter()
            .filter(|r| predicate(r))
            .map(|r| match r.get("ID") {
                Some(Value::Int(i)) => *i,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn comparisons_are_typed() {
        assert_eq!(matching("AMOUNT GT 10"), vec![1, 2]);
        assert_eq!(matching("NAME EQ 'bob'"), vec![2]);
        assert_eq!(matching("ID LE 2"), vec![1, 2]);
    }

    #[test]
    fn boolean_composition() {
        assert_eq!(matching("NAME EQ 'alice' OR AMOUNT GT 30"), vec![1, 2]);
        assert_eq!(matching("AMOUNT GT 10 AND ID EQ 2"), vec![2]);
        assert_eq!(
            matching("ID EQ 3 OR (AMOUNT GT 10 AND NAME CONTAINS 'li')"),
            vec![1, 3]
        );
    }

    #[test]
    fn membership_and_ranges() {
        assert_eq!(matching("NAME IN ('alice', 'carol')"), vec![1, 3]);
        assert_eq!(matching("NAME NOT IN ('alice', 'carol')"), vec![2]);
        assert_eq!(matching("AMOUNT BETWEEN 7 AND 13"), vec![1, 3]);
        assert_eq!(matching("AMOUNT NOT BETWEEN 7 AND 13"), vec![2]);
    }

    #[test]
    fn substring_matching() {
        assert_eq!(matching("NAME CONTAINS 'o'"), vec![2, 3]);
        assert_eq!(matching("NAME NOT CONTAINS 'o'"), vec![1]);
        // null cells never contain anything
        assert_eq!(matching("CITY CONTAINS 'lyon'"), vec![1]);
    }

    #[test]
    fn blankness_covers_null_and_empty() {
        assert_eq!(matching("CITY ISBLANK"), vec![2, 3]);
        assert_eq!(matching("CITY NOT ISBLANK"), vec![1]);
    }

    #[test]
    fn null_cells_never_match_comparisons() {
        assert_eq!(matching("CITY EQ 'lyon'"), vec![1]);
        // the null city on row 2 fails NE as well
        assert_eq!(matching("CITY NE 'lyon'"), vec![3]);
    }

    #[test]
    fn params_mode_is_rejected() {
        let parser = FilterParser::new(FilterMode::Params).unwrap();
        let err = compile(&parser, "ID EQ 1", COLUMNS).err().unwrap();
        assert!(matches!(
            err,
            Error::Semantic(SemanticError::ParamsUnsupported)
        ));
    }

    #[test]
    fn unknown_columns_fail_at_compile_time() {
        let parser = FilterParser::new(FilterMode::Filter).unwrap();
        assert!(compile(&parser, "MISSING EQ 1", COLUMNS).is_err());
    }
}
