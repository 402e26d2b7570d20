//! The boolean filter DSL: comparisons joined by `AND`/`OR`, plus `IN`,
//! `BETWEEN`, `CONTAINS` and `ISBLANK` predicates. Two modes share the
//! grammar core: `Filter` compiles a full boolean expression, `Params`
//! restricts input to equality comparisons used for key lookups.

pub mod memory;
pub mod sql;

use tracing::debug;

use crate::ast::Node;
use crate::error::{Error, SyntaxError};
use crate::parser::Parser;

/* Grammar for FILTER query */
const FILTER_GRAMMAR: &str = r#"
AND                     =   "\bAND\b";
OR                      =   "\bOR\b";
EQ_OP                   =   "\bEQ\b";
NE_OP                   =   "\bNE\b";
LT_OP                   =   "\bLT\b";
LE_OP                   =   "\bLE\b";
GT_OP                   =   "\bGT\b";
GE_OP                   =   "\bGE\b";
LEFT_PAREN              =   "[(]";
RIGHT_PAREN             =   "[)]";
COMMA                   =   "[,]";
IN                      =   "\b(IN)\b";
CONTAINS                =   "\b(CONTAINS)\b";
BETWEEN                 =   "\b(BETWEEN)\b";
ISBLANK                 =   "\b(ISBLANK)\b";
NOT                     =   "\b(NOT)\b";
LITERAL_STRING          =   "['][^']*[']";
LITERAL_NUMBER          =   "[+-]?((\d+(\.\d*)?)|(\.\d+))";
IDENTIFIER              =   "[A-Z_][A-Z_0-9]*";

comparison_operator     =   :EQ_OP | :NE_OP | :LT_OP | :LE_OP | :GT_OP | :GE_OP;
comparison_operand      =   :LITERAL_STRING | :LITERAL_NUMBER | :IDENTIFIER;
comparison_predicate    =   LHV:comparison_operand, OPERATOR:comparison_operator, RHV:comparison_operand;
in_factor               =   COMMA!, :comparison_operand;
in_predicate            =   LHV:comparison_operand, NOT:NOT?, IN!, LEFT_PAREN!, RHV:comparison_operand, RHV:in_factor*, RIGHT_PAREN!;
between_predicate       =   LHV:comparison_operand, NOT:NOT?, BETWEEN!, OP1:comparison_operand, AND!, OP2:comparison_operand;
contains_predicate      =   LHV:comparison_operand, NOT:NOT?, CONTAINS!, RHV:comparison_operand;
blank_predicate         =   LHV:comparison_operand, NOT:NOT?, ISBLANK;
predicate               =   :comparison_predicate | :in_predicate | :between_predicate | :contains_predicate | :blank_predicate;
boolean_primary         =   :predicate;
boolean_factor          =   AND!, :boolean_primary;
boolean_term            =   AND:boolean_primary, AND:boolean_factor*;
search_factor           =   OR!, :boolean_term;
search_condition        =   OR:boolean_term, OR:search_factor*;
"#;

/// Parenthesized grouping, only legal in full filter mode.
const PAREN_PRIMARY: &str =
    "boolean_primary = LEFT_PAREN!, CONDITION:search_condition, RIGHT_PAREN!;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Full boolean expression, all comparison operators, grouping.
    Filter,
    /// Equality lookups only; output is an ordered parameter list.
    Params,
}

pub(crate) fn grammar_text(mode: FilterMode) -> String {
    match mode {
        FilterMode::Filter => format!("{FILTER_GRAMMAR}\n{PAREN_PRIMARY}"),
        FilterMode::Params => FILTER_GRAMMAR.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub(crate) fn from_token(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "EQ_OP" => Some(CompareOp::Eq),
            "NE_OP" => Some(CompareOp::Ne),
            "LT_OP" => Some(CompareOp::Lt),
            "LE_OP" => Some(CompareOp::Le),
            "GT_OP" => Some(CompareOp::Gt),
            "GE_OP" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub(crate) fn allowed_in(&self, mode: FilterMode) -> bool {
        mode == FilterMode::Filter || *self == CompareOp::Eq
    }
}

/// A reusable filter front end: the grammar is normalized and compiled
/// once, then shared by every compilation against it.
pub struct FilterParser {
    parser: Parser,
    mode: FilterMode,
}

impl FilterParser {
    pub fn new(mode: FilterMode) -> Result<Self, Error> {
        let parser = Parser::from_bnf(&grammar_text(mode), "search_condition", &[])?;
        debug!(?mode, "filter grammar compiled");
        Ok(FilterParser { parser, mode })
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub(crate) fn parse(&self, input: &str) -> Result<Node, Error> {
        self.parser
            .parse(input)?
            .into_node()
            .ok_or_else(|| SyntaxError::MalformedTree.into())
    }
}

/// Literal tokens keep their quotes through the lexer; values are unquoted
/// at compile time.
pub(crate) fn strip_quotes(value: &str) -> String {
    value.replace('\'', "")
}

pub(crate) fn token_value(node: &Node, key: &str) -> Result<String, Error> {
    node.token(key)
        .map(|t| t.value.clone())
        .ok_or_else(|| SyntaxError::MalformedTree.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_mode_accepts_grouping() {
        let fp = FilterParser::new(FilterMode::Filter).unwrap();
        let node = fp
            .parse("AA EQ 1 AND (BB EQ 2 OR CC GT 3)")
            .unwrap();
        assert_eq!(node.name, "search_condition");
        assert!(fp.parse("NAME NOT IN ('a', 'b')").is_ok());
        assert!(fp.parse("AMOUNT BETWEEN 1 AND 10").is_ok());
        assert!(fp.parse("NAME CONTAINS 'abc'").is_ok());
        assert!(fp.parse("NAME NOT ISBLANK").is_ok());
    }

    #[test]
    fn params_mode_rejects_grouping() {
        let fp = FilterParser::new(FilterMode::Params).unwrap();
        assert!(fp.parse("AA EQ 1 AND BB EQ 2").is_ok());
        assert!(fp.parse("(AA EQ 1)").is_err());
    }

    #[test]
    fn malformed_filters_are_rejected() {
        let fp = FilterParser::new(FilterMode::Filter).unwrap();
        for input in ["AA EQ", "EQ 1", "AA EQ 1 AND", "AA IN ()", "AA BETWEEN 1"] {
            assert!(fp.parse(input).is_err(), "accepted {input}");
        }
    }

    #[test]
    fn keywords_are_not_identifiers() {
        let fp = FilterParser::new(FilterMode::Filter).unwrap();
        assert!(fp.parse("AND EQ 1").is_err());
    }
}
