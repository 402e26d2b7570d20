//! Backtracking recursive-descent engine. A [`Parser`] is built once from a
//! normalized grammar and can then parse any number of inputs; parsing is
//! read-only so a parser can be shared freely.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::ast::{AstValue, Node, Token};
use crate::error::{Error, GrammarError, SyntaxError};
use crate::grammar::{
    eliminate_empty_productions, remove_direct_left_recursion, rules_from_bnf, validate,
    ProductionRule, RuleBody, Symbol,
};
use crate::lex;

/// Recursion ceiling. Backtracking descent recurses once per rule frame,
/// so deeply nested input is rejected rather than risking stack overflow.
const MAX_DEPTH: usize = 128;

pub struct Parser {
    rules: Vec<ProductionRule>,
    /// Alternatives per parser rule, keyed by lowercased name, in
    /// declaration order.
    index: HashMap<String, Vec<usize>>,
    root: String,
    ignore: HashSet<String>,
}

impl Parser {
    /// Builds a parser from production rules. The rules are normalized
    /// (left recursion removed, empty alternatives eliminated) and then
    /// validated before any input is parsed.
    pub fn from_rules(
        rules: Vec<ProductionRule>,
        root: &str,
        ignore: &[&str],
    ) -> Result<Self, GrammarError> {
        let rules = eliminate_empty_productions(remove_direct_left_recursion(rules));
        validate(&rules)?;
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            if !rule.is_terminal() {
                index.entry(rule.name.to_lowercase()).or_default().push(i);
            }
        }
        if !index.contains_key(&root.to_lowercase()) {
            return Err(GrammarError::MissingRoot(root.to_string()));
        }
        Ok(Parser {
            rules,
            index,
            root: root.to_lowercase(),
            ignore: ignore.iter().map(|n| n.to_lowercase()).collect(),
        })
    }

    /// Builds a parser from a mini-BNF grammar text.
    pub fn from_bnf(grammar: &str, root: &str, ignore: &[&str]) -> Result<Self, Error> {
        let rules = rules_from_bnf(grammar)?;
        Ok(Self::from_rules(rules, root, ignore)?)
    }

    /// The normalized rules, in the order alternatives are tried.
    pub fn rules(&self) -> &[ProductionRule] {
        &self.rules
    }

    /// The normalized grammar rendered back as grammar text.
    pub fn grammar_text(&self) -> String {
        self.rules
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tokenize(&self, input: &str) -> Result<Vec<Token>, SyntaxError> {
        lex::tokenize(&self.rules, &self.ignore, input)
    }

    /// Parses an input to completion. Root alternatives are tried in order;
    /// the first one that succeeds and consumes every token wins.
    pub fn parse(&self, input: &str) -> Result<AstValue, Error> {
        let tokens = self.tokenize(input)?;
        if tokens.is_empty() {
            return Err(SyntaxError::Empty.into());
        }
        let alternatives = self
            .index
            .get(&self.root)
            .ok_or_else(|| GrammarError::MissingRoot(self.root.clone()))?;

        let mut furthest = 0;
        for &idx in alternatives {
            let mut cx = ParserContext {
                tokens: &tokens,
                cursor: 0,
                depth: 0,
                high_water: 0,
            };
            if let Some(value) = self.parse_rule(&self.rules[idx], &mut cx)?
                && cx.eof()
            {
                return Ok(value);
            }
            furthest = furthest.max(cx.high_water);
        }
        let near = tokens
            .get(furthest)
            .map(|t| t.value.clone())
            .unwrap_or_else(|| "<end of input>".to_string());
        Err(SyntaxError::Unexpected(near).into())
    }

    /// Tries one alternative. `Ok(None)` is a soft failure: the cursor is
    /// restored and the caller tries the next alternative.
    fn parse_rule(
        &self,
        rule: &ProductionRule,
        cx: &mut ParserContext,
    ) -> Result<Option<AstValue>, SyntaxError> {
        if cx.depth >= MAX_DEPTH {
            return Err(SyntaxError::TooDeep);
        }
        let RuleBody::Symbols(symbols) = &rule.body else {
            return Ok(None);
        };
        let start = cx.cursor;
        let mut acc = RuleAccumulator::new(rule);
        for sym in symbols {
            if !self.parse_symbol(sym, &mut acc, cx)? {
                cx.cursor = start;
                return Ok(None);
            }
        }
        trace!(rule = %rule.name, from = start, to = cx.cursor, "matched");
        Ok(Some(acc.finish()))
    }

    /// Matches one symbol, honoring its modifiers. Returns whether the
    /// symbol as a whole succeeded.
    fn parse_symbol(
        &self,
        sym: &Symbol,
        acc: &mut RuleAccumulator,
        cx: &mut ParserContext,
    ) -> Result<bool, SyntaxError> {
        let start = cx.cursor;
        if sym.optional && cx.eof() {
            return Ok(true);
        }
        let mut once = false;
        loop {
            let mut value = None;
            if let Some(tok) = cx.try_token(&sym.name) {
                value = Some(AstValue::Token(tok));
            } else if let Some(alternatives) = self.index.get(&sym.name.to_lowercase()) {
                for &idx in alternatives {
                    cx.depth += 1;
                    let result = self.parse_rule(&self.rules[idx], cx);
                    cx.depth -= 1;
                    if let Some(v) = result? {
                        value = Some(v);
                        break;
                    }
                }
            }
            match value {
                Some(v) => {
                    if !sym.ignore {
                        acc.store(sym, v);
                    }
                    once = true;
                    if !sym.many {
                        break;
                    }
                }
                None => {
                    if !once {
                        cx.cursor = start;
                    }
                    break;
                }
            }
        }
        Ok(once || sym.optional)
    }
}

struct ParserContext<'t> {
    tokens: &'t [Token],
    cursor: usize,
    depth: usize,
    /// Furthest cursor reached, for error reporting.
    high_water: usize,
}

impl ParserContext<'_> {
    fn eof(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn try_token(&mut self, name: &str) -> Option<Token> {
        let tok = self.tokens.get(self.cursor)?;
        if tok.name.eq_ignore_ascii_case(name) {
            self.cursor += 1;
            self.high_water = self.high_water.max(self.cursor);
            Some(tok.clone())
        } else {
            None
        }
    }
}

/// Accumulates one alternative's matches into its result: a node of aliased
/// properties, or a pass-through value when the symbols carry no alias.
struct RuleAccumulator<'r> {
    rule: &'r ProductionRule,
    slot: Slot,
}

enum Slot {
    Empty,
    Value(AstValue),
    Node(Node),
}

impl<'r> RuleAccumulator<'r> {
    fn new(rule: &'r ProductionRule) -> Self {
        RuleAccumulator {
            rule,
            slot: Slot::Empty,
        }
    }

    fn store(&mut self, sym: &Symbol, value: AstValue) {
        let enumerated = self.rule.enumerated(sym.alias_key());
        match sym.alias_key() {
            None => {
                if enumerated {
                    let mut items = match std::mem::replace(&mut self.slot, Slot::Empty) {
                        Slot::Value(AstValue::List(items)) => items,
                        _ => Vec::new(),
                    };
                    match value {
                        AstValue::List(mut inner) => items.append(&mut inner),
                        other => items.push(other),
                    }
                    self.slot = Slot::Value(AstValue::List(items));
                } else {
                    self.slot = Slot::Value(value);
                }
            }
            Some(alias) => {
                let mut node = match std::mem::replace(&mut self.slot, Slot::Empty) {
                    Slot::Node(node) => node,
                    _ => Node::new(&self.rule.name),
                };
                if enumerated {
                    node.push_value(alias, value);
                } else {
                    node.set(alias, value);
                }
                self.slot = Slot::Node(node);
            }
        }
    }

    fn finish(self) -> AstValue {
        match self.slot {
            Slot::Node(node) => AstValue::Node(node),
            Slot::Value(value) => value,
            Slot::Empty => AstValue::Node(Node::new(&self.rule.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arithmetic() -> Parser {
        // left-recursive on purpose; normalization must preserve the language
        let rules = vec![
            ProductionRule::terminal("NUM", r"\d+").unwrap(),
            ProductionRule::terminal("PLUS", r"[+]").unwrap(),
            ProductionRule::terminal("STAR", r"[*]").unwrap(),
            ProductionRule::rule("expr", &["expr", "PLUS", "term"]),
            ProductionRule::rule("expr", &["term"]),
            ProductionRule::rule("term", &["term", "STAR", "NUM"]),
            ProductionRule::rule("term", &["NUM"]),
        ];
        Parser::from_rules(rules, "expr", &[]).unwrap()
    }

    #[test]
    fn left_recursive_language_is_preserved() {
        let parser = arithmetic();
        for input in ["7", "1+2", "1+2+3", "2*3", "1+2*3+4", "1*2*3"] {
            assert!(parser.parse(input).is_ok(), "failed on {input}");
        }
        for input in ["+", "1+", "*3", "1 2", "1++2"] {
            assert!(parser.parse(input).is_err(), "accepted {input}");
        }
    }

    #[test]
    fn alternatives_are_tried_in_order() {
        let rules = vec![
            ProductionRule::terminal("AA", "a").unwrap(),
            ProductionRule::terminal("BB", "b").unwrap(),
            ProductionRule::rule("start", &["X:AA", "Y:BB"]),
            ProductionRule::rule("start", &["X:AA"]),
        ];
        let parser = Parser::from_rules(rules, "start", &[]).unwrap();
        let node = parser.parse("a b").unwrap().into_node().unwrap();
        assert!(node.has("Y"));
        let node = parser.parse("a").unwrap().into_node().unwrap();
        assert!(!node.has("Y"));
    }

    #[test]
    fn repeated_aliases_accumulate_lists() {
        let parser = Parser::from_bnf(
            r#"
            NUM = "\d+";
            COMMA = "[,]";
            item = COMMA!, :NUM;
            list = VALUES:NUM, VALUES:item*;
            "#,
            "list",
            &[],
        )
        .unwrap();
        let node = parser.parse("1, 2, 3").unwrap().into_node().unwrap();
        let values = node.list("VALUES").unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2].as_token().unwrap().value, "3");
        // a single element still comes back as a list
        let node = parser.parse("1").unwrap().into_node().unwrap();
        assert_eq!(node.list("VALUES").unwrap().len(), 1);
    }

    #[test]
    fn pass_through_rules_replace_their_result() {
        let parser = Parser::from_bnf(
            r#"
            NUM = "\d+";
            inner = VALUE:NUM;
            outer = :inner;
            "#,
            "outer",
            &[],
        )
        .unwrap();
        let node = parser.parse("42").unwrap().into_node().unwrap();
        assert_eq!(node.name, "inner");
        assert_eq!(node.token("VALUE").unwrap().value, "42");
    }

    #[test]
    fn unconsumed_trailing_input_is_an_error() {
        let parser = arithmetic();
        let err = parser.parse("1+2 )").unwrap_err();
        let Error::Syntax(SyntaxError::Unmatched(_)) = err else {
            panic!("expected lex failure, got {err:?}");
        };
        let err = parser.parse("1+2 3").unwrap_err();
        let Error::Syntax(SyntaxError::Unexpected(near)) = err else {
            panic!("expected parse failure, got {err:?}");
        };
        assert_eq!(near, "3");
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            arithmetic().parse("  ").unwrap_err(),
            Error::Syntax(SyntaxError::Empty)
        ));
    }

    #[test]
    fn runaway_nesting_is_cut_off() {
        let parser = Parser::from_bnf(
            r#"
            NUM = "\d+";
            LP = "\(";
            RP = "\)";
            expr = :NUM;
            expr = LP!, :expr, RP!;
            "#,
            "expr",
            &[],
        )
        .unwrap();
        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        assert!(matches!(
            parser.parse(&deep).unwrap_err(),
            Error::Syntax(SyntaxError::TooDeep)
        ));
        assert!(parser.parse("((1))").is_ok());
    }

    #[test]
    fn missing_root_is_rejected() {
        let rules = vec![ProductionRule::terminal("NUM", r"\d+").unwrap()];
        assert!(matches!(
            Parser::from_rules(rules, "expr", &[]).err().unwrap(),
            GrammarError::MissingRoot(_)
        ));
    }
}
