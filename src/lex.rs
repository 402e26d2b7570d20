//! Regex lexer driven by a grammar's terminal rules. Rules are tried in
//! declaration order against the start of the remaining input, after
//! skipping leading whitespace; the first match wins, so more specific
//! patterns must be declared before more general ones.

use std::collections::HashSet;

use tracing::trace;

use crate::ast::Token;
use crate::error::SyntaxError;
use crate::grammar::{ProductionRule, RuleBody};

/// Length of the input excerpt reported on a lex failure.
const ERROR_EXCERPT: usize = 20;

pub(crate) fn tokenize(
    rules: &[ProductionRule],
    ignore: &HashSet<String>,
    input: &str,
) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut rest = input.trim_start();
    'outer: while !rest.is_empty() {
        for rule in rules {
            let RuleBody::Terminal(pattern) = &rule.body else {
                continue;
            };
            if let Some(matched) = pattern.match_prefix(rest) {
                if matched.is_empty() {
                    continue;
                }
                if !ignore.contains(&rule.name.to_lowercase()) {
                    trace!(name = %rule.name, value = matched, "token");
                    tokens.push(Token::new(&rule.name, matched));
                }
                rest = rest[matched.len()..].trim_start();
                continue 'outer;
            }
        }
        let excerpt: String = rest.chars().take(ERROR_EXCERPT).collect();
        return Err(SyntaxError::Unmatched(excerpt));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminals(defs: &[(&str, &str)]) -> Vec<ProductionRule> {
        defs.iter()
            .map(|(n, p)| ProductionRule::terminal(n, p).unwrap())
            .collect()
    }

    fn lex(rules: &[ProductionRule], input: &str) -> Result<Vec<Token>, SyntaxError> {
        tokenize(rules, &HashSet::new(), input)
    }

    #[test]
    fn declaration_order_wins() {
        // both patterns match "IN"; the first declared takes it
        let rules = terminals(&[("IN", r"\b(IN)\b"), ("IDENTIFIER", "[A-Z_][A-Z_0-9]*")]);
        let tokens = lex(&rules, "IN INDEX").unwrap();
        assert_eq!(tokens[0].name, "IN");
        assert_eq!(tokens[1].name, "IDENTIFIER");
        assert_eq!(tokens[1].value, "INDEX");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let rules = terminals(&[("AND", r"\bAND\b")]);
        let tokens = lex(&rules, "and").unwrap();
        assert_eq!(tokens[0].name, "AND");
        assert_eq!(tokens[0].value, "and");
    }

    #[test]
    fn ignored_rules_drop_tokens() {
        let rules = terminals(&[("WS_COMMENT", r"/\*.*\*/"), ("NUM", r"\d+")]);
        let ignore: HashSet<String> = ["ws_comment".to_string()].into();
        let tokens = tokenize(&rules, &ignore, "1 /* two */ 3").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].value, "3");
    }

    #[test]
    fn unmatched_input_reports_excerpt() {
        let rules = terminals(&[("NUM", r"\d+")]);
        let err = lex(&rules, "12 %%garbage that runs on and on").unwrap_err();
        let SyntaxError::Unmatched(excerpt) = err else {
            panic!("expected unmatched error");
        };
        assert_eq!(excerpt.chars().count(), 20);
        assert!(excerpt.starts_with("%%garbage"));
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(lex(&terminals(&[("NUM", r"\d+")]), "   ").unwrap().is_empty());
    }
}
