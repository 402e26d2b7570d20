//! Grammar model and normalization. A grammar is an ordered list of
//! [`ProductionRule`]s; rules with the same name are alternatives tried in
//! order. Terminal rules carry a regular expression, parser rules a symbol
//! sequence. Grammars can be built in code or parsed from a mini-BNF text
//! by a bootstrap parser whose own grammar is built in code.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::ast::AstValue;
use crate::error::{Error, GrammarError};
use crate::parser::Parser;
use crate::visitor::Visitor;

/// Marker name for an empty alternative, introduced by left-recursion
/// removal and rewritten away by empty-production elimination.
pub const EPSILON: &str = "ε";

/// One element of a parser rule body: a reference to another rule plus the
/// modifiers parsed from a spec such as `LHV:operand?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    /// Property name the match is stored under. `None` means pass-through:
    /// the match becomes the rule's own result.
    pub alias: Option<String>,
    pub optional: bool,
    pub many: bool,
    pub ignore: bool,
}

impl Symbol {
    /// Parses a symbol spec: `[alias]:` prefix, rule name, one optional
    /// trailing modifier out of `?` `*` `+` `!`.
    pub fn parse_spec(spec: &str) -> Self {
        let (explicit, rest) = match spec.split_once(':') {
            Some(("", r)) => (Some(None), r),
            Some((a, r)) => (Some(Some(a.to_string())), r),
            None => (None, spec),
        };
        let (name, modifier) = match rest.chars().last() {
            Some(c @ ('?' | '*' | '+' | '!')) => (&rest[..rest.len() - c.len_utf8()], Some(c)),
            _ => (rest, None),
        };
        let (optional, many, ignore) = match modifier {
            Some('?') => (true, false, false),
            Some('*') => (true, true, false),
            Some('+') => (false, true, false),
            Some('!') => (false, false, true),
            _ => (false, false, false),
        };
        let alias = match explicit {
            Some(a) => a,
            None => Some(name.to_string()),
        };
        Symbol {
            name: name.to_string(),
            alias,
            optional,
            many,
            ignore,
        }
    }

    pub(crate) fn alias_key(&self) -> Option<&str> {
        self.alias.as_deref()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let modifier = if self.ignore {
            "!"
        } else if self.optional && self.many {
            "*"
        } else if self.optional {
            "?"
        } else if self.many {
            "+"
        } else {
            ""
        };
        match self.alias.as_deref() {
            None => write!(f, ":{}{}", self.name, modifier),
            Some(a) if a == self.name => write!(f, "{}{}", self.name, modifier),
            Some(a) => write!(f, "{}:{}{}", a, self.name, modifier),
        }
    }
}

/// A terminal's pattern, compiled once at grammar construction. Matching is
/// anchored to the start of the remaining input and case-insensitive.
#[derive(Debug, Clone)]
pub struct TerminalPattern {
    source: String,
    regex: Regex,
}

impl TerminalPattern {
    fn new(rule: &str, source: &str) -> Result<Self, GrammarError> {
        let regex = RegexBuilder::new(&format!("^(?:{source})"))
            .case_insensitive(true)
            .build()
            .map_err(|source| GrammarError::Pattern {
                rule: rule.to_string(),
                source,
            })?;
        Ok(TerminalPattern {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the matched prefix of `input`, if any.
    pub fn match_prefix<'a>(&self, input: &'a str) -> Option<&'a str> {
        self.regex.find(input).map(|m| m.as_str())
    }
}

impl PartialEq for TerminalPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleBody {
    Terminal(TerminalPattern),
    Symbols(Vec<Symbol>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductionRule {
    pub name: String,
    pub body: RuleBody,
}

impl ProductionRule {
    pub fn terminal(name: &str, pattern: &str) -> Result<Self, GrammarError> {
        Ok(ProductionRule {
            name: name.to_string(),
            body: RuleBody::Terminal(TerminalPattern::new(name, pattern)?),
        })
    }

    pub fn parser(name: &str, symbols: Vec<Symbol>) -> Self {
        ProductionRule {
            name: name.to_string(),
            body: RuleBody::Symbols(symbols),
        }
    }

    /// Parser-rule convenience taking symbol specs, e.g.
    /// `ProductionRule::rule("expr", &["expr", "PLUS", "term"])`.
    pub fn rule(name: &str, parts: &[&str]) -> Self {
        ProductionRule::parser(name, parts.iter().map(|p| Symbol::parse_spec(p)).collect())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.body, RuleBody::Terminal(_))
    }

    pub fn symbols(&self) -> &[Symbol] {
        match &self.body {
            RuleBody::Symbols(symbols) => symbols,
            RuleBody::Terminal(_) => &[],
        }
    }

    /// An alias slot accumulates a list when it appears more than once in
    /// the alternative or any occurrence is repeatable.
    pub(crate) fn enumerated(&self, alias: Option<&str>) -> bool {
        let mut count = 0;
        let mut many = false;
        for sym in self.symbols() {
            if sym.alias_key() == alias {
                count += 1;
                many |= sym.many;
            }
        }
        count > 1 || many
    }
}

impl fmt::Display for ProductionRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.body {
            RuleBody::Terminal(pattern) => {
                write!(f, "{} = \"{}\";", self.name, pattern.source())
            }
            RuleBody::Symbols(symbols) => {
                write!(f, "{} = ", self.name)?;
                for (i, sym) in symbols.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{sym}")?;
                }
                write!(f, ";")
            }
        }
    }
}

fn is_epsilon_alt(rule: &ProductionRule) -> bool {
    matches!(&rule.body, RuleBody::Symbols(s) if s.len() == 1 && s[0].name == EPSILON)
}

/// Rewrites directly left-recursive rules into right-recursive form. For a
/// rule `a` the recursive alternatives move into a tail rule `a'` and every
/// non-recursive alternative gets a trailing `a'` reference; the tail rule
/// ends with a single empty alternative. Idempotent.
pub fn remove_direct_left_recursion(rules: Vec<ProductionRule>) -> Vec<ProductionRule> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ProductionRule>> = HashMap::new();
    for rule in rules {
        if !groups.contains_key(&rule.name) {
            order.push(rule.name.clone());
        }
        groups.entry(rule.name.clone()).or_default().push(rule);
    }

    let mut out = Vec::new();
    for name in order {
        let group = groups.remove(&name).unwrap_or_default();
        let recursive = group.iter().any(|r| {
            matches!(&r.body, RuleBody::Symbols(s) if s.first().is_some_and(|f| f.name == r.name))
        });
        if !recursive {
            out.extend(group);
            continue;
        }

        debug!(rule = %name, "removing direct left recursion");
        let tail_name = format!("{name}'");
        let mut tails = Vec::new();
        for rule in group {
            let RuleBody::Symbols(symbols) = rule.body else {
                out.push(rule);
                continue;
            };
            if symbols.first().is_some_and(|f| f.name == name) {
                let mut rest: Vec<Symbol> = symbols[1..].to_vec();
                rest.push(Symbol::parse_spec(&tail_name));
                tails.push(ProductionRule::parser(&tail_name, rest));
            } else {
                let mut symbols = symbols;
                symbols.push(Symbol::parse_spec(&tail_name));
                out.push(ProductionRule::parser(&name, symbols));
            }
        }
        out.extend(tails);
        out.push(ProductionRule::parser(
            &tail_name,
            vec![Symbol::parse_spec(EPSILON)],
        ));
    }
    out
}

/// Rewrites away empty alternatives. Every rule referencing a nullable rule
/// gains one extra alternative, appended after all existing ones, with all
/// nullable references removed; the empty alternatives themselves are
/// dropped. Idempotent.
pub fn eliminate_empty_productions(rules: Vec<ProductionRule>) -> Vec<ProductionRule> {
    let nullable: HashSet<&str> = rules
        .iter()
        .filter(|r| is_epsilon_alt(r))
        .map(|r| r.name.as_str())
        .collect();
    if nullable.is_empty() {
        return rules;
    }

    let mut additional = Vec::new();
    for rule in &rules {
        if is_epsilon_alt(rule) {
            continue;
        }
        let RuleBody::Symbols(symbols) = &rule.body else {
            continue;
        };
        if !symbols.iter().any(|s| nullable.contains(s.name.as_str())) {
            continue;
        }
        let kept: Vec<Symbol> = symbols
            .iter()
            .filter(|s| !nullable.contains(s.name.as_str()))
            .cloned()
            .collect();
        if !kept.is_empty() {
            additional.push(ProductionRule::parser(&rule.name, kept));
        }
    }

    let mut out: Vec<ProductionRule> = rules.into_iter().filter(|r| !is_epsilon_alt(r)).collect();
    out.extend(additional);
    out
}

/// Checks that every symbol resolves to a rule, that no alternative mixes
/// aliased and pass-through result symbols, and that no leftmost-reference
/// cycle survives normalization.
pub(crate) fn validate(rules: &[ProductionRule]) -> Result<(), GrammarError> {
    let terminals: HashSet<String> = rules
        .iter()
        .filter(|r| r.is_terminal())
        .map(|r| r.name.to_lowercase())
        .collect();
    let parsers: HashSet<String> = rules
        .iter()
        .filter(|r| !r.is_terminal())
        .map(|r| r.name.to_lowercase())
        .collect();

    for rule in rules.iter().filter(|r| !r.is_terminal()) {
        let mut aliased = false;
        let mut pass_through = false;
        for sym in rule.symbols() {
            let key = sym.name.to_lowercase();
            if !terminals.contains(&key) && !parsers.contains(&key) {
                return Err(GrammarError::UnknownRule {
                    symbol: sym.name.clone(),
                    rule: rule.name.clone(),
                });
            }
            if !sym.ignore {
                match sym.alias {
                    Some(_) => aliased = true,
                    None => pass_through = true,
                }
            }
        }
        if aliased && pass_through {
            return Err(GrammarError::MixedSymbols(rule.name.clone()));
        }
    }

    // Leftmost-reference edges: every parser rule reachable at the start of
    // an alternative, skipping over optional symbols.
    let mut edges: HashMap<String, HashSet<String>> = HashMap::new();
    for rule in rules.iter().filter(|r| !r.is_terminal()) {
        let entry = edges.entry(rule.name.to_lowercase()).or_default();
        for sym in rule.symbols() {
            let key = sym.name.to_lowercase();
            if parsers.contains(&key) {
                entry.insert(key);
            }
            if !sym.optional {
                break;
            }
        }
    }

    fn dfs(
        name: &str,
        edges: &HashMap<String, HashSet<String>>,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
    ) -> Result<(), GrammarError> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(GrammarError::LeftCycle(name.to_string()));
        }
        if let Some(next) = edges.get(name) {
            for n in next {
                dfs(n, edges, visiting, done)?;
            }
        }
        visiting.remove(name);
        done.insert(name.to_string());
        Ok(())
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    for name in edges.keys() {
        dfs(name, &edges, &mut visiting, &mut done)?;
    }
    Ok(())
}

/// The grammar a grammar text is parsed with.
fn meta_rules() -> Result<Vec<ProductionRule>, GrammarError> {
    let mut rules = vec![
        ProductionRule::terminal("COMMENT", r"/\*.*\*/")?,
        ProductionRule::terminal("EQ", "=")?,
        ProductionRule::terminal("COMMA", "[,]")?,
        ProductionRule::terminal("COLON", "[:]")?,
        ProductionRule::terminal("SEMICOLON", ";")?,
        ProductionRule::terminal("MODIFIER", r"[?!+*]")?,
        ProductionRule::terminal("OR", r"[|]")?,
        ProductionRule::terminal("QUOTEDLITERAL", r#""(?:[^"\\]|\\.)*""#)?,
        ProductionRule::terminal("IDENTIFIER", r"[a-zA-Z][a-zA-Z0-9_']+")?,
        ProductionRule::terminal("NEWLINE", r"\n")?,
        ProductionRule::terminal("LPAREN", r"\(")?,
        ProductionRule::terminal("RPAREN", r"\)")?,
    ];
    for (name, parts) in [
        ("alias", vec![":IDENTIFIER?", ":COLON"]),
        ("subrule", vec!["LPAREN!", ":parserSymbolsExpr", "RPAREN!"]),
        ("symbol", vec!["ALIAS:alias?", "SUBRULE:subrule", "MODIFIER:MODIFIER?"]),
        ("symbol", vec!["ALIAS:alias?", "IDENTIFIER:IDENTIFIER", "MODIFIER:MODIFIER?"]),
        ("parserSymbolTerm", vec![":symbol"]),
        ("parserSymbolFactor", vec!["COMMA!", ":symbol"]),
        ("parserSymbolExpr", vec!["SYMBOL:parserSymbolTerm", "SYMBOL:parserSymbolFactor*"]),
        ("parserSymbolsFactor", vec!["OR!", ":parserSymbolExpr"]),
        ("parserSymbolsExpr", vec!["ALTERNATE:parserSymbolExpr", "ALTERNATE:parserSymbolsFactor*"]),
        ("rule", vec!["RULE:IDENTIFIER", "EQ!", "EXPANSION:QUOTEDLITERAL", "SEMICOLON!"]),
        ("rule", vec!["RULE:IDENTIFIER", "EQ!", "EXPANSION:parserSymbolsExpr", "SEMICOLON!"]),
        ("grammar", vec!["RULES:rule+"]),
    ] {
        rules.push(ProductionRule::rule(name, &parts));
    }
    Ok(rules)
}

fn meta_parser() -> &'static Parser {
    static META: OnceLock<Parser> = OnceLock::new();
    META.get_or_init(|| {
        let rules = meta_rules().expect("meta grammar patterns are well-formed");
        Parser::from_rules(rules, "grammar", &["COMMENT", "NEWLINE"])
            .expect("meta grammar is well-formed")
    })
}

struct BnfState {
    rules: Vec<ProductionRule>,
    current: String,
    subrules: usize,
}

fn bnf_visitor() -> Visitor<BnfState> {
    let mut visitor = Visitor::new();

    visitor.on("rule", |v, node, state: &mut BnfState| {
        let name = node
            .token("RULE")
            .ok_or_else(|| GrammarError::Malformed("rule".into()))?
            .value
            .clone();
        match node.get("EXPANSION") {
            Some(AstValue::Token(tok)) => {
                let pattern = tok
                    .value
                    .strip_prefix('"')
                    .and_then(|p| p.strip_suffix('"'))
                    .unwrap_or(&tok.value);
                state.rules.push(ProductionRule::terminal(&name, pattern)?);
            }
            Some(AstValue::Node(body)) => {
                state.current = name;
                v.visit(body, state)?;
            }
            _ => return Err(GrammarError::Malformed(name).into()),
        }
        Ok(())
    });

    // One alternative of the rule currently being defined. Subrules become
    // synthetic `anonymous_{n}` rules referenced in place.
    visitor.on("parserSymbolExpr", |v, node, state: &mut BnfState| {
        let items = node
            .list("SYMBOL")
            .ok_or_else(|| GrammarError::Malformed(state.current.clone()))?;
        let mut symbols = Vec::with_capacity(items.len());
        for item in items {
            let AstValue::Node(sym) = item else {
                return Err(GrammarError::Malformed(state.current.clone()).into());
            };
            let alias: String = match sym.get("ALIAS") {
                Some(AstValue::List(parts)) => parts
                    .iter()
                    .filter_map(AstValue::as_token)
                    .map(|t| t.value.as_str())
                    .collect(),
                Some(AstValue::Token(t)) => t.value.clone(),
                _ => String::new(),
            };
            let name = if let Some(t) = sym.token("IDENTIFIER") {
                t.value.clone()
            } else if let Some(sub) = sym.node("SUBRULE") {
                let anon = format!("anonymous_{}", state.subrules);
                state.subrules += 1;
                let saved = std::mem::replace(&mut state.current, anon.clone());
                v.visit(sub, state)?;
                state.current = saved;
                anon
            } else {
                return Err(GrammarError::Malformed(state.current.clone()).into());
            };
            let modifier = sym.token("MODIFIER").map(|t| t.value.as_str()).unwrap_or("");
            symbols.push(Symbol::parse_spec(&format!("{alias}{name}{modifier}")));
        }
        let rule = ProductionRule::parser(&state.current, symbols);
        state.rules.push(rule);
        Ok(())
    });

    visitor
}

/// Parses a mini-BNF grammar text into production rules. Terminal rules are
/// quoted patterns, parser rules comma-separated symbol lists with `|`
/// alternatives; `/* ... */` comments are skipped.
pub fn rules_from_bnf(grammar: &str) -> Result<Vec<ProductionRule>, Error> {
    let ast = meta_parser().parse(grammar)?;
    let Some(root) = ast.into_node() else {
        return Err(GrammarError::Malformed("grammar".into()).into());
    };
    let mut state = BnfState {
        rules: Vec::new(),
        current: String::new(),
        subrules: 0,
    };
    bnf_visitor().visit(&root, &mut state)?;
    debug!(rules = state.rules.len(), "parsed grammar definition");
    Ok(state.rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_specs() {
        let s = Symbol::parse_spec("LHV:comparison_operand");
        assert_eq!(s.name, "comparison_operand");
        assert_eq!(s.alias.as_deref(), Some("LHV"));

        let s = Symbol::parse_spec(":predicate");
        assert_eq!(s.alias, None);

        let s = Symbol::parse_spec("SEMICOLON!");
        assert!(s.ignore);
        assert_eq!(s.alias.as_deref(), Some("SEMICOLON"));

        let s = Symbol::parse_spec("RHV:in_factor*");
        assert!(s.optional && s.many);

        let s = Symbol::parse_spec("rule+");
        assert!(s.many && !s.optional);
    }

    #[test]
    fn symbol_display_round_trips() {
        for spec in [":predicate", "LHV:operand?", "COMMA!", "SYMBOL:factor*", "rule+"] {
            assert_eq!(Symbol::parse_spec(spec).to_string(), spec);
        }
    }

    fn names(rules: &[ProductionRule]) -> Vec<String> {
        rules.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn left_recursion_is_rewritten() {
        let rules = vec![
            ProductionRule::terminal("NUM", r"\d+").unwrap(),
            ProductionRule::terminal("PLUS", r"[+]").unwrap(),
            ProductionRule::rule("expr", &["expr", "PLUS", "NUM"]),
            ProductionRule::rule("expr", &["NUM"]),
        ];
        let out = remove_direct_left_recursion(rules);
        assert_eq!(
            names(&out),
            vec!["NUM", "PLUS", "expr", "expr'", "expr'"]
        );
        // the non-recursive alternative now ends with the tail rule
        let expr = &out[2];
        assert_eq!(expr.symbols().last().unwrap().name, "expr'");
        // the tail keeps the recursive suffix and ends with itself
        let tail = &out[3];
        assert_eq!(tail.symbols()[0].name, "PLUS");
        assert_eq!(tail.symbols().last().unwrap().name, "expr'");
        assert!(is_epsilon_alt(&out[4]));
    }

    #[test]
    fn left_recursion_removal_is_idempotent() {
        let rules = vec![
            ProductionRule::terminal("NUM", r"\d+").unwrap(),
            ProductionRule::terminal("PLUS", r"[+]").unwrap(),
            ProductionRule::rule("expr", &["expr", "PLUS", "NUM"]),
            ProductionRule::rule("expr", &["NUM"]),
        ];
        let once = remove_direct_left_recursion(rules);
        let twice = remove_direct_left_recursion(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_elimination_appends_one_alternative() {
        let rules = vec![
            ProductionRule::terminal("NUM", r"\d+").unwrap(),
            ProductionRule::rule("list", &["NUM", "tail"]),
            ProductionRule::rule("tail", &["NUM", "tail"]),
            ProductionRule::rule("tail", &[EPSILON]),
        ];
        let out = eliminate_empty_productions(rules);
        // ε alternative dropped, nullable-free copies appended at the end
        assert_eq!(
            names(&out),
            vec!["NUM", "list", "tail", "list", "tail"]
        );
        assert_eq!(out[3].symbols().len(), 1);
        assert_eq!(out[4].symbols().len(), 1);
        let twice = eliminate_empty_productions(out.clone());
        assert_eq!(out, twice);
    }

    #[test]
    fn indirect_left_recursion_is_rejected() {
        let rules = vec![
            ProductionRule::terminal("NUM", r"\d+").unwrap(),
            ProductionRule::rule("aa", &["bb", "NUM"]),
            ProductionRule::rule("bb", &["aa", "NUM"]),
        ];
        let err = validate(&rules).unwrap_err();
        assert!(matches!(err, GrammarError::LeftCycle(_)));
    }

    #[test]
    fn optional_prefix_counts_toward_left_cycles() {
        let rules = vec![
            ProductionRule::terminal("NUM", r"\d+").unwrap(),
            ProductionRule::rule("aa", &["bb?", "aa", "NUM"]),
            ProductionRule::rule("bb", &["NUM"]),
        ];
        assert!(matches!(
            validate(&rules).unwrap_err(),
            GrammarError::LeftCycle(_)
        ));
    }

    #[test]
    fn unknown_references_are_rejected() {
        let rules = vec![ProductionRule::rule("aa", &["missing"])];
        assert!(matches!(
            validate(&rules).unwrap_err(),
            GrammarError::UnknownRule { .. }
        ));
    }

    #[test]
    fn mixed_alias_styles_are_rejected() {
        let rules = vec![
            ProductionRule::terminal("NUM", r"\d+").unwrap(),
            ProductionRule::rule("aa", &["X:NUM", ":NUM"]),
        ];
        assert!(matches!(
            validate(&rules).unwrap_err(),
            GrammarError::MixedSymbols(_)
        ));
    }

    #[test]
    fn bnf_terminals_and_rules() {
        let rules = rules_from_bnf(
            r#"
            /* numbers */
            NUM = "\d+";
            PLUS = "[+]";
            term = :NUM;
            expr = LHS:term, (PLUS!, RHS:term)*;
            "#,
        )
        .unwrap();
        assert_eq!(
            names(&rules),
            vec!["NUM", "PLUS", "term", "anonymous_0", "expr"]
        );
        assert!(rules[0].is_terminal());
        let expr = &rules[4];
        assert_eq!(expr.symbols()[1].name, "anonymous_0");
        assert!(expr.symbols()[1].optional && expr.symbols()[1].many);
        let anon = &rules[3];
        assert!(anon.symbols()[0].ignore);
        assert_eq!(anon.symbols()[1].alias.as_deref(), Some("RHS"));
    }

    #[test]
    fn printed_grammar_parses_back() {
        let rules = rules_from_bnf(
            r#"
            NUM = "\d+";
            PLUS = "[+]";
            term = :NUM;
            expr = LHS:term, TAIL:rest*;
            rest = PLUS!, :term;
            "#,
        )
        .unwrap();
        let text = rules
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let reparsed = rules_from_bnf(&text).unwrap();
        assert_eq!(rules, reparsed);
    }
}
