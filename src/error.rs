use crate::types::DataType;
use thiserror::Error;

/// Raised while building a grammar. These only surface at construction time,
/// so a deployed parser never sees them for user input.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("invalid pattern for rule '{rule}': {source}")]
    Pattern {
        rule: String,
        source: regex::Error,
    },

    #[error("unknown rule '{symbol}' referenced by '{rule}'")]
    UnknownRule { symbol: String, rule: String },

    #[error("root production rule '{0}' not found")]
    MissingRoot(String),

    /// Direct left recursion is rewritten away; indirect left recursion is
    /// detected here rather than looping forever at parse time.
    #[error("left-recursive cycle through rule '{0}'")]
    LeftCycle(String),

    #[error("rule '{0}' mixes aliased and pass-through symbols")]
    MixedSymbols(String),

    #[error("malformed grammar definition near '{0}'")]
    Malformed(String),
}

/// Raised when an input string cannot be lexed or parsed.
#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("syntax error near '{0}'")]
    Unmatched(String),

    #[error("input yields no tokens")]
    Empty,

    #[error("unexpected token '{0}'")]
    Unexpected(String),

    #[error("expression nesting too deep")]
    TooDeep,

    /// An AST shape the compiler cannot happen to receive from its own
    /// grammar; reported instead of panicking.
    #[error("internal parse result is malformed")]
    MalformedTree,
}

/// Raised while compiling a parsed expression against a concrete column set.
#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("column '{0}' does not exist")]
    UnknownColumn(String),

    #[error("operator '{0}' not supported in this scenario")]
    OperatorNotAllowed(String),

    #[error("{0} operator not supported for parameters")]
    NotSupportedForParams(&'static str),

    #[error("positional parameters are not supported by this backend")]
    ParamsUnsupported,

    #[error("grouped selections are not supported by this backend")]
    GroupingUnsupported,

    #[error("cannot bin values of type {0:?}")]
    Unbinnable(DataType),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Semantic(#[from] SemanticError),
}
