pub mod ast;
pub mod error;
pub mod filter;
pub mod grammar;
pub mod lex;
pub mod parser;
pub mod select;
pub mod types;
pub mod visitor;

pub use error::{Error, GrammarError, SemanticError, SyntaxError};
pub use parser::Parser;
