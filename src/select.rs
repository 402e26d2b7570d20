//! The select DSL: a comma-separated projection list with optional
//! aliases, aggregate functions and `BIN` bucketing, e.g.
//! `ID, SUM(AMOUNT) TOTAL, BIN(TS, 60)`.

use std::rc::Rc;

use tracing::debug;

use crate::ast::AstValue;
use crate::error::{Error, SemanticError, SyntaxError};
use crate::parser::Parser;
use crate::types::{resolve_column, DataColumn, DataType, Row};
use crate::visitor::Visitor;

const SELECT_GRAMMAR: &str = r#"
COMMA               =   "[,]";
AGGREGATE_FUNCTION  =   "\bSUM\b";
AGGREGATE_FUNCTION  =   "\bCOUNT\b";
AGGREGATE_FUNCTION  =   "\bMIN\b";
AGGREGATE_FUNCTION  =   "\bMAX\b";
AGGREGATE_FUNCTION  =   "\bAVG\b";
BIN_FUNCTION        =   "\bBIN\b";
IDENTIFIER          =   "\b[A-Z_][A-Z_0-9]*\b";
NUMBER              =   "\b\d+(\.\d+)?\b";
LEFT_PAREN          =   "[(]";
RIGHT_PAREN         =   "[)]";

select_term         =   ID:IDENTIFIER, ALIAS:IDENTIFIER?;
select_term         =   FN:AGGREGATE_FUNCTION, LEFT_PAREN!, ID:IDENTIFIER, RIGHT_PAREN!, ALIAS:IDENTIFIER?;
select_term         =   FN:BIN_FUNCTION, LEFT_PAREN!, ID:IDENTIFIER, COMMA!, PARAM:NUMBER, RIGHT_PAREN!, ALIAS:IDENTIFIER?;
select_factor       =   COMMA!, :select_term;
select_expr         =   SELECT:select_term, SELECT:select_factor*;
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectFunction {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    Bin,
}

impl SelectFunction {
    fn from_token(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "SUM" => Some(SelectFunction::Sum),
            "COUNT" => Some(SelectFunction::Count),
            "MIN" => Some(SelectFunction::Min),
            "MAX" => Some(SelectFunction::Max),
            "AVG" => Some(SelectFunction::Avg),
            "BIN" => Some(SelectFunction::Bin),
            _ => None,
        }
    }

    /// `BIN` buckets values but does not aggregate them.
    pub fn is_aggregate(&self) -> bool {
        !matches!(self, SelectFunction::Bin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectFunction::Sum => "SUM",
            SelectFunction::Count => "COUNT",
            SelectFunction::Min => "MIN",
            SelectFunction::Max => "MAX",
            SelectFunction::Avg => "AVG",
            SelectFunction::Bin => "BIN",
        }
    }
}

/// One projected column. `formatted_name` starts as the canonical column
/// name and is rewritten by [`Selection::format_sql`] for SQL targets.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnNode {
    pub column_name: String,
    pub alias: String,
    pub formatted_name: String,
    pub function: Option<SelectFunction>,
    pub parameter: Option<String>,
}

impl ColumnNode {
    pub fn is_aggregate(&self) -> bool {
        self.function.is_some_and(|f| f.is_aggregate())
    }
}

/// A compiled projection list.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub columns: Vec<ColumnNode>,
}

/// Row mapper for ungrouped selections over in-memory data.
pub type Projection = Box<dyn Fn(&Row) -> Row>;

impl Selection {
    /// A selection is grouped as soon as any column aggregates.
    pub fn is_grouped(&self) -> bool {
        self.columns.iter().any(|c| c.is_aggregate())
    }

    /// Derives the output schema from the source schema. `COUNT` always
    /// yields a 32-bit integer; every other column keeps its source type.
    pub fn schema(&self, base: &[DataColumn]) -> Result<Vec<DataColumn>, Error> {
        let mut out = Vec::with_capacity(self.columns.len());
        for (order, column) in self.columns.iter().enumerate() {
            let source = base
                .iter()
                .find(|b| b.column_name.eq_ignore_ascii_case(&column.column_name))
                .ok_or_else(|| SemanticError::UnknownColumn(column.column_name.clone()))?;
            let (data_type, data_length) = match column.function {
                Some(SelectFunction::Count) => (DataType::Integer32, None),
                _ => (source.data_type, source.data_length),
            };
            out.push(DataColumn {
                column_name: column.alias.clone(),
                data_type,
                data_length,
                primary_key: false,
                order,
            });
        }
        Ok(out)
    }

    /// Rewrites each column's `formatted_name` into a SQL expression.
    /// Aggregates wrap the column, `BIN` becomes a bucketing expression
    /// chosen by the column's type.
    pub fn format_sql(&mut self, base: &[DataColumn]) -> Result<(), Error> {
        for column in &mut self.columns {
            let source = base
                .iter()
                .find(|b| b.column_name.eq_ignore_ascii_case(&column.column_name))
                .ok_or_else(|| SemanticError::UnknownColumn(column.column_name.clone()))?;
            let name = &column.column_name;
            column.formatted_name = match column.function {
                None => format!("[{name}]"),
                Some(f) if f.is_aggregate() => format!("{}([{name}])", f.as_str()),
                // only BIN is left once aggregates are handled
                Some(_) => {
                    let size = column
                        .parameter
                        .as_deref()
                        .ok_or(SyntaxError::MalformedTree)?;
                    match source.data_type {
                        DataType::Integer8
                        | DataType::Integer16
                        | DataType::Integer32
                        | DataType::Integer64
                        | DataType::Decimal => format!("[{name}] - ([{name}] % {size})"),
                        // modulo is not permitted on floats, so round-trip
                        // through DECIMAL
                        DataType::Float32 | DataType::Float64 => format!(
                            "CAST(CAST([{name}] AS DECIMAL(18,4)) - (CAST([{name}] AS DECIMAL(18,4)) % {size}) AS FLOAT)"
                        ),
                        DataType::DateTime => format!(
                            "CAST(CAST([{name}] AS DATE) AS DATETIME) + CAST(DATEADD(SECOND, (DATEDIFF(SECOND, '00:00:00', CAST([{name}] AS TIME)) / {size}) * {size}, '00:00:00') AS DATETIME)"
                        ),
                        other => return Err(SemanticError::Unbinnable(other).into()),
                    }
                }
            };
        }
        Ok(())
    }

    /// The projection list of a generated SELECT statement.
    pub fn select_clause(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} [{}]", c.formatted_name, c.alias))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The GROUP BY list: every non-aggregated column. `None` when the
    /// selection is ungrouped.
    pub fn group_by_clause(&self) -> Option<String> {
        if !self.is_grouped() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .filter(|c| !c.is_aggregate())
                .map(|c| c.formatted_name.clone())
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Builds a row mapper renaming source columns to their aliases.
    /// Grouped selections have no in-memory evaluation.
    pub fn projection(&self) -> Result<Projection, Error> {
        if self.is_grouped() {
            return Err(SemanticError::GroupingUnsupported.into());
        }
        let mapping: Vec<(String, String)> = self
            .columns
            .iter()
            .map(|c| (c.column_name.clone(), c.alias.clone()))
            .collect();
        Ok(Box::new(move |row| {
            let mut out = Row::new();
            for (column, alias) in &mapping {
                if let Some(value) = row.get(column) {
                    out.insert(alias.clone(), value.clone());
                }
            }
            out
        }))
    }
}

pub struct SelectParser {
    parser: Parser,
}

impl SelectParser {
    pub fn new() -> Result<Self, Error> {
        let parser = Parser::from_bnf(SELECT_GRAMMAR, "select_expr", &[])?;
        debug!("select grammar compiled");
        Ok(SelectParser { parser })
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Parses a projection list and validates every referenced column,
    /// canonicalizing names to the schema's spelling.
    pub fn compile(&self, input: &str, columns: &[&str]) -> Result<Selection, Error> {
        let node = self
            .parser
            .parse(input)?
            .into_node()
            .ok_or(SyntaxError::MalformedTree)?;
        let columns: Rc<Vec<String>> = Rc::new(columns.iter().map(|c| c.to_string()).collect());

        let mut visitor = Visitor::new();
        visitor.on("select_expr", move |_, node, result: &mut Vec<ColumnNode>| {
            let items = node.list("SELECT").ok_or(SyntaxError::MalformedTree)?;
            for item in items {
                let AstValue::Node(term) = item else {
                    return Err(SyntaxError::MalformedTree.into());
                };
                let name = term
                    .token("ID")
                    .ok_or(SyntaxError::MalformedTree)?
                    .value
                    .clone();
                let function = match term.token("FN") {
                    Some(t) => Some(
                        SelectFunction::from_token(&t.value).ok_or(SyntaxError::MalformedTree)?,
                    ),
                    None => None,
                };
                let parameter = term.token("PARAM").map(|t| t.value.clone());
                let alias = term.token("ALIAS").map(|t| t.value.clone());
                let (_, canonical) = resolve_column(&columns, &name)?;
                result.push(ColumnNode {
                    column_name: canonical.clone(),
                    alias: alias.unwrap_or_else(|| canonical.clone()),
                    formatted_name: canonical,
                    function,
                    parameter,
                });
            }
            Ok(())
        });

        let mut result = Vec::new();
        visitor.visit(&node, &mut result)?;
        debug!(columns = result.len(), "selection compiled");
        Ok(Selection { columns: result })
    }
}
