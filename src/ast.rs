//! The untyped syntax tree produced by the parsing engine. Rules assemble
//! nodes keyed by symbol alias, so a compiler navigates the tree by the
//! names its grammar chose rather than by position.

use std::fmt;

/// A lexed token: the terminal rule name plus the matched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub name: String,
    pub value: String,
}

impl Token {
    pub fn new(name: &str, value: &str) -> Self {
        Token {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstValue {
    Token(Token),
    Node(Node),
    List(Vec<AstValue>),
}

impl AstValue {
    pub fn into_node(self) -> Option<Node> {
        match self {
            AstValue::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            AstValue::Token(t) => Some(t),
            _ => None,
        }
    }
}

/// A rule result. Properties keep insertion order so that default visitor
/// traversal walks children in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub properties: Vec<(String, AstValue)>,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Node {
            name: name.to_string(),
            properties: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AstValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn token(&self, key: &str) -> Option<&Token> {
        match self.get(key) {
            Some(AstValue::Token(t)) => Some(t),
            _ => None,
        }
    }

    pub fn node(&self, key: &str) -> Option<&Node> {
        match self.get(key) {
            Some(AstValue::Node(n)) => Some(n),
            _ => None,
        }
    }

    pub fn list(&self, key: &str) -> Option<&[AstValue]> {
        match self.get(key) {
            Some(AstValue::List(items)) => Some(items),
            _ => None,
        }
    }

    /// Sets a property, replacing any previous value in place.
    pub(crate) fn set(&mut self, key: &str, value: AstValue) {
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.properties.push((key.to_string(), value));
        }
    }

    /// Appends to a list property, flattening list values so that repeated
    /// and starred symbols accumulate into one flat sequence.
    pub(crate) fn push_value(&mut self, key: &str, value: AstValue) {
        let slot = match self.properties.iter_mut().position(|(k, _)| k == key) {
            Some(i) => {
                if !matches!(self.properties[i].1, AstValue::List(_)) {
                    let existing =
                        std::mem::replace(&mut self.properties[i].1, AstValue::List(Vec::new()));
                    if let AstValue::List(items) = &mut self.properties[i].1 {
                        items.push(existing);
                    }
                }
                i
            }
            None => {
                self.properties
                    .push((key.to_string(), AstValue::List(Vec::new())));
                self.properties.len() - 1
            }
        };
        if let AstValue::List(items) = &mut self.properties[slot].1 {
            match value {
                AstValue::List(mut inner) => items.append(&mut inner),
                other => items.push(other),
            }
        }
    }
}

fn fmt_value(value: &AstValue, indent: usize, label: &str, f: &mut fmt::Formatter) -> fmt::Result {
    let pad = "   ".repeat(indent);
    match value {
        AstValue::Token(t) => writeln!(f, "{pad}+- {label}{} '{}'", t.name, t.value),
        AstValue::Node(n) => {
            writeln!(f, "{pad}+- {label}{}", n.name)?;
            for (key, child) in &n.properties {
                let label = format!("{key}: ");
                fmt_value(child, indent + 1, &label, f)?;
            }
            Ok(())
        }
        AstValue::List(items) => {
            writeln!(f, "{pad}+- {label}[{}]", items.len())?;
            for item in items {
                fmt_value(item, indent + 1, "", f)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "+- {}", self.name)?;
        for (key, child) in &self.properties {
            let label = format!("{key}: ");
            fmt_value(child, 1, &label, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for AstValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_value(self, 0, "", f)
    }
}
