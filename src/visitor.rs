//! Rule-name dispatched AST traversal. Compilers register a handler per
//! rule of interest and rely on the default traversal, which cascades into
//! child nodes in source order, for everything else.

use std::collections::HashMap;

use crate::ast::{AstValue, Node};
use crate::error::Error;

type Handler<S> = Box<dyn Fn(&Visitor<S>, &Node, &mut S) -> Result<(), Error>>;

pub struct Visitor<S> {
    handlers: HashMap<String, Handler<S>>,
}

impl<S> Visitor<S> {
    pub fn new() -> Self {
        Visitor {
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for a rule name. Handlers that want children
    /// visited call back into the visitor themselves.
    pub fn on<F>(&mut self, rule: &str, handler: F)
    where
        F: Fn(&Visitor<S>, &Node, &mut S) -> Result<(), Error> + 'static,
    {
        self.handlers.insert(rule.to_lowercase(), Box::new(handler));
    }

    pub fn visit(&self, node: &Node, state: &mut S) -> Result<(), Error> {
        match self.handlers.get(&node.name.to_lowercase()) {
            Some(handler) => handler(self, node, state),
            None => self.cascade(node, state),
        }
    }

    fn cascade(&self, node: &Node, state: &mut S) -> Result<(), Error> {
        for (_, value) in &node.properties {
            self.visit_value(value, state)?;
        }
        Ok(())
    }

    fn visit_value(&self, value: &AstValue, state: &mut S) -> Result<(), Error> {
        match value {
            AstValue::Node(n) => self.visit(n, state),
            AstValue::List(items) => {
                for item in items {
                    self.visit_value(item, state)?;
                }
                Ok(())
            }
            AstValue::Token(_) => Ok(()),
        }
    }
}

impl<S> Default for Visitor<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Token;

    fn leaf(name: &str, key: &str, value: &str) -> Node {
        let mut n = Node::new(name);
        n.set(key, AstValue::Token(Token::new("T", value)));
        n
    }

    #[test]
    fn unhandled_nodes_cascade_in_source_order() {
        let mut root = Node::new("root");
        root.set("FIRST", AstValue::Node(leaf("leaf", "V", "1")));
        root.set(
            "REST",
            AstValue::List(vec![
                AstValue::Node(leaf("leaf", "V", "2")),
                AstValue::Node(leaf("leaf", "V", "3")),
            ]),
        );

        let mut visitor = Visitor::new();
        visitor.on("leaf", |_, node, seen: &mut Vec<String>| {
            seen.push(node.token("V").unwrap().value.clone());
            Ok(())
        });
        let mut seen = Vec::new();
        visitor.visit(&root, &mut seen).unwrap();
        assert_eq!(seen, vec!["1", "2", "3"]);
    }

    #[test]
    fn dispatch_ignores_name_case() {
        let mut visitor = Visitor::new();
        visitor.on("SomeRule", |_, _, hit: &mut bool| {
            *hit = true;
            Ok(())
        });
        let mut hit = false;
        visitor.visit(&Node::new("somerule"), &mut hit).unwrap();
        assert!(hit);
    }
}
