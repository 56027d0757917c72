//! The operation request address prefix.
//!
//! The prefix is the address context every request line resolves
//! against. It may end on a bare node type, in which case the next
//! request can supply just the node name.

use castellan_value::Value;

use crate::parser::{self, AddressNode, CommandFormatError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixNode {
    TypeName(String, String),
    /// A trailing node type awaiting a name.
    TypeOnly(String),
}

#[derive(Debug, Default, Clone)]
pub struct Prefix {
    nodes: Vec<PrefixNode>,
}

impl Prefix {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
    }

    /// Parses a prefix specification, e.g. `subsystem=web,connector` —
    /// complete pairs, optionally ending on a bare type.
    pub fn parse(spec: &str) -> Result<Prefix, CommandFormatError> {
        let spec = spec.trim();
        let mut nodes = Vec::new();
        if spec.is_empty() {
            return Ok(Prefix { nodes });
        }
        let count = spec.split(',').count();
        for (index, node) in spec.split(',').enumerate() {
            let node = node.trim();
            if node.is_empty() {
                return Err(CommandFormatError(format!(
                    "Node is missing in the prefix '{spec}'"
                )));
            }
            match node.split_once('=') {
                Some((node_type, node_name)) => {
                    let node_type = node_type.trim();
                    let node_name = node_name.trim();
                    if !parser::is_valid_identifier(node_type) {
                        return Err(CommandFormatError(format!(
                            "The node type is not a valid identifier '{node_type}'"
                        )));
                    }
                    if !parser::is_valid_identifier(node_name) {
                        return Err(CommandFormatError(format!(
                            "The node name is not a valid identifier '{node_name}'"
                        )));
                    }
                    nodes.push(PrefixNode::TypeName(
                        node_type.to_string(),
                        node_name.to_string(),
                    ));
                }
                None => {
                    if !parser::is_valid_identifier(node) {
                        return Err(CommandFormatError(format!(
                            "The node type is not a valid identifier '{node}'"
                        )));
                    }
                    if index + 1 != count {
                        return Err(CommandFormatError(format!(
                            "Only the last prefix node may be a bare type: '{spec}'"
                        )));
                    }
                    nodes.push(PrefixNode::TypeOnly(node.to_string()));
                }
            }
        }
        Ok(Prefix { nodes })
    }

    /// Resolves a request's address nodes against this prefix into the
    /// wire form.
    pub fn resolve(&self, address: &[AddressNode]) -> Result<Value, CommandFormatError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        let mut pending_type: Option<String> = None;
        for node in &self.nodes {
            match node {
                PrefixNode::TypeName(t, n) => pairs.push((t.clone(), n.clone())),
                PrefixNode::TypeOnly(t) => pending_type = Some(t.clone()),
            }
        }
        for node in address {
            match node {
                AddressNode::TypeName(t, n) => {
                    if let Some(node_type) = pending_type.take() {
                        return Err(CommandFormatError(format!(
                            "The prefix ends on type '{node_type}' which still needs a node name"
                        )));
                    }
                    pairs.push((t.clone(), n.clone()));
                }
                AddressNode::NameOnly(name) => match pending_type.take() {
                    Some(node_type) => pairs.push((node_type, name.clone())),
                    None => {
                        return Err(CommandFormatError(format!(
                            "Node '{name}' has no type; the prefix does not end on a node type"
                        )));
                    }
                },
            }
        }
        if let Some(node_type) = pending_type {
            return Err(CommandFormatError(format!(
                "The prefix ends on type '{node_type}' which still needs a node name"
            )));
        }
        let mut value = Value::empty_list();
        for (node_type, node_name) in pairs {
            value
                .push_entry(node_type, node_name)
                .map_err(|e| CommandFormatError(e.to_string()))?;
        }
        Ok(value)
    }

    /// The prompt rendering, e.g. `subsystem=web,connector`.
    pub fn format(&self) -> String {
        self.nodes
            .iter()
            .map(|node| match node {
                PrefixNode::TypeName(t, n) => format!("{t}={n}"),
                PrefixNode::TypeOnly(t) => t.clone(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}
