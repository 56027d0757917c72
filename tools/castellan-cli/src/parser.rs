//! Parser for the operation request line format:
//!
//! `node-type=node-name [, node-type=node-name]* : operation-name ( [name=value [, name=value]*] )`
//!
//! Whitespace between tokens is insignificant, e.g.
//! `profile=production,subsystem=threads,pool=one:write-core-threads(count=0, per-cpu=20)`.
//!
//! Node types, node names, the operation name, and argument names must
//! be valid identifiers: an alphabetic, `_`, or `$` first character,
//! then alphanumerics, `_`, `$`, or `-`. A bare node token without a
//! `type=name` separator is accepted as a node name completing the
//! prefix's trailing type.

use thiserror::Error;

pub const FORMAT: &str =
    "node-type=node-name [, node-type=node-name]* : operation-name ( [name=value [, name=value]*] )";

pub const NODE_SEPARATOR: char = ',';
pub const ADDRESS_OPERATION_SEPARATOR: char = ':';
pub const NODE_TYPE_NAME_SEPARATOR: char = '=';
pub const ARG_LIST_START: char = '(';
pub const ARG_LIST_END: char = ')';
pub const ARG_SEPARATOR: char = ',';
pub const ARG_NAME_VALUE_SEPARATOR: char = '=';

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CommandFormatError(pub String);

/// One element of the address part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressNode {
    TypeName(String, String),
    /// A bare token; pairs with the prefix's trailing node type.
    NameOnly(String),
}

/// A parsed operation request line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OperationRequest {
    pub address: Vec<AddressNode>,
    pub operation: String,
    pub arguments: Vec<(String, String)>,
}

pub fn is_valid_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '-')
}

pub fn parse(cmd: &str) -> Result<OperationRequest, CommandFormatError> {
    let cmd = cmd.trim();
    let mut request = OperationRequest::default();

    let arg_list_start = cmd.find(ARG_LIST_START);
    let mut addr_sep = cmd.find(ADDRESS_OPERATION_SEPARATOR);
    if let (Some(colon), Some(paren)) = (addr_sep, arg_list_start) {
        if colon > paren {
            // the colon belongs to an argument value
            addr_sep = None;
        }
    }

    if let Some(sep) = addr_sep.filter(|sep| *sep > 0) {
        let address = cmd[..sep].trim();
        if address.is_empty() {
            return Err(CommandFormatError(format!(
                "The address part is missing. Command '{cmd}' doesn't follow the format {FORMAT}"
            )));
        }
        for node in address.split(NODE_SEPARATOR) {
            let node = node.trim();
            if node.is_empty() {
                return Err(CommandFormatError(format!(
                    "Node name is missing or the format is wrong for the address string '{address}'"
                )));
            }
            match node.split_once(NODE_TYPE_NAME_SEPARATOR) {
                None => {
                    // the prefix must end on the node type
                    request.address.push(AddressNode::NameOnly(node.to_string()));
                }
                Some((node_type, node_name)) => {
                    let node_type = node_type.trim();
                    let node_name = node_name.trim();
                    if node_type.is_empty() {
                        return Err(CommandFormatError(format!(
                            "The node type is missing for the node '{node}'"
                        )));
                    }
                    if !is_valid_identifier(node_type) {
                        return Err(CommandFormatError(format!(
                            "The node type is not a valid identifier '{node_type}'"
                        )));
                    }
                    if node_name.is_empty() {
                        return Err(CommandFormatError(format!(
                            "The node name is missing for the node '{node}'"
                        )));
                    }
                    if !is_valid_identifier(node_name) {
                        return Err(CommandFormatError(format!(
                            "The node name is not a valid identifier '{node_name}'"
                        )));
                    }
                    request.address.push(AddressNode::TypeName(
                        node_type.to_string(),
                        node_name.to_string(),
                    ));
                }
            }
        }
    }

    let op_start = addr_sep.map(|sep| sep + 1).unwrap_or(0);
    let operation = match arg_list_start {
        None => {
            if cmd[op_start..].contains(ARG_LIST_END) {
                return Err(CommandFormatError(format!(
                    "Couldn't locate '{ARG_LIST_START}' but found '{ARG_LIST_END}'. \
                     Command '{cmd}' doesn't follow the format {FORMAT}"
                )));
            }
            cmd[op_start..].trim()
        }
        Some(paren) => cmd[op_start..paren].trim(),
    };
    if operation.is_empty() {
        return Err(CommandFormatError(format!(
            "The operation name is missing: '{cmd}'"
        )));
    }
    if !is_valid_identifier(operation) {
        return Err(CommandFormatError(format!(
            "Operation name '{operation}' is not a valid identifier \
             or command '{cmd}' doesn't follow the format {FORMAT}"
        )));
    }
    request.operation = operation.to_string();

    if let Some(paren) = arg_list_start {
        let Some(end) = cmd[paren + 1..].find(ARG_LIST_END).map(|i| paren + 1 + i) else {
            return Err(CommandFormatError(format!(
                "Couldn't locate '{ARG_LIST_END}'. Command '{cmd}' doesn't follow the format {FORMAT}"
            )));
        };
        let args = cmd[paren + 1..end].trim();
        if !args.is_empty() {
            for arg in args.split(ARG_SEPARATOR) {
                let arg = arg.trim();
                if arg.is_empty() {
                    return Err(CommandFormatError(format!(
                        "An argument is missing or the command is in the wrong format: '{cmd}'"
                    )));
                }
                let Some((name, value)) = arg.split_once(ARG_NAME_VALUE_SEPARATOR) else {
                    return Err(CommandFormatError(format!(
                        "Couldn't locate '{ARG_NAME_VALUE_SEPARATOR}' in the argument '{arg}'"
                    )));
                };
                let name = name.trim();
                let value = value.trim();
                if name.is_empty() {
                    return Err(CommandFormatError(format!(
                        "The argument name is missing or the format is wrong for argument '{arg}'"
                    )));
                }
                if !is_valid_identifier(name) {
                    return Err(CommandFormatError(format!(
                        "Argument name '{name}' is not a valid identifier"
                    )));
                }
                if value.is_empty() {
                    return Err(CommandFormatError(format!(
                        "The argument value is missing or the format is wrong for argument '{arg}'"
                    )));
                }
                request
                    .arguments
                    .push((name.to_string(), value.to_string()));
            }
        }
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_request() {
        let request = parse(
            "profile=production,subsystem=threads,bounded-queue-thread-pool=pool1\
             :write-core-threads(count=0, per-cpu=20)",
        )
        .unwrap();
        assert_eq!(request.address.len(), 3);
        assert_eq!(
            request.address[2],
            AddressNode::TypeName(
                "bounded-queue-thread-pool".to_string(),
                "pool1".to_string()
            )
        );
        assert_eq!(request.operation, "write-core-threads");
        assert_eq!(
            request.arguments,
            vec![
                ("count".to_string(), "0".to_string()),
                ("per-cpu".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn test_whitespace_is_insignificant() {
        let request =
            parse("  subsystem = web : read-resource ( recursive = true )  ").unwrap();
        assert_eq!(
            request.address,
            vec![AddressNode::TypeName("subsystem".to_string(), "web".to_string())]
        );
        assert_eq!(request.operation, "read-resource");
        assert_eq!(
            request.arguments,
            vec![("recursive".to_string(), "true".to_string())]
        );
    }

    #[test]
    fn test_operation_only() {
        let request = parse("read-resource").unwrap();
        assert!(request.address.is_empty());
        assert_eq!(request.operation, "read-resource");
        assert!(request.arguments.is_empty());
    }

    #[test]
    fn test_empty_argument_list() {
        let request = parse("read-resource()").unwrap();
        assert!(request.arguments.is_empty());
    }

    #[test]
    fn test_bare_node_token_is_a_name() {
        let request = parse("web:read-resource").unwrap();
        assert_eq!(request.address, vec![AddressNode::NameOnly("web".to_string())]);
    }

    #[test]
    fn test_colon_inside_argument_value() {
        let request = parse("start(url=http://localhost:8080)").unwrap();
        assert_eq!(request.operation, "start");
        assert_eq!(
            request.arguments,
            vec![("url".to_string(), "http://localhost:8080".to_string())]
        );
    }

    #[test]
    fn test_invalid_operation_name() {
        assert!(parse("subsystem=web:9bad()").is_err());
    }

    #[test]
    fn test_missing_closing_paren() {
        assert!(parse("read-resource(recursive=true").is_err());
    }

    #[test]
    fn test_close_without_open() {
        assert!(parse("read-resource recursive=true)").is_err());
    }

    #[test]
    fn test_missing_node_name() {
        assert!(parse("subsystem=:read-resource").is_err());
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("read-resource"));
        assert!(is_valid_identifier("_internal"));
        assert!(is_valid_identifier("$sys"));
        assert!(!is_valid_identifier("9lives"));
        assert!(!is_valid_identifier("-leading-dash"));
        assert!(!is_valid_identifier(""));
    }
}
