//! Translation between HTTP requests and management operations.
//!
//! A GET turns path segments into `(type, name)` address pairs and the
//! query string into operation parameters; a POST body *is* the
//! operation, as JSON or base64-wrapped binary.

use castellan_controller::keys;
use castellan_value::{Value, ValueError};

/// GET operation aliases; anything else falls back to `read-resource`.
fn map_get_operation(alias: &str) -> Option<&'static str> {
    match alias {
        "resource" => Some(keys::READ_RESOURCE),
        "attribute" => Some(keys::READ_ATTRIBUTE),
        "resource-description" => Some(keys::READ_RESOURCE_DESCRIPTION),
        "operation-description" => Some(keys::READ_OPERATION_DESCRIPTION),
        "operation-names" => Some(keys::READ_OPERATION_NAMES),
        _ => None,
    }
}

/// Builds the operation for `GET {path}?{query}`. `path` is the part
/// after the API context, e.g. `/subsystem/web`.
pub fn convert_get_request(path: &str, query: Option<&str>) -> Result<Value, ValueError> {
    let segments = decode_path(path);
    let parameters = decode_query(query.unwrap_or(""));

    let mut operation_set = false;
    let mut dmr = Value::empty_object();
    for (key, value) in parameters {
        if key == keys::OP {
            match map_get_operation(&value) {
                Some(real) => {
                    dmr.insert(keys::OP, real)?;
                    operation_set = true;
                }
                // unrecognized alias: drop it, the default applies
                None => continue,
            }
            continue;
        }
        dmr.insert(key, value)?;
    }

    if !operation_set {
        dmr.insert(keys::OP, keys::READ_RESOURCE)?;
    }
    let is_read_resource = dmr
        .find(keys::OP)
        .and_then(|v| v.as_str().ok().map(|s| s == keys::READ_RESOURCE))
        .unwrap_or(false);
    if is_read_resource && !dmr.has(keys::RECURSIVE) {
        dmr.insert(keys::RECURSIVE, false)?;
    }

    // pair segments into (type, name) address elements; a trailing odd
    // segment is ignored
    let mut address = Value::empty_list();
    let mut i = 0;
    while i + 1 < segments.len() {
        address.push_entry(segments[i].clone(), segments[i + 1].clone())?;
        i += 2;
    }
    dmr.insert(keys::OP_ADDR, address)?;
    Ok(dmr)
}

/// Parses a POST body: base64-wrapped binary when the client sent
/// `application/dmr-encoded`, JSON otherwise.
pub fn convert_post_request(body: &[u8], dmr_encoded: bool) -> Result<Value, String> {
    if dmr_encoded {
        let text = std::str::from_utf8(body).map_err(|e| e.to_string())?;
        Value::from_base64(text).map_err(|e| e.to_string())
    } else {
        Value::from_json_slice(body).map_err(|e| e.to_string())
    }
}

fn decode_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(unescape)
        .collect()
}

fn decode_query(query: &str) -> Vec<(String, String)> {
    let mut parameters = Vec::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => parameters.push((unescape(key), unescape(value))),
            // a bare key is a boolean flag
            None => parameters.push((unescape(pair), "true".to_string())),
        }
    }
    parameters
}

/// Percent-decoding with `+`-as-space, tolerant of malformed escapes.
fn unescape(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_digit(bytes.get(i + 1)), hex_digit(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: Option<&u8>) -> Option<u8> {
    byte.and_then(|b| (*b as char).to_digit(16)).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_defaults_to_non_recursive_read_resource() {
        let op = convert_get_request("/subsystem/web", None).unwrap();
        assert_eq!(op.require(keys::OP).unwrap().as_str().unwrap(), keys::READ_RESOURCE);
        assert!(!op.require(keys::RECURSIVE).unwrap().as_bool().unwrap());
        let address = op.require(keys::OP_ADDR).unwrap().as_list().unwrap();
        assert_eq!(address.len(), 1);
        assert_eq!(
            address[0].require("subsystem").unwrap().as_str().unwrap(),
            "web"
        );
    }

    #[test]
    fn test_get_operation_alias_mapping() {
        let op = convert_get_request("/subsystem/web", Some("operation=attribute&name=port"))
            .unwrap();
        assert_eq!(op.require(keys::OP).unwrap().as_str().unwrap(), keys::READ_ATTRIBUTE);
        assert_eq!(op.require("name").unwrap().as_str().unwrap(), "port");
        // read-attribute is not read-resource, so no recursive default
        assert!(!op.has(keys::RECURSIVE));
    }

    #[test]
    fn test_unknown_get_operation_falls_back() {
        let op = convert_get_request("/", Some("operation=read-resource")).unwrap();
        assert_eq!(op.require(keys::OP).unwrap().as_str().unwrap(), keys::READ_RESOURCE);
    }

    #[test]
    fn test_bare_query_key_is_a_flag() {
        let op = convert_get_request("/", Some("recursive")).unwrap();
        assert_eq!(op.require(keys::RECURSIVE).unwrap().as_str().unwrap(), "true");
    }

    #[test]
    fn test_percent_and_plus_decoding() {
        let op = convert_get_request("/subsystem/my%20app", Some("name=a+b%26c")).unwrap();
        let address = op.require(keys::OP_ADDR).unwrap().as_list().unwrap();
        assert_eq!(
            address[0].require("subsystem").unwrap().as_str().unwrap(),
            "my app"
        );
        assert_eq!(op.require("name").unwrap().as_str().unwrap(), "a b&c");
    }

    #[test]
    fn test_trailing_odd_segment_ignored() {
        let op = convert_get_request("/subsystem/web/connector", None).unwrap();
        let address = op.require(keys::OP_ADDR).unwrap().as_list().unwrap();
        assert_eq!(address.len(), 1);
    }

    #[test]
    fn test_post_json_body() {
        let op = convert_post_request(br#"{"operation":"read-resource","address":[]}"#, false)
            .unwrap();
        assert_eq!(op.require(keys::OP).unwrap().as_str().unwrap(), keys::READ_RESOURCE);
    }

    #[test]
    fn test_post_dmr_encoded_body() {
        let mut op = Value::empty_object();
        op.insert(keys::OP, keys::READ_RESOURCE).unwrap();
        let body = op.to_base64();
        let parsed = convert_post_request(body.as_bytes(), true).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_post_garbage_is_an_error() {
        assert!(convert_post_request(b"{oops", false).is_err());
        assert!(convert_post_request(b"!!!not base64!!!", true).is_err());
    }
}
