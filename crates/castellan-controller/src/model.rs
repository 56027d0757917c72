//! Navigation over the live model tree.
//!
//! The tree is a single [`Value`] of object shape guarded by one mutex;
//! writers hold the lock for the whole mutation, readers clone under it.
//! For address `[(k1,v1),(k2,v2)]` the node is `model[k1][v1][k2][v2]`.

use castellan_value::Value;

use crate::address::PathAddress;
use crate::error::ControllerError;

/// Navigates to the node at `address`, creating intermediate objects
/// when `create` is set. Without `create`, a missing step is
/// [`ControllerError::NoSuchResource`].
pub fn navigate_mut<'a>(
    root: &'a mut Value,
    address: &PathAddress,
    create: bool,
) -> Result<&'a mut Value, ControllerError> {
    let mut node = root;
    for (depth, element) in address.iter().enumerate() {
        for part in [element.key(), element.value()] {
            if !create && !node.has(part) {
                return Err(ControllerError::NoSuchResource(
                    address.sub_address_range(0, depth + 1).to_string(),
                ));
            }
            node = node.get_mut(part)?;
        }
    }
    Ok(node)
}

/// Immutable lookup; `None` when any step is missing or undefined.
pub fn find<'a>(root: &'a Value, address: &PathAddress) -> Option<&'a Value> {
    let mut node = root;
    for element in address.iter() {
        for part in [element.key(), element.value()] {
            node = node.find(part)?;
            if !node.is_defined() {
                return None;
            }
        }
    }
    Some(node)
}

/// Deep-clones the node at `address`.
pub fn read_cloned(root: &Value, address: &PathAddress) -> Result<Value, ControllerError> {
    find(root, address)
        .cloned()
        .ok_or_else(|| ControllerError::NoSuchResource(address.to_string()))
}

/// Removes the terminal element at `address`.
pub fn remove(root: &mut Value, address: &PathAddress) -> Result<Value, ControllerError> {
    let last = address
        .last_element()
        .ok_or_else(|| ControllerError::AddressConflict("cannot remove the root".to_string()))?;
    let parent = navigate_mut(root, &address.sub_address_range(0, address.size() - 1), false)?;
    let type_node = parent
        .get_mut(last.key())
        .map_err(|_| ControllerError::NoSuchResource(address.to_string()))?;
    type_node
        .remove(last.value())
        .ok_or_else(|| ControllerError::NoSuchResource(address.to_string()))
}
