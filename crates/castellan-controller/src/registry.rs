//! The registration trie.
//!
//! A trie keyed by path-address elements. Each node owns a description
//! provider, operation handlers, attribute metadata, child
//! sub-registries (a two-level map: type, then instance), and optionally
//! a proxy controller that absorbs the entire subtree.
//!
//! Handlers registered as `inherited` propagate to every descendant that
//! does not redefine the name; non-inherited handlers match only their
//! exact node. Registration is rare and takes write locks per node;
//! lookups only ever take read locks.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use castellan_value::Value;

use crate::address::{PathAddress, PathElement};
use crate::error::RegistryError;
use crate::handler::{OperationHandler, OperationResult, ResultSink};

/// Produces the description value for a node or operation.
pub trait DescriptionProvider: Send + Sync {
    fn description(&self) -> Value;
}

impl<F> DescriptionProvider for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn description(&self) -> Value {
        self()
    }
}

/// A description provider for nodes nobody bothered to describe.
pub fn no_description() -> Arc<dyn DescriptionProvider> {
    Arc::new(|| Value::Undefined)
}

/// A stand-in registered at an address that forwards every operation
/// under that address to a remote controller, with the address rebased
/// past the proxy anchor.
pub trait ProxyController: Send + Sync {
    /// The address this proxy is anchored at.
    fn proxy_address(&self) -> &PathAddress;

    /// Forwards an operation whose address has already been rebased.
    fn execute(&self, operation: Value, sink: Arc<dyn ResultSink>) -> OperationResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    ReadOnly,
    ReadWrite,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Configuration,
    Runtime,
}

/// Metadata (and optional override handlers) for a registered attribute.
#[derive(Clone)]
pub struct AttributeAccess {
    pub access_type: AccessType,
    pub storage: Storage,
    pub read_handler: Option<Arc<dyn OperationHandler>>,
    pub write_handler: Option<Arc<dyn OperationHandler>>,
}

impl AttributeAccess {
    pub fn read_only(storage: Storage) -> Self {
        AttributeAccess {
            access_type: AccessType::ReadOnly,
            storage,
            read_handler: None,
            write_handler: None,
        }
    }

    pub fn read_write(storage: Storage) -> Self {
        AttributeAccess {
            access_type: AccessType::ReadWrite,
            storage,
            read_handler: None,
            write_handler: None,
        }
    }
}

struct OperationEntry {
    handler: Arc<dyn OperationHandler>,
    description: Arc<dyn DescriptionProvider>,
    inherited: bool,
}

/// One node of the registration trie.
pub struct NodeRegistration {
    element: Option<PathElement>,
    parent: Weak<NodeRegistration>,
    description: Arc<dyn DescriptionProvider>,
    operations: RwLock<HashMap<String, OperationEntry>>,
    attributes: RwLock<HashMap<String, AttributeAccess>>,
    children: RwLock<HashMap<String, HashMap<String, Arc<NodeRegistration>>>>,
    proxy: RwLock<Option<Arc<dyn ProxyController>>>,
}

impl NodeRegistration {
    /// Creates the root of a registration trie.
    pub fn root(description: Arc<dyn DescriptionProvider>) -> Arc<NodeRegistration> {
        Arc::new(NodeRegistration {
            element: None,
            parent: Weak::new(),
            description,
            operations: RwLock::new(HashMap::new()),
            attributes: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            proxy: RwLock::new(None),
        })
    }

    fn child_node(
        self: &Arc<Self>,
        element: PathElement,
        description: Arc<dyn DescriptionProvider>,
    ) -> Arc<NodeRegistration> {
        Arc::new(NodeRegistration {
            element: Some(element),
            parent: Arc::downgrade(self),
            description,
            operations: RwLock::new(HashMap::new()),
            attributes: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            proxy: RwLock::new(None),
        })
    }

    /// Canonical location of this node, rendered from the parent chain.
    /// Used in diagnostics only.
    pub fn location_string(&self) -> String {
        let own = match &self.element {
            Some(e) => format!("({} => {})", e.key(), e.value()),
            None => return "<root>".to_string(),
        };
        match self.parent.upgrade() {
            Some(parent) if parent.element.is_some() => {
                format!("{}{}", parent.location_string(), own)
            }
            _ => own,
        }
    }

    // ------------------------------------------------------------ register

    /// Registers a child model node and returns its registration for
    /// further population.
    pub fn register_sub_model(
        self: &Arc<Self>,
        element: PathElement,
        description: Arc<dyn DescriptionProvider>,
    ) -> Result<Arc<NodeRegistration>, RegistryError> {
        if self.proxy.read().is_some() {
            return Err(RegistryError::ProxyOwnsSubtree(self.location_string()));
        }
        let mut children = self.children.write();
        let by_value = children.entry(element.key().to_string()).or_default();
        if by_value.contains_key(element.value()) {
            return Err(RegistryError::DuplicateChild(format!(
                "{}({} => {})",
                self.location_string(),
                element.key(),
                element.value()
            )));
        }
        let node = self.child_node(element.clone(), description);
        by_value.insert(element.value().to_string(), Arc::clone(&node));
        debug!(location = %node.location_string(), "registered sub-model");
        Ok(node)
    }

    /// Registers an operation handler at this node. Inherited handlers
    /// propagate to every descendant that does not redefine the name.
    pub fn register_operation_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
        description: Arc<dyn DescriptionProvider>,
        inherited: bool,
    ) -> Result<(), RegistryError> {
        if self.proxy.read().is_some() {
            return Err(RegistryError::ProxyOwnsSubtree(self.location_string()));
        }
        let name = name.into();
        let mut operations = self.operations.write();
        if operations.contains_key(&name) {
            return Err(RegistryError::DuplicateOperation {
                name,
                location: self.location_string(),
            });
        }
        operations.insert(
            name,
            OperationEntry {
                handler,
                description,
                inherited,
            },
        );
        Ok(())
    }

    pub fn unregister_operation_handler(&self, name: &str) -> Result<(), RegistryError> {
        match self.operations.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NoSuchNode(format!(
                "{} has no operation {name}",
                self.location_string()
            ))),
        }
    }

    /// Registers attribute metadata at this node.
    pub fn register_attribute(
        &self,
        name: impl Into<String>,
        access: AttributeAccess,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut attributes = self.attributes.write();
        if attributes.contains_key(&name) {
            return Err(RegistryError::DuplicateAttribute {
                name,
                location: self.location_string(),
            });
        }
        attributes.insert(name, access);
        Ok(())
    }

    /// Registers a proxy controller at `address` below this node. The
    /// proxy absorbs the whole subtree: local registration beneath it is
    /// forbidden, and pre-existing registrations there reject the proxy.
    pub fn register_proxy_controller(
        self: &Arc<Self>,
        address: &PathAddress,
        proxy: Arc<dyn ProxyController>,
    ) -> Result<(), RegistryError> {
        if address.is_empty() {
            return Err(RegistryError::ProxyConflict("<root>".to_string()));
        }
        let mut current = Arc::clone(self);
        for element in address.iter() {
            if current.proxy.read().is_some() {
                return Err(RegistryError::ProxyOwnsSubtree(current.location_string()));
            }
            let existing = current
                .children
                .read()
                .get(element.key())
                .and_then(|m| m.get(element.value()))
                .cloned();
            current = match existing {
                Some(node) => node,
                None => {
                    let node = current.child_node(element.clone(), no_description());
                    current
                        .children
                        .write()
                        .entry(element.key().to_string())
                        .or_default()
                        .insert(element.value().to_string(), Arc::clone(&node));
                    node
                }
            };
        }
        if current.proxy.read().is_some()
            || !current.operations.read().is_empty()
            || !current.attributes.read().is_empty()
            || !current.children.read().is_empty()
        {
            return Err(RegistryError::ProxyConflict(current.location_string()));
        }
        *current.proxy.write() = Some(proxy);
        debug!(location = %current.location_string(), "registered proxy controller");
        Ok(())
    }

    pub fn unregister_proxy_controller(
        self: &Arc<Self>,
        address: &PathAddress,
    ) -> Result<(), RegistryError> {
        let node = self
            .node_at(address)
            .ok_or_else(|| RegistryError::NoSuchNode(address.to_string()))?;
        let mut proxy = node.proxy.write();
        if proxy.take().is_none() {
            return Err(RegistryError::NoSuchNode(format!(
                "no proxy registered at {address}"
            )));
        }
        Ok(())
    }

    /// Removes a child model registration.
    pub fn unregister_sub_model(&self, element: &PathElement) -> Result<(), RegistryError> {
        let mut children = self.children.write();
        let removed = children
            .get_mut(element.key())
            .and_then(|m| m.remove(element.value()));
        match removed {
            Some(_) => Ok(()),
            None => Err(RegistryError::NoSuchNode(format!(
                "{}({} => {})",
                self.location_string(),
                element.key(),
                element.value()
            ))),
        }
    }

    // ------------------------------------------------------------- lookups

    fn node_at(self: &Arc<Self>, address: &PathAddress) -> Option<Arc<NodeRegistration>> {
        let mut current = Arc::clone(self);
        for element in address.iter() {
            let next = current
                .children
                .read()
                .get(element.key())
                .and_then(|m| m.get(element.value()))
                .cloned()?;
            current = next;
        }
        Some(current)
    }

    /// The handler for `(address, name)`: the most specific non-inherited
    /// handler, else the nearest inherited ancestor handler. Proxied
    /// subtrees have no local handlers.
    pub fn operation_handler(
        self: &Arc<Self>,
        address: &PathAddress,
        name: &str,
    ) -> Option<Arc<dyn OperationHandler>> {
        let mut inherited: Option<Arc<dyn OperationHandler>> = None;
        let mut current = Arc::clone(self);
        for element in address.iter() {
            if current.proxy.read().is_some() {
                return None;
            }
            if let Some(entry) = current.operations.read().get(name) {
                if entry.inherited {
                    inherited = Some(Arc::clone(&entry.handler));
                }
            }
            let next = current
                .children
                .read()
                .get(element.key())
                .and_then(|m| m.get(element.value()))
                .cloned();
            current = match next {
                Some(node) => node,
                None => return inherited,
            };
        }
        if current.proxy.read().is_some() {
            return None;
        }
        if let Some(entry) = current.operations.read().get(name) {
            return Some(Arc::clone(&entry.handler));
        }
        inherited
    }

    /// The description of `(address, name)`, following the same
    /// resolution as [`NodeRegistration::operation_handler`].
    pub fn operation_description(
        self: &Arc<Self>,
        address: &PathAddress,
        name: &str,
    ) -> Option<Value> {
        let mut inherited: Option<Arc<dyn DescriptionProvider>> = None;
        let mut current = Arc::clone(self);
        for element in address.iter() {
            if let Some(entry) = current.operations.read().get(name) {
                if entry.inherited {
                    inherited = Some(Arc::clone(&entry.description));
                }
            }
            let next = current
                .children
                .read()
                .get(element.key())
                .and_then(|m| m.get(element.value()))
                .cloned();
            current = match next {
                Some(node) => node,
                None => return inherited.map(|d| d.description()),
            };
        }
        if let Some(entry) = current.operations.read().get(name) {
            return Some(entry.description.description());
        }
        inherited.map(|d| d.description())
    }

    /// Every operation name visible at `address`, inherited names
    /// included, sorted for stable output.
    pub fn operation_names(self: &Arc<Self>, address: &PathAddress) -> Vec<String> {
        let mut names = std::collections::BTreeSet::new();
        let mut current = Arc::clone(self);
        for element in address.iter() {
            for (name, entry) in current.operations.read().iter() {
                if entry.inherited {
                    names.insert(name.clone());
                }
            }
            let next = current
                .children
                .read()
                .get(element.key())
                .and_then(|m| m.get(element.value()))
                .cloned();
            current = match next {
                Some(node) => node,
                None => return names.into_iter().collect(),
            };
        }
        for name in current.operations.read().keys() {
            names.insert(name.clone());
        }
        names.into_iter().collect()
    }

    /// Attribute metadata at the exact node; attributes do not inherit.
    pub fn attribute_access(
        self: &Arc<Self>,
        address: &PathAddress,
        name: &str,
    ) -> Option<AttributeAccess> {
        self.node_at(address)
            .and_then(|node| node.attributes.read().get(name).cloned())
    }

    pub fn attribute_names(self: &Arc<Self>, address: &PathAddress) -> Vec<String> {
        match self.node_at(address) {
            Some(node) => {
                let mut names: Vec<String> = node.attributes.read().keys().cloned().collect();
                names.sort();
                names
            }
            None => Vec::new(),
        }
    }

    /// The model description at `address`.
    pub fn model_description(self: &Arc<Self>, address: &PathAddress) -> Option<Value> {
        self.node_at(address).map(|node| node.description.description())
    }

    /// Registered child type names at `address`.
    pub fn child_names(self: &Arc<Self>, address: &PathAddress) -> Vec<String> {
        match self.node_at(address) {
            Some(node) => {
                let mut names: Vec<String> = node.children.read().keys().cloned().collect();
                names.sort();
                names
            }
            None => Vec::new(),
        }
    }

    /// Registered `(type, instance)` child elements at `address`.
    pub fn child_addresses(self: &Arc<Self>, address: &PathAddress) -> Vec<PathElement> {
        match self.node_at(address) {
            Some(node) => {
                let mut elements: Vec<PathElement> = node
                    .children
                    .read()
                    .iter()
                    .flat_map(|(key, by_value)| {
                        by_value
                            .keys()
                            .map(|value| PathElement::new(key.clone(), value.clone()))
                            .collect::<Vec<_>>()
                    })
                    .collect();
                elements.sort_by(|a, b| {
                    (a.key(), a.value()).cmp(&(b.key(), b.value()))
                });
                elements
            }
            None => Vec::new(),
        }
    }

    /// The proxy owning `address`, if any node on the walk (the target
    /// included) carries one.
    pub fn proxy_controller(
        self: &Arc<Self>,
        address: &PathAddress,
    ) -> Option<Arc<dyn ProxyController>> {
        let mut current = Arc::clone(self);
        if let Some(proxy) = current.proxy.read().clone() {
            return Some(proxy);
        }
        for element in address.iter() {
            let next = current
                .children
                .read()
                .get(element.key())
                .and_then(|m| m.get(element.value()))
                .cloned()?;
            current = next;
            if let Some(proxy) = current.proxy.read().clone() {
                return Some(proxy);
            }
        }
        None
    }

    /// All proxies registered in the subtree rooted at `address`.
    pub fn proxy_controllers(
        self: &Arc<Self>,
        address: &PathAddress,
    ) -> Vec<Arc<dyn ProxyController>> {
        let mut out = Vec::new();
        if let Some(node) = self.node_at(address) {
            collect_proxies(&node, &mut out);
        }
        out
    }
}

fn collect_proxies(node: &Arc<NodeRegistration>, out: &mut Vec<Arc<dyn ProxyController>>) {
    if let Some(proxy) = node.proxy.read().clone() {
        out.push(proxy);
    }
    let children = node.children.read();
    for by_value in children.values() {
        for child in by_value.values() {
            collect_proxies(child, out);
        }
    }
}
