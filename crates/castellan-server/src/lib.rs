//! # Castellan Server
//!
//! Composition root for a management server: builds the model
//! controller, replays the persisted configuration, registers the
//! global operation set, and runs the wire protocol and HTTP gateway.

pub mod config;

use std::sync::Arc;

use tracing::{info, warn};

use castellan_controller::ops::register_global_operations;
use castellan_controller::registry::no_description;
use castellan_controller::{
    keys, BasicController, ConfigurationPersister, FilePersister, ModelController, NullPersister,
};
use castellan_value::Value;

use crate::config::ServerConfig;

/// Builds a controller per the configuration: persister, internal and
/// global operations, then boot replay of the persisted model.
pub fn build_controller(config: &ServerConfig) -> anyhow::Result<Arc<BasicController>> {
    let persister: Arc<dyn ConfigurationPersister> = match &config.model_path {
        Some(path) => {
            info!(path = %path.display(), "persisting model to file");
            Arc::new(FilePersister::new(path))
        }
        None => {
            info!("running with an in-memory model only");
            Arc::new(NullPersister)
        }
    };

    let boot_operations = persister.load()?;
    let controller = Arc::new(BasicController::new(persister));
    controller.register_internal_operations()?;
    register_global_operations(controller.registry())?;

    for operation in boot_operations {
        let name = operation
            .find(keys::OP)
            .cloned()
            .unwrap_or(Value::Undefined);
        let envelope = controller.execute(operation);
        let outcome = envelope
            .find(keys::OUTCOME)
            .and_then(|o| o.as_str().ok().map(str::to_string))
            .unwrap_or_default();
        if outcome != keys::SUCCESS {
            warn!(operation = %name, "boot operation did not apply: {envelope}");
        }
    }
    info!(name = %config.name, "model controller ready");
    Ok(controller)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_replay_restores_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let mut config = ServerConfig::default();
        config.model_path = Some(path.clone());

        // first boot: empty model; write something through an operation
        let controller = build_controller(&config).unwrap();
        let mut op = Value::empty_object();
        op.insert(keys::OP, keys::WRITE_MODEL).unwrap();
        op.insert(keys::OP_ADDR, Value::empty_list()).unwrap();
        let mut model = Value::empty_object();
        model
            .get_mut("subsystem")
            .unwrap()
            .get_mut("web")
            .unwrap()
            .insert("port", 8080)
            .unwrap();
        op.insert(keys::MODEL, model).unwrap();
        let envelope = controller.execute(op);
        assert_eq!(
            envelope.require(keys::OUTCOME).unwrap().as_str().unwrap(),
            "success"
        );
        assert!(path.exists());

        // second boot replays the stored snapshot
        let restarted = build_controller(&config).unwrap();
        let mut read = Value::empty_object();
        read.insert(keys::OP, keys::READ_RESOURCE).unwrap();
        let mut address = Value::empty_list();
        address.push_entry("subsystem", "web").unwrap();
        read.insert(keys::OP_ADDR, address).unwrap();
        let envelope = restarted.execute(read);
        assert_eq!(
            envelope.require(keys::OUTCOME).unwrap().as_str().unwrap(),
            "success"
        );
        assert_eq!(
            envelope
                .require(keys::RESULT)
                .unwrap()
                .require("port")
                .unwrap()
                .as_int()
                .unwrap(),
            8080
        );
    }
}
