//! Host ↔ domain federation.
//!
//! A host controller registers with the domain controller over a single
//! long-lived connection: `PARAM_HOST_ID` + name up, `PARAM_MODEL` +
//! the domain's model snapshot back. The domain then owns that
//! connection and forwards every operation addressed under
//! `(host => <name>)` down it, rebased past the anchor, as synchronous
//! executions the host serves against its local controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use castellan_controller::keys;
use castellan_controller::{
    BasicController, ModelController, OperationResult, PathAddress, PathElement, ProxyController,
    RegistryError, ResultSink,
};
use castellan_value::Value;

use crate::codes;
use crate::error::ProtocolError;
use crate::server::reject;
use crate::stream::{expect_header, read_u8, read_utfz, read_value, write_utfz, write_value};

/// Default connect timeout for outbound federation connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the protocol layer needs from a domain controller to accept
/// host registrations.
pub trait DomainControllerPort: Send + Sync {
    fn register_host_proxy(
        &self,
        name: &str,
        proxy: Arc<dyn ProxyController>,
    ) -> Result<(), RegistryError>;

    fn unregister_host_proxy(&self, name: &str) -> Result<(), RegistryError>;

    /// Deep clone of the current root model, handed to the registering
    /// host.
    fn model_snapshot(&self) -> Value;
}

impl DomainControllerPort for BasicController {
    fn register_host_proxy(
        &self,
        name: &str,
        proxy: Arc<dyn ProxyController>,
    ) -> Result<(), RegistryError> {
        self.registry()
            .register_proxy_controller(&host_anchor(name), proxy)
    }

    fn unregister_host_proxy(&self, name: &str) -> Result<(), RegistryError> {
        self.registry()
            .unregister_proxy_controller(&host_anchor(name))
    }

    fn model_snapshot(&self) -> Value {
        BasicController::model_snapshot(self)
    }
}

fn host_anchor(name: &str) -> PathAddress {
    PathAddress::new(vec![PathElement::new("host", name)])
}

struct ProxyRequest {
    operation: Value,
    reply: oneshot::Sender<Result<Value, ProtocolError>>,
}

/// Domain-side stand-in for a registered host controller. Operations
/// handed to it travel down the host's registration connection as
/// synchronous executions.
///
/// `execute` blocks on the reply and therefore must run on a blocking
/// thread, which is where the controller dispatches handlers anyway.
struct RemoteHostProxy {
    anchor: PathAddress,
    requests: mpsc::UnboundedSender<ProxyRequest>,
}

impl ProxyController for RemoteHostProxy {
    fn proxy_address(&self) -> &PathAddress {
        &self.anchor
    }

    fn execute(&self, operation: Value, sink: Arc<dyn ResultSink>) -> OperationResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .requests
            .send(ProxyRequest {
                operation,
                reply: reply_tx,
            })
            .is_err()
        {
            sink.failed(Value::from("host controller connection is closed"));
            return OperationResult::empty();
        }
        match reply_rx.blocking_recv() {
            Ok(Ok(envelope)) => apply_remote_envelope(envelope, &sink),
            Ok(Err(e)) => {
                sink.failed(Value::from(format!("forwarding to host failed: {e}")));
                OperationResult::empty()
            }
            Err(_) => {
                sink.failed(Value::from("host controller connection dropped mid-request"));
                OperationResult::empty()
            }
        }
    }
}

/// Replays a remote result envelope into a local sink, lifting out the
/// compensating operation.
pub(crate) fn apply_remote_envelope(
    envelope: Value,
    sink: &Arc<dyn ResultSink>,
) -> OperationResult {
    let outcome = envelope
        .find(keys::OUTCOME)
        .and_then(|o| o.as_str().ok())
        .unwrap_or("failed");
    match outcome {
        keys::SUCCESS => {
            let compensating = envelope
                .find(keys::COMPENSATING_OPERATION)
                .filter(|c| c.is_defined())
                .cloned();
            if let Some(result) = envelope.find(keys::RESULT) {
                if result.is_defined() {
                    sink.fragment(&[], result.clone());
                }
            }
            sink.complete();
            OperationResult {
                compensating,
                cancel: castellan_controller::CancelHandle::uncancellable(),
            }
        }
        keys::CANCELLED => {
            sink.cancelled();
            OperationResult::empty()
        }
        _ => {
            let description = envelope
                .find(keys::FAILURE_DESCRIPTION)
                .filter(|d| d.is_defined())
                .cloned()
                .unwrap_or_else(|| Value::from("remote operation failed"));
            sink.failed(description);
            OperationResult::empty()
        }
    }
}

/// Serves one request on the domain handler id: host registration (the
/// connection then stays open as the forwarding channel) or
/// unregistration.
pub(crate) async fn handle_domain_request(
    mut stream: TcpStream,
    domain: Arc<dyn DomainControllerPort>,
) -> Result<(), ProtocolError> {
    expect_header(&mut stream, codes::REQUEST_OPERATION).await?;
    let code = read_u8(&mut stream).await?;
    match code {
        codes::REGISTER_HOST_CONTROLLER_REQUEST => {
            expect_header(&mut stream, codes::PARAM_HOST_ID).await?;
            let name = read_utfz(&mut stream).await?;

            let (requests_tx, requests_rx) = mpsc::unbounded_channel();
            let proxy = Arc::new(RemoteHostProxy {
                anchor: host_anchor(&name),
                requests: requests_tx,
            });
            if let Err(e) = domain.register_host_proxy(&name, proxy) {
                warn!(host = %name, "host registration rejected: {e}");
                reject(&mut stream, &e.to_string()).await?;
                return Ok(());
            }
            info!(host = %name, "host controller registered");

            stream
                .write_all(&[codes::REGISTER_HOST_CONTROLLER_RESPONSE, codes::PARAM_MODEL])
                .await?;
            write_value(&mut stream, &domain.model_snapshot()).await?;
            stream.flush().await?;

            let served = forward_host_operations(stream, requests_rx).await;
            if let Err(e) = domain.unregister_host_proxy(&name) {
                debug!(host = %name, "unregister after disconnect: {e}");
            }
            info!(host = %name, "host controller connection closed");
            served
        }
        codes::UNREGISTER_HOST_CONTROLLER_REQUEST => {
            expect_header(&mut stream, codes::PARAM_HOST_ID).await?;
            let name = read_utfz(&mut stream).await?;
            if let Err(e) = domain.unregister_host_proxy(&name) {
                debug!(host = %name, "unregister: {e}");
            }
            stream
                .write_all(&[codes::UNREGISTER_HOST_CONTROLLER_RESPONSE])
                .await?;
            stream.flush().await?;
            Ok(())
        }
        other => {
            reject(&mut stream, &format!("unknown request code 0x{other:02x}")).await?;
            Err(ProtocolError::UnknownRequestCode(other))
        }
    }
}

/// Owns the registration connection on the domain side, turning proxy
/// requests into synchronous executions on the wire.
async fn forward_host_operations(
    mut stream: TcpStream,
    mut requests: mpsc::UnboundedReceiver<ProxyRequest>,
) -> Result<(), ProtocolError> {
    while let Some(request) = requests.recv().await {
        let exchanged: Result<Value, ProtocolError> = async {
            stream
                .write_all(&[
                    codes::HANDLER_HOST,
                    codes::REQUEST_OPERATION,
                    codes::EXECUTE_SYNCHRONOUS_REQUEST,
                    codes::PARAM_OPERATION,
                ])
                .await?;
            write_value(&mut stream, &request.operation).await?;
            stream.flush().await?;

            let code = read_u8(&mut stream).await?;
            if code == codes::PROTOCOL_ERROR_RESPONSE {
                return Err(ProtocolError::Rejected(read_utfz(&mut stream).await?));
            }
            if code != codes::EXECUTE_SYNCHRONOUS_RESPONSE {
                return Err(ProtocolError::UnexpectedResponseCode(code));
            }
            expect_header(&mut stream, codes::PARAM_OPERATION).await?;
            read_value(&mut stream).await
        }
        .await;

        let broken = exchanged.is_err();
        let _ = request.reply.send(exchanged);
        if broken {
            return Err(ProtocolError::ConnectionClosed);
        }
    }
    Ok(())
}

/// Host-side client of a domain controller.
pub struct DomainConnection {
    address: SocketAddr,
    host_name: String,
    connect_timeout: Duration,
}

impl DomainConnection {
    pub fn new(address: SocketAddr, host_name: impl Into<String>) -> Self {
        DomainConnection {
            address,
            host_name: host_name.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Registers this host with the domain controller. Returns the
    /// domain's root model snapshot; the connection stays open serving
    /// forwarded operations against `controller` until either side
    /// closes it.
    pub async fn register(
        &self,
        controller: Arc<dyn ModelController>,
    ) -> Result<Value, ProtocolError> {
        let mut stream = self.connect().await?;
        stream
            .write_all(&[
                codes::HANDLER_DOMAIN,
                codes::REQUEST_OPERATION,
                codes::REGISTER_HOST_CONTROLLER_REQUEST,
                codes::PARAM_HOST_ID,
            ])
            .await?;
        write_utfz(&mut stream, &self.host_name).await?;
        stream.flush().await?;

        let code = read_u8(&mut stream).await?;
        if code == codes::PROTOCOL_ERROR_RESPONSE {
            return Err(ProtocolError::Rejected(read_utfz(&mut stream).await?));
        }
        if code != codes::REGISTER_HOST_CONTROLLER_RESPONSE {
            return Err(ProtocolError::UnexpectedResponseCode(code));
        }
        expect_header(&mut stream, codes::PARAM_MODEL).await?;
        let model = read_value(&mut stream).await?;
        info!(host = %self.host_name, domain = %self.address, "registered with domain controller");

        let host = self.host_name.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_forwarded_operations(stream, controller).await {
                match e {
                    ProtocolError::ConnectionClosed => {
                        info!(host = %host, "domain controller connection closed")
                    }
                    other => warn!(host = %host, "domain connection failed: {other}"),
                }
            }
        });
        Ok(model)
    }

    /// Tells the domain controller to drop this host's registration.
    pub async fn unregister(&self) -> Result<(), ProtocolError> {
        let mut stream = self.connect().await?;
        stream
            .write_all(&[
                codes::HANDLER_DOMAIN,
                codes::REQUEST_OPERATION,
                codes::UNREGISTER_HOST_CONTROLLER_REQUEST,
                codes::PARAM_HOST_ID,
            ])
            .await?;
        write_utfz(&mut stream, &self.host_name).await?;
        stream.flush().await?;

        let code = read_u8(&mut stream).await?;
        if code == codes::PROTOCOL_ERROR_RESPONSE {
            return Err(ProtocolError::Rejected(read_utfz(&mut stream).await?));
        }
        if code != codes::UNREGISTER_HOST_CONTROLLER_RESPONSE {
            return Err(ProtocolError::UnexpectedResponseCode(code));
        }
        Ok(())
    }

    async fn connect(&self) -> Result<TcpStream, ProtocolError> {
        timeout(self.connect_timeout, TcpStream::connect(self.address))
            .await
            .map_err(|_| ProtocolError::ConnectTimeout)?
            .map_err(ProtocolError::Io)
    }
}

/// Host-side loop answering operations the domain forwards down the
/// registration connection.
async fn serve_forwarded_operations(
    mut stream: TcpStream,
    controller: Arc<dyn ModelController>,
) -> Result<(), ProtocolError> {
    loop {
        let handler_id = read_u8(&mut stream).await?;
        if handler_id != codes::HANDLER_HOST {
            reject(&mut stream, &format!("unknown handler id 0x{handler_id:02x}")).await?;
            return Err(ProtocolError::UnknownHandlerId(handler_id));
        }
        expect_header(&mut stream, codes::REQUEST_OPERATION).await?;
        expect_header(&mut stream, codes::EXECUTE_SYNCHRONOUS_REQUEST).await?;
        expect_header(&mut stream, codes::PARAM_OPERATION).await?;
        let operation = read_value(&mut stream).await?;
        debug!(
            operation = %operation.find(keys::OP).unwrap_or(&castellan_value::Value::Undefined),
            "serving operation forwarded by the domain controller"
        );

        let local = Arc::clone(&controller);
        let envelope = tokio::task::spawn_blocking(move || local.execute(operation))
            .await
            .map_err(|e| ProtocolError::Io(std::io::Error::other(e)))?;

        stream
            .write_all(&[codes::EXECUTE_SYNCHRONOUS_RESPONSE, codes::PARAM_OPERATION])
            .await?;
        write_value(&mut stream, &envelope).await?;
        stream.flush().await?;
    }
}
