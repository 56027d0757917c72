//! The management protocol server.
//!
//! Each connection carries one request: a handler-id byte, the
//! `REQUEST_OPERATION` marker, a request code, and the body. Responses
//! stream back on the same connection. Asynchronous executions get an
//! integer request id (when they do not complete inline) and park a
//! cancellation handle in a server-wide table until their terminal tag
//! goes out; cancel requests arrive on their own connections and hit
//! that table.
//!
//! One task owns each connection, so response frames are serialized
//! structurally; a fragment (tag, location, payload) is always written
//! whole before the next event is drained.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tracing::{debug, info, warn};

use castellan_controller::{CancelHandle, ModelController};
use castellan_value::Value;

use crate::codes;
use crate::error::ProtocolError;
use crate::federation::{self, DomainControllerPort};
use crate::sink::{ChannelSink, SinkEvent};
use crate::stream::{
    expect_header, read_i32, read_u8, read_value, write_bool, write_i32, write_utfz, write_value,
};

pub struct ManagementServer {
    controller: Arc<dyn ModelController>,
    domain: Option<Arc<dyn DomainControllerPort>>,
    request_ids: AtomicI32,
    in_flight: DashMap<i32, CancelHandle>,
}

impl ManagementServer {
    pub fn new(controller: Arc<dyn ModelController>) -> Arc<Self> {
        Arc::new(ManagementServer {
            controller,
            domain: None,
            request_ids: AtomicI32::new(0),
            in_flight: DashMap::new(),
        })
    }

    /// A server that additionally accepts host-controller registrations
    /// on the domain handler id.
    pub fn with_domain(
        controller: Arc<dyn ModelController>,
        domain: Arc<dyn DomainControllerPort>,
    ) -> Arc<Self> {
        Arc::new(ManagementServer {
            controller,
            domain: Some(domain),
            request_ids: AtomicI32::new(0),
            in_flight: DashMap::new(),
        })
    }

    /// Accept loop; runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ProtocolError> {
        info!(addr = ?listener.local_addr().ok(), "management protocol listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    match e {
                        ProtocolError::ConnectionClosed => {}
                        other => debug!(%peer, "connection ended: {other}"),
                    }
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) -> Result<(), ProtocolError> {
        let handler_id = read_u8(&mut stream).await?;
        match handler_id {
            codes::HANDLER_CONTROLLER | codes::HANDLER_HOST => {
                self.handle_controller_request(stream).await
            }
            codes::HANDLER_DOMAIN => match self.domain.as_ref() {
                Some(domain) => {
                    federation::handle_domain_request(stream, Arc::clone(domain)).await
                }
                None => {
                    reject(&mut stream, "this endpoint is not a domain controller").await?;
                    Err(ProtocolError::UnknownHandlerId(handler_id))
                }
            },
            other => {
                reject(&mut stream, &format!("unknown handler id 0x{other:02x}")).await?;
                Err(ProtocolError::UnknownHandlerId(other))
            }
        }
    }

    async fn handle_controller_request(
        self: Arc<Self>,
        mut stream: TcpStream,
    ) -> Result<(), ProtocolError> {
        expect_header(&mut stream, codes::REQUEST_OPERATION).await?;
        let code = read_u8(&mut stream).await?;
        match code {
            codes::EXECUTE_SYNCHRONOUS_REQUEST => self.execute_synchronous(stream).await,
            codes::EXECUTE_ASYNCHRONOUS_REQUEST => self.execute_asynchronous(stream).await,
            codes::CANCEL_ASYNCHRONOUS_OPERATION_REQUEST => self.cancel_operation(stream).await,
            other => {
                reject(&mut stream, &format!("unknown request code 0x{other:02x}")).await?;
                Err(ProtocolError::UnknownRequestCode(other))
            }
        }
    }

    async fn execute_synchronous(
        self: Arc<Self>,
        mut stream: TcpStream,
    ) -> Result<(), ProtocolError> {
        expect_header(&mut stream, codes::PARAM_OPERATION).await?;
        let operation = read_value(&mut stream).await?;
        debug!(
            operation = %operation.find("operation").unwrap_or(&castellan_value::Value::Undefined),
            "executing synchronous request"
        );

        let controller = Arc::clone(&self.controller);
        let envelope = task::spawn_blocking(move || controller.execute(operation))
            .await
            .map_err(join_error)?;

        stream
            .write_all(&[codes::EXECUTE_SYNCHRONOUS_RESPONSE, codes::PARAM_OPERATION])
            .await?;
        write_value(&mut stream, &envelope).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn execute_asynchronous(
        self: Arc<Self>,
        mut stream: TcpStream,
    ) -> Result<(), ProtocolError> {
        expect_header(&mut stream, codes::PARAM_OPERATION).await?;
        let operation = read_value(&mut stream).await?;

        let (sink, mut events) = ChannelSink::new();
        let sink = Arc::new(sink);
        let controller = Arc::clone(&self.controller);
        let handler_sink = Arc::clone(&sink);
        let result = task::spawn_blocking(move || controller.execute_async(operation, handler_sink))
            .await
            .map_err(join_error)?;

        stream.write_all(&[codes::EXECUTE_ASYNCHRONOUS_RESPONSE]).await?;

        // issue a request id only when the engine has not already
        // completed inline
        let request_id = if sink.is_finished() {
            None
        } else {
            let id = self.request_ids.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight.insert(id, result.cancel.clone());
            stream.write_all(&[codes::PARAM_REQUEST_ID]).await?;
            write_i32(&mut stream, id).await?;
            stream.flush().await?;
            debug!(request_id = id, "asynchronous execution in flight");
            Some(id)
        };

        let streamed = self
            .stream_events(&mut stream, &mut events, result.compensating)
            .await;
        if let Some(id) = request_id {
            self.in_flight.remove(&id);
        }
        streamed
    }

    /// Drains sink events onto the stream until the terminal tag.
    async fn stream_events(
        &self,
        stream: &mut TcpStream,
        events: &mut tokio::sync::mpsc::UnboundedReceiver<SinkEvent>,
        compensating: Option<Value>,
    ) -> Result<(), ProtocolError> {
        while let Some(event) = events.recv().await {
            match event {
                SinkEvent::Fragment { location, value } => {
                    stream
                        .write_all(&[codes::PARAM_HANDLE_RESULT_FRAGMENT, codes::PARAM_LOCATION])
                        .await?;
                    write_i32(stream, location.len() as i32).await?;
                    for segment in &location {
                        write_utfz(stream, segment).await?;
                    }
                    stream.write_all(&[codes::PARAM_OPERATION]).await?;
                    write_value(stream, &value).await?;
                    stream.flush().await?;
                }
                SinkEvent::Complete => {
                    stream
                        .write_all(&[codes::PARAM_HANDLE_RESULT_COMPLETE, codes::PARAM_OPERATION])
                        .await?;
                    write_value(stream, compensating.as_ref().unwrap_or(&Value::Undefined))
                        .await?;
                    stream.flush().await?;
                    return Ok(());
                }
                SinkEvent::Failed(description) => {
                    stream
                        .write_all(&[codes::PARAM_HANDLE_RESULT_FAILED, codes::PARAM_OPERATION])
                        .await?;
                    write_value(stream, &description).await?;
                    stream.flush().await?;
                    return Ok(());
                }
                SinkEvent::Cancelled => {
                    stream.write_all(&[codes::PARAM_HANDLE_CANCELLATION]).await?;
                    stream.flush().await?;
                    return Ok(());
                }
            }
        }
        // the sink was dropped without a terminal; treat as failure
        warn!("operation sink dropped without a terminal signal");
        stream
            .write_all(&[codes::PARAM_HANDLE_RESULT_FAILED, codes::PARAM_OPERATION])
            .await?;
        write_value(
            stream,
            &Value::from("the operation terminated without reporting a result"),
        )
        .await?;
        stream.flush().await?;
        Ok(())
    }

    async fn cancel_operation(
        self: Arc<Self>,
        mut stream: TcpStream,
    ) -> Result<(), ProtocolError> {
        expect_header(&mut stream, codes::PARAM_REQUEST_ID).await?;
        let request_id = read_i32(&mut stream).await?;

        let handle = self.in_flight.get(&request_id).map(|entry| entry.clone());
        let cancelled = match handle {
            Some(handle) => task::spawn_blocking(move || handle.cancel())
                .await
                .map_err(join_error)?,
            None => false,
        };
        debug!(request_id, cancelled, "cancel request");

        stream
            .write_all(&[codes::CANCEL_ASYNCHRONOUS_OPERATION_RESPONSE])
            .await?;
        write_bool(&mut stream, cancelled).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Writes the framed rejection used for malformed requests.
pub(crate) async fn reject(stream: &mut TcpStream, message: &str) -> Result<(), ProtocolError> {
    stream.write_all(&[codes::PROTOCOL_ERROR_RESPONSE]).await?;
    write_utfz(stream, message).await?;
    stream.flush().await?;
    Ok(())
}

fn join_error(e: task::JoinError) -> ProtocolError {
    ProtocolError::Io(std::io::Error::other(e))
}
