//! Client side of the management protocol.
//!
//! One connection per request: synchronous executions are a single
//! round trip; asynchronous executions hold their connection open for
//! the fragment stream and cancel through a companion connection
//! addressed by request id.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::debug;

use castellan_controller::ResultSink;
use castellan_value::Value;

use crate::codes;
use crate::error::ProtocolError;
use crate::federation::CONNECT_TIMEOUT;
use crate::stream::{
    expect_header, read_bool, read_i32, read_u8, read_utfz, read_value, write_i32, write_value,
};

/// How an asynchronous execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncTerminal {
    Complete { compensating: Option<Value> },
    Failed(Value),
    Cancelled,
}

/// Handle on an in-flight asynchronous execution.
pub struct AsyncExecution {
    address: SocketAddr,
    connect_timeout: Duration,
    request_id: watch::Receiver<Option<i32>>,
    terminal: oneshot::Receiver<AsyncTerminal>,
}

impl AsyncExecution {
    /// The server-issued request id; `None` when the operation
    /// completed inline before an id was assigned.
    pub async fn request_id(&mut self) -> Option<i32> {
        loop {
            if let Some(id) = *self.request_id.borrow() {
                return Some(id);
            }
            if self.request_id.changed().await.is_err() {
                return *self.request_id.borrow();
            }
        }
    }

    /// Requests cancellation over a companion connection. Returns true
    /// iff the cancel reached the operation before its terminal.
    pub async fn cancel(&mut self) -> Result<bool, ProtocolError> {
        let Some(id) = self.request_id().await else {
            return Ok(false);
        };
        let client = RemoteControllerClient {
            address: self.address,
            connect_timeout: self.connect_timeout,
        };
        client.cancel(id).await
    }

    /// Waits for the terminal signal.
    pub async fn outcome(self) -> Result<AsyncTerminal, ProtocolError> {
        self.terminal
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

/// Client for a remote model controller.
#[derive(Debug, Clone)]
pub struct RemoteControllerClient {
    address: SocketAddr,
    connect_timeout: Duration,
}

impl RemoteControllerClient {
    pub fn new(address: SocketAddr) -> Self {
        RemoteControllerClient {
            address,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(address: SocketAddr, connect_timeout: Duration) -> Self {
        RemoteControllerClient {
            address,
            connect_timeout,
        }
    }

    async fn connect(&self) -> Result<TcpStream, ProtocolError> {
        timeout(self.connect_timeout, TcpStream::connect(self.address))
            .await
            .map_err(|_| ProtocolError::ConnectTimeout)?
            .map_err(ProtocolError::Io)
    }

    /// Executes an operation and returns the result envelope.
    pub async fn execute(&self, operation: &Value) -> Result<Value, ProtocolError> {
        let mut stream = self.connect().await?;
        stream
            .write_all(&[
                codes::HANDLER_CONTROLLER,
                codes::REQUEST_OPERATION,
                codes::EXECUTE_SYNCHRONOUS_REQUEST,
                codes::PARAM_OPERATION,
            ])
            .await?;
        write_value(&mut stream, operation).await?;
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

    /// Starts an asynchronous execution. Fragments and the terminal
    /// arrive on `sink`; the returned handle exposes the request id and
    /// cancellation.
    pub async fn execute_async(
        &self,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<AsyncExecution, ProtocolError> {
        let mut stream = self.connect().await?;
        stream
            .write_all(&[
                codes::HANDLER_CONTROLLER,
                codes::REQUEST_OPERATION,
                codes::EXECUTE_ASYNCHRONOUS_REQUEST,
                codes::PARAM_OPERATION,
            ])
            .await?;
        write_value(&mut stream, operation).await?;
        stream.flush().await?;

        let code = read_u8(&mut stream).await?;
        if code == codes::PROTOCOL_ERROR_RESPONSE {
            return Err(ProtocolError::Rejected(read_utfz(&mut stream).await?));
        }
        if code != codes::EXECUTE_ASYNCHRONOUS_RESPONSE {
            return Err(ProtocolError::UnexpectedResponseCode(code));
        }

        let (id_tx, id_rx) = watch::channel(None);
        let (terminal_tx, terminal_rx) = oneshot::channel();
        tokio::spawn(async move {
            let terminal = match read_result_stream(&mut stream, &id_tx, &sink).await {
                Ok(terminal) => terminal,
                Err(e) => {
                    // a framing violation terminates the operation as a
                    // failure on the consumer side
                    let description = Value::from(format!("protocol failure: {e}"));
                    sink.failed(description.clone());
                    AsyncTerminal::Failed(description)
                }
            };
            let _ = terminal_tx.send(terminal);
        });

        Ok(AsyncExecution {
            address: self.address,
            connect_timeout: self.connect_timeout,
            request_id: id_rx,
            terminal: terminal_rx,
        })
    }

    /// Cancels the asynchronous execution with the given request id.
    pub async fn cancel(&self, request_id: i32) -> Result<bool, ProtocolError> {
        let mut stream = self.connect().await?;
        stream
            .write_all(&[
                codes::HANDLER_CONTROLLER,
                codes::REQUEST_OPERATION,
                codes::CANCEL_ASYNCHRONOUS_OPERATION_REQUEST,
                codes::PARAM_REQUEST_ID,
            ])
            .await?;
        write_i32(&mut stream, request_id).await?;
        stream.flush().await?;

        let code = read_u8(&mut stream).await?;
        if code == codes::PROTOCOL_ERROR_RESPONSE {
            return Err(ProtocolError::Rejected(read_utfz(&mut stream).await?));
        }
        if code != codes::CANCEL_ASYNCHRONOUS_OPERATION_RESPONSE {
            return Err(ProtocolError::UnexpectedResponseCode(code));
        }
        read_bool(&mut stream).await
    }
}

/// Reads the asynchronous response stream until the terminal tag,
/// feeding fragments into the sink as they arrive.
async fn read_result_stream(
    stream: &mut TcpStream,
    id_tx: &watch::Sender<Option<i32>>,
    sink: &Arc<dyn ResultSink>,
) -> Result<AsyncTerminal, ProtocolError> {
    loop {
        let tag = read_u8(stream).await?;
        match tag {
            codes::PARAM_REQUEST_ID => {
                let id = read_i32(stream).await?;
                debug!(request_id = id, "server issued request id");
                let _ = id_tx.send(Some(id));
            }
            codes::PARAM_HANDLE_RESULT_FRAGMENT => {
                expect_header(stream, codes::PARAM_LOCATION).await?;
                let count = read_i32(stream).await?.max(0) as usize;
                let mut location = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    location.push(read_utfz(stream).await?);
                }
                expect_header(stream, codes::PARAM_OPERATION).await?;
                let value = read_value(stream).await?;
                sink.fragment(&location, value);
            }
            codes::PARAM_HANDLE_RESULT_COMPLETE => {
                expect_header(stream, codes::PARAM_OPERATION).await?;
                let compensating = read_value(stream).await?;
                sink.complete();
                return Ok(AsyncTerminal::Complete {
                    compensating: compensating.is_defined().then_some(compensating),
                });
            }
            codes::PARAM_HANDLE_RESULT_FAILED => {
                expect_header(stream, codes::PARAM_OPERATION).await?;
                let description = read_value(stream).await?;
                sink.failed(description.clone());
                return Ok(AsyncTerminal::Failed(description));
            }
            codes::PARAM_HANDLE_CANCELLATION => {
                sink.cancelled();
                return Ok(AsyncTerminal::Cancelled);
            }
            other => {
                return Err(ProtocolError::UnexpectedHeader {
                    expected: codes::PARAM_HANDLE_RESULT_FRAGMENT,
                    actual: other,
                })
            }
        }
    }
}
