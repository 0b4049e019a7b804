//! Socket transport for triggers.
//!
//! Agents that can speak to a Unix socket skip the file exchange: they send one
//! newline-terminated [`Request`] and keep the connection open until the user
//! answers. The listener thread only parses and validates; triggers are handed
//! to the controller through an [`IpcInbound`] channel, and the controller
//! sends the [`ResponseRecord`] (or a rejection) back through the per-request
//! reply sender.
//!
//! File triggers stay the compatibility path for consumers that cannot be
//! changed.

use std::sync::mpsc;
use std::time::Duration;

use review_gate_protocol::{ErrorInfo, ResponseRecord, Trigger};

/// What the controller sends back for a socket trigger.
pub type IpcReply = std::result::Result<ResponseRecord, ErrorInfo>;

/// A trigger received over the socket, with the channel to answer it on.
pub struct IpcInbound {
    pub trigger: Trigger,
    pub reply: mpsc::Sender<IpcReply>,
}

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const ACCEPT_IDLE: Duration = Duration::from_millis(50);

#[cfg(unix)]
pub use unix::{send_request, IpcServer};

#[cfg(unix)]
mod unix {
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::{Path, PathBuf};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use review_gate_protocol::{
        parse_trigger_params, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
        PROTOCOL_VERSION,
    };

    use super::{IpcInbound, ACCEPT_IDLE, READ_CHUNK_SIZE, READ_TIMEOUT_SECS};
    use crate::error::{GateError, Result};
    use crate::scheduler::CancellationToken;
    use crate::storage::remove_if_exists;

    /// Listening socket. Removing the handle stops the accept loop and
    /// deletes the socket file.
    pub struct IpcServer {
        socket_path: PathBuf,
        token: CancellationToken,
    }

    impl IpcServer {
        /// Binds `socket_path` (replacing a stale socket) and starts accepting.
        pub fn bind(socket_path: &Path) -> Result<(Self, mpsc::Receiver<IpcInbound>)> {
            remove_if_exists(socket_path)
                .map_err(|e| GateError::io("Failed to remove existing socket", e))?;
            let listener = UnixListener::bind(socket_path)
                .map_err(|e| {
                GateError::io(format!("Failed to bind {}", socket_path.display()), e)
            })?;
            listener
                .set_nonblocking(true)
                .map_err(|e| GateError::io("Failed to configure socket", e))?;

            let (inbox_tx, inbox_rx) = mpsc::channel();
            let token = CancellationToken::new();
            let loop_token = token.clone();
            thread::spawn(move || accept_loop(listener, inbox_tx, loop_token));

            tracing::info!(path = %socket_path.display(), "IPC socket listening");
            Ok((
                Self {
                    socket_path: socket_path.to_path_buf(),
                    token,
                },
                inbox_rx,
            ))
        }

        pub fn socket_path(&self) -> &Path {
            &self.socket_path
        }
    }

    impl Drop for IpcServer {
        fn drop(&mut self) {
            self.token.cancel();
            let _ = remove_if_exists(&self.socket_path);
        }
    }

    fn accept_loop(
        listener: UnixListener,
        inbox: mpsc::Sender<IpcInbound>,
        token: CancellationToken,
    ) {
        while !token.is_cancelled() {
            match listener.accept() {
                Ok((stream, _)) => {
                    let inbox = inbox.clone();
                    thread::spawn(move || handle_connection(stream, inbox));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to accept IPC connection");
                    thread::sleep(ACCEPT_IDLE);
                }
            }
        }
        tracing::debug!("IPC accept loop stopped");
    }

    fn handle_connection(mut stream: UnixStream, inbox: mpsc::Sender<IpcInbound>) {
        let _ = stream.set_nonblocking(false);
        let request = match read_request(&mut stream) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(code = %err.code, message = %err.message, "Failed to read IPC request");
                let _ = write_message(&mut stream, &Response::error_with_info(None, err));
                return;
            }
        };

        tracing::debug!(method = ?request.method, id = ?request.id, "IPC request received");
        let response = handle_request(request, &inbox);
        if let Err(err) = write_message(&mut stream, &response) {
            tracing::debug!(error = %err, "Failed to write IPC response");
        }
    }

    fn handle_request(request: Request, inbox: &mpsc::Sender<IpcInbound>) -> Response {
        if request.protocol_version != PROTOCOL_VERSION {
            return Response::error(
                request.id,
                "protocol_mismatch",
                "unsupported protocol version",
            );
        }

        match request.method {
            Method::GetHealth => Response::ok(
                request.id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                }),
            ),
            Method::Trigger => {
                let params = match request.params {
                    Some(params) => params,
                    None => {
                        return Response::error(request.id, "invalid_params", "trigger is required")
                    }
                };
                let trigger = match parse_trigger_params(params) {
                    Ok(trigger) => trigger,
                    Err(err) => return Response::error_with_info(request.id, err),
                };

                let trigger_id = trigger.trigger_id.clone();
                let (reply_tx, reply_rx) = mpsc::channel();
                if inbox
                    .send(IpcInbound {
                        trigger,
                        reply: reply_tx,
                    })
                    .is_err()
                {
                    return Response::error(request.id, "unavailable", "bridge is shutting down");
                }

                // Waits as long as the user takes; the sender is dropped if the
                // trigger is superseded by a newer one.
                match reply_rx.recv() {
                    Ok(Ok(record)) => match serde_json::to_value(&record) {
                        Ok(value) => Response::ok(request.id, value),
                        Err(err) => Response::error(
                            request.id,
                            "serialization_error",
                            format!("Failed to serialize response: {}", err),
                        ),
                    },
                    Ok(Err(info)) => Response::error_with_info(request.id, info),
                    Err(_) => Response::error(
                        request.id,
                        "superseded",
                        format!("trigger {} ended without a response", trigger_id),
                    ),
                }
            }
        }
    }

    fn read_request(stream: &mut UnixStream) -> std::result::Result<Request, ErrorInfo> {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));
        let buffer = read_frame(stream).map_err(|err| match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                ErrorInfo::new("read_timeout", "request timed out")
            }
            ErrorKind::InvalidData => {
                ErrorInfo::new("request_too_large", "request exceeded maximum size")
            }
            _ => ErrorInfo::new("read_error", format!("failed to read request: {}", err)),
        })?;

        if buffer.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ErrorInfo::new("empty_request", "request body was empty"));
        }

        serde_json::from_slice(&buffer).map_err(|err| {
            ErrorInfo::new(
                "invalid_json",
                format!("request was not valid JSON: {}", err),
            )
        })
    }

    /// Reads up to the first newline (or EOF). Trailing bytes are ignored.
    fn read_frame(stream: &mut UnixStream) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.len() > MAX_REQUEST_BYTES {
                return Err(std::io::Error::from(ErrorKind::InvalidData));
            }
            if chunk[..n].contains(&b'\n') {
                break;
            }
        }
        if let Some(index) = buffer.iter().position(|b| *b == b'\n') {
            buffer.truncate(index);
        }
        Ok(buffer)
    }

    fn write_message<T: serde::Serialize>(
        stream: &mut UnixStream,
        message: &T,
    ) -> std::io::Result<()> {
        serde_json::to_writer(&mut *stream, message).map_err(std::io::Error::other)?;
        stream.write_all(b"\n")?;
        stream.flush()
    }

    /// Sends one request and waits for the reply. `timeout` bounds the wait
    /// for the reply; `None` waits indefinitely (trigger requests).
    ///
    /// [`GateError::IpcUnavailable`] means the request never reached a bridge;
    /// [`GateError::IpcTimeout`] means it did and the reply did not come.
    pub fn send_request(
        socket_path: &Path,
        request: &Request,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let mut stream = UnixStream::connect(socket_path).map_err(|e| {
            GateError::IpcUnavailable(format!("connect {}: {}", socket_path.display(), e))
        })?;
        stream
            .set_read_timeout(timeout)
            .map_err(|e| GateError::Ipc(format!("set read timeout: {}", e)))?;
        write_message(&mut stream, request)
            .map_err(|e| GateError::Ipc(format!("write request: {}", e)))?;

        let frame = read_frame(&mut stream).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => GateError::IpcTimeout,
            _ => GateError::Ipc(format!("read response: {}", e)),
        })?;
        serde_json::from_slice(&frame)
            .map_err(|e| GateError::json("Failed to parse IPC response", e))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use review_gate_protocol::{ResponseEvent, ResponseRecord};
        use tempfile::tempdir;

        #[test]
        fn health_check_round_trip() {
            let dir = tempdir().unwrap();
            let socket = dir.path().join("gate.sock");
            let (_server, _inbox) = IpcServer::bind(&socket).unwrap();

            let response = send_request(
                &socket,
                &Request::new(Method::GetHealth, Some("h1".to_string()), None),
                Some(Duration::from_secs(5)),
            )
            .unwrap();
            assert!(response.ok);
            assert_eq!(response.id.as_deref(), Some("h1"));
            assert_eq!(response.data.unwrap()["status"], "ok");
        }

        #[test]
        fn trigger_waits_for_reply() {
            let dir = tempdir().unwrap();
            let socket = dir.path().join("gate.sock");
            let (_server, inbox) = IpcServer::bind(&socket).unwrap();

            let responder = thread::spawn(move || {
                let inbound = inbox.recv_timeout(Duration::from_secs(5)).unwrap();
                assert_eq!(inbound.trigger.trigger_id, "t1");
                inbound
                    .reply
                    .send(Ok(ResponseRecord::new(
                        "t1",
                        "TASK_COMPLETE",
                        Vec::new(),
                        ResponseEvent::McpResponse,
                    )))
                    .unwrap();
            });

            let request = Request::new(
                Method::Trigger,
                None,
                Some(serde_json::json!({ "trigger_id": "t1", "message": "Review?" })),
            );
            let response = send_request(&socket, &request, Some(Duration::from_secs(10))).unwrap();
            responder.join().unwrap();

            assert!(response.ok);
            assert_eq!(response.data.unwrap()["user_input"], "TASK_COMPLETE");
        }

        #[test]
        fn dropped_reply_reports_superseded() {
            let dir = tempdir().unwrap();
            let socket = dir.path().join("gate.sock");
            let (_server, inbox) = IpcServer::bind(&socket).unwrap();

            let responder = thread::spawn(move || {
                let inbound = inbox.recv_timeout(Duration::from_secs(5)).unwrap();
                drop(inbound);
            });

            let request = Request::new(
                Method::Trigger,
                None,
                Some(serde_json::json!({ "trigger_id": "t2" })),
            );
            let response = send_request(&socket, &request, Some(Duration::from_secs(10))).unwrap();
            responder.join().unwrap();
            assert!(!response.ok);
            assert_eq!(response.error.unwrap().code, "superseded");
        }

        #[test]
        fn rejection_is_forwarded_with_its_code() {
            let dir = tempdir().unwrap();
            let socket = dir.path().join("gate.sock");
            let (_server, inbox) = IpcServer::bind(&socket).unwrap();

            let responder = thread::spawn(move || {
                let inbound = inbox.recv_timeout(Duration::from_secs(5)).unwrap();
                inbound
                    .reply
                    .send(Err(ErrorInfo::new("duplicate_trigger", "already handled")))
                    .unwrap();
            });

            let request = Request::new(
                Method::Trigger,
                None,
                Some(serde_json::json!({ "trigger_id": "t3" })),
            );
            let response = send_request(&socket, &request, Some(Duration::from_secs(10))).unwrap();
            responder.join().unwrap();
            assert!(!response.ok);
            assert_eq!(response.error.unwrap().code, "duplicate_trigger");
        }

        #[test]
        fn unanswered_trigger_times_out() {
            let dir = tempdir().unwrap();
            let socket = dir.path().join("gate.sock");
            let (_server, inbox) = IpcServer::bind(&socket).unwrap();

            let request = Request::new(
                Method::Trigger,
                None,
                Some(serde_json::json!({ "trigger_id": "t4" })),
            );
            let err = send_request(&socket, &request, Some(Duration::from_millis(300)))
                .unwrap_err();
            assert!(matches!(err, GateError::IpcTimeout), "got {:?}", err);
            // The bridge did receive it.
            assert!(inbox.try_recv().is_ok());
        }

        #[test]
        fn missing_socket_is_unavailable() {
            let dir = tempdir().unwrap();
            let request = Request::new(Method::GetHealth, None, None);
            let err = send_request(&dir.path().join("none.sock"), &request, None).unwrap_err();
            assert!(matches!(err, GateError::IpcUnavailable(_)), "got {:?}", err);
        }

        #[test]
        fn protocol_mismatch_is_rejected() {
            let dir = tempdir().unwrap();
            let socket = dir.path().join("gate.sock");
            let (_server, _inbox) = IpcServer::bind(&socket).unwrap();

            let mut request = Request::new(Method::GetHealth, None, None);
            request.protocol_version = 99;
            let response = send_request(&socket, &request, Some(Duration::from_secs(5))).unwrap();
            assert_eq!(response.error.unwrap().code, "protocol_mismatch");
        }

        #[test]
        fn dropping_server_removes_socket() {
            let dir = tempdir().unwrap();
            let socket = dir.path().join("gate.sock");
            let (server, _inbox) = IpcServer::bind(&socket).unwrap();
            assert_eq!(server.socket_path(), socket.as_path());
            assert!(socket.exists());
            drop(server);
            assert!(!socket.exists());
        }
    }
}
