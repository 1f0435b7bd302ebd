//! Request-id correlating channel over a pair of async byte streams.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dpi_core::{DpiError, DpiResult, Handle, RpcChannel};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex as AsyncMutex, oneshot},
    task::JoinHandle,
};

use crate::protocol::{Request, RequestFrame, Response, ResponseFrame};

type Reply = DpiResult<Response>;
type Waiter = oneshot::Sender<Reply>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Calls waiting for their response, keyed by request id.
#[derive(Default)]
struct Pending {
    inner: Mutex<PendingInner>,
}

#[derive(Default)]
struct PendingInner {
    waiters: HashMap<u64, Waiter>,
    closed: bool,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: u64, waiter: Waiter) -> DpiResult<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(closed_error());
        }
        inner.waiters.insert(id, waiter);
        Ok(())
    }

    fn take(&self, id: u64) -> Option<Waiter> {
        self.lock().waiters.remove(&id)
    }

    /// Fail every waiting call and refuse new ones.
    fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let failed = inner.waiters.len();
        // Dropping the senders wakes the receivers with an error.
        inner.waiters.clear();
        failed
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

fn closed_error() -> DpiError {
    DpiError::Transport("worker channel closed".to_string())
}

/// Host end of a worker connection.
///
/// Each call writes one request frame and waits for the response carrying
/// the same id; a background task reads responses and routes them, so any
/// number of calls may be in flight at once. EOF or an I/O failure on the
/// reading side fails every pending call and every later one with a
/// transport error.
pub struct LineChannel {
    writer: AsyncMutex<BoxedWriter>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl LineChannel {
    /// Start the channel, spawning the response reader.
    #[must_use]
    pub fn spawn<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = Arc::new(Pending::default());
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&pending)));
        Arc::new(Self {
            writer: AsyncMutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Whether the channel has stopped accepting calls.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Write `request` under `id` and return the receiver of its response.
    async fn send(&self, id: u64, request: Request) -> DpiResult<oneshot::Receiver<Reply>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx)?;

        let mut line = serde_json::to_string(&RequestFrame { id, request })?;
        line.push('\n');
        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            self.pending.take(id);
            tracing::warn!(id, error = %err, "Failed to write request");
            return Err(DpiError::Transport(err.to_string()));
        }
        Ok(rx)
    }

    async fn request(&self, request: Request) -> DpiResult<Response> {
        let rx = self.send(self.next_id(), request).await?;
        receive(rx).await
    }
}

async fn receive(rx: oneshot::Receiver<Reply>) -> Reply {
    rx.await.unwrap_or_else(|_| Err(closed_error()))
}

/// Fail the call a malformed frame answers, if it names one.
fn reject(pending: &Pending, line: &str, err: &serde_json::Error) {
    let Some((id, waiter)) = frame_id(line).and_then(|id| Some((id, pending.take(id)?))) else {
        tracing::warn!(error = %err, "Discarding malformed response frame");
        return;
    };
    tracing::warn!(id, error = %err, "Malformed response frame");
    drop(waiter.send(Err(DpiError::Protocol(format!("malformed response: {err}")))));
}

/// Request id of a frame that did not parse as a response.
fn frame_id(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(reader: R, pending: Arc<Pending>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();

    loop {
        buffer.clear();
        match reader.read_line(&mut buffer).await {
            Ok(0) => {
                tracing::debug!("Worker channel reached EOF");
                break;
            }
            Ok(_) => {
                let line = buffer.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ResponseFrame>(line) {
                    Ok(ResponseFrame { id, response }) => match pending.take(id) {
                        // The caller may have given up waiting.
                        Some(waiter) => drop(waiter.send(Ok(response))),
                        None => tracing::debug!(id, "Response for unknown request"),
                    },
                    Err(err) => reject(&pending, line, &err),
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Error reading worker channel");
                break;
            }
        }
    }

    let failed = pending.close();
    if failed > 0 {
        tracing::warn!(failed, "Worker channel closed with calls in flight");
    }
}

#[async_trait]
impl RpcChannel for LineChannel {
    async fn ping(&self, timeout: Duration) -> DpiResult<()> {
        // The bound covers the write too: a worker that stopped reading
        // blocks the writer. A ping cut off mid-write leaves a partial
        // frame behind, so callers treat a timeout as a dead worker.
        let id = self.next_id();
        let exchange = async {
            let rx = self.send(id, Request::Ping).await?;
            receive(rx).await
        };
        let Ok(received) = tokio::time::timeout(timeout, exchange).await else {
            self.pending.take(id);
            return Err(DpiError::Transport(format!(
                "no pong within {} ms",
                timeout.as_millis()
            )));
        };
        match received? {
            Response::Pong => Ok(()),
            Response::Error { kind, message } => {
                Err(DpiError::from_wire(kind, message, "ping", None))
            }
            other => Err(DpiError::Protocol(format!(
                "unexpected {} response to ping",
                other.name()
            ))),
        }
    }

    async fn open_data_source(&self, container_id: &str) -> DpiResult<serde_json::Value> {
        self.request(Request::OpenDataSource {
            container_id: container_id.to_string(),
        })
        .await?
        .into_value("openDataSource", None)
    }

    async fn invoke(
        &self,
        handle: &Handle,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> DpiResult<serde_json::Value> {
        self.request(Request::Invoke {
            handle: handle.clone(),
            method: method.to_string(),
            args,
        })
        .await?
        .into_value(method, Some(handle))
    }

    async fn shutdown(&self) -> DpiResult<()> {
        match self.request(Request::Shutdown).await {
            // A worker that already went away needs no shutdown.
            Ok(_) | Err(DpiError::Transport(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    /// Worker end of a test connection, driven by hand.
    struct FakeWorker {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeWorker {
        async fn next_request(&mut self) -> RequestFrame {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn reply(&mut self, id: u64, response: Response) {
            let mut line = serde_json::to_string(&ResponseFrame { id, response }).unwrap();
            line.push('\n');
            self.reply_raw(&line).await;
        }

        async fn reply_raw(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }
    }

    fn connect() -> (Arc<LineChannel>, FakeWorker) {
        connect_with_capacity(64 * 1024)
    }

    fn connect_with_capacity(capacity: usize) -> (Arc<LineChannel>, FakeWorker) {
        let (host, worker) = duplex(capacity);
        let (host_read, host_write) = split(host);
        let (worker_read, worker_write) = split(worker);
        let channel = LineChannel::spawn(host_read, host_write);
        let worker = FakeWorker {
            reader: BufReader::new(worker_read),
            writer: worker_write,
        };
        (channel, worker)
    }

    #[tokio::test]
    async fn test_responses_route_by_id() {
        let (channel, mut worker) = connect();
        let handle = Handle::from("obj-1");

        let first = {
            let channel = Arc::clone(&channel);
            let handle = handle.clone();
            tokio::spawn(async move { channel.invoke(&handle, "getName", Vec::new()).await })
        };
        let a = worker.next_request().await;
        let second = {
            let channel = Arc::clone(&channel);
            let handle = handle.clone();
            tokio::spawn(async move { channel.invoke(&handle, "getDriverName", Vec::new()).await })
        };
        let b = worker.next_request().await;
        assert_ne!(a.id, b.id);

        // Answer out of order.
        worker
            .reply(b.id, Response::Value { value: json!("postgres") })
            .await;
        worker
            .reply(a.id, Response::Value { value: json!("pg-main") })
            .await;

        assert_eq!(second.await.unwrap().unwrap(), json!("postgres"));
        assert_eq!(first.await.unwrap().unwrap(), json!("pg-main"));
    }

    #[tokio::test]
    async fn test_invoke_request_shape() {
        let (channel, mut worker) = connect();
        let call = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .invoke(&Handle::from("obj-1"), "getSchema", vec![json!("public")])
                    .await
            })
        };

        let frame = worker.next_request().await;
        assert_eq!(
            frame.request,
            Request::Invoke {
                handle: Handle::from("obj-1"),
                method: "getSchema".to_string(),
                args: vec![json!("public")],
            }
        );
        worker
            .reply(
                frame.id,
                Response::Error {
                    kind: dpi_core::ErrorKind::NotFound,
                    message: "no schema".to_string(),
                },
            )
            .await;

        let err = assert_err!(call.await.unwrap());
        assert!(matches!(err, DpiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_response_fails_its_call() {
        let (channel, mut worker) = connect();
        let call = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .invoke(&Handle::from("obj-1"), "getName", Vec::new())
                    .await
            })
        };
        let frame = worker.next_request().await;
        worker
            .reply_raw(&format!("{{\"id\":{},\"type\":\"bogus\"}}\n", frame.id))
            .await;

        let err = assert_err!(
            tokio::time::timeout(Duration::from_secs(2), call)
                .await
                .unwrap()
                .unwrap()
        );
        assert!(matches!(err, DpiError::Protocol(_)));

        // The channel keeps routing later responses.
        let next = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .invoke(&Handle::from("obj-1"), "getName", Vec::new())
                    .await
            })
        };
        let frame = worker.next_request().await;
        worker
            .reply(frame.id, Response::Value { value: json!("pg-main") })
            .await;
        assert_eq!(next.await.unwrap().unwrap(), json!("pg-main"));
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_eof_fails_pending_and_later_calls() {
        let (channel, mut worker) = connect();
        let pending = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.open_data_source("proj1").await })
        };
        worker.next_request().await;
        drop(worker);

        let err = assert_err!(pending.await.unwrap());
        assert!(err.is_transport());
        assert!(channel.is_closed());

        let err = assert_err!(
            channel
                .invoke(&Handle::from("obj-1"), "getName", Vec::new())
                .await
        );
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (channel, mut worker) = connect();
        let ping = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.ping(Duration::from_secs(5)).await })
        };

        let frame = worker.next_request().await;
        assert_eq!(frame.request, Request::Ping);
        worker.reply(frame.id, Response::Pong).await;

        assert_ok!(ping.await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_times_out() {
        let (channel, mut worker) = connect();
        let ping = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.ping(Duration::from_millis(20)).await })
        };
        let frame = worker.next_request().await;

        let err = assert_err!(ping.await.unwrap());
        assert!(err.is_transport());

        // A late pong is discarded and the channel stays usable.
        worker.reply(frame.id, Response::Pong).await;
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_ping_times_out_when_worker_stops_reading() {
        let (channel, _worker) = connect_with_capacity(64);
        let blocked = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .invoke(&Handle::from("obj-1"), "getSchema", vec![json!("x".repeat(4096))])
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ping = tokio::time::timeout(
            Duration::from_secs(2),
            channel.ping(Duration::from_millis(50)),
        )
        .await;

        let err = assert_err!(ping.expect("ping should honor its timeout"));
        assert!(err.is_transport());
        blocked.abort();
    }

    #[tokio::test]
    async fn test_shutdown_after_worker_exit_is_ok() {
        let (channel, worker) = connect();
        drop(worker);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_ok!(channel.shutdown().await);
    }
}
