//! Worker serving loop.
//!
//! The worker owns the real objects. Every object it sends to the host is
//! bound in its export registry, so later calls can name it by handle.

use std::{collections::HashMap, io, sync::Arc};

use async_trait::async_trait;
use dpi_core::{
    DeclaredPropertyCollector, DpiError, DpiResult, Encoder, Handle, IdentityRegistry, InvokeError,
    LocalRef, LocalValue, PropertyCollector, WireValue, codec::decode_argument,
};
use dpi_transport::{Request, RequestFrame, Response, ResponseFrame};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::Mutex,
    task::JoinSet,
};

/// Opens data-source containers by id.
#[async_trait]
pub trait DataSourceProvider: Send + Sync {
    /// Root object of the container.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown container.
    async fn open(&self, container_id: &str) -> DpiResult<LocalRef>;
}

/// Provider over a fixed set of containers.
#[derive(Default, Clone)]
pub struct ContainerMap {
    containers: HashMap<String, LocalRef>,
}

impl ContainerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a container.
    #[must_use]
    pub fn with(mut self, container_id: impl Into<String>, root: LocalRef) -> Self {
        self.containers.insert(container_id.into(), root);
        self
    }
}

#[async_trait]
impl DataSourceProvider for ContainerMap {
    async fn open(&self, container_id: &str) -> DpiResult<LocalRef> {
        self.containers
            .get(container_id)
            .cloned()
            .ok_or_else(|| DpiError::NotFound(format!("data source container '{container_id}'")))
    }
}

/// Serves one host connection.
pub struct WorkerServer {
    exports: IdentityRegistry<LocalRef>,
    collector: Box<dyn PropertyCollector>,
    provider: Arc<dyn DataSourceProvider>,
}

impl WorkerServer {
    /// Server reading properties with [`DeclaredPropertyCollector`].
    #[must_use]
    pub fn new(provider: Arc<dyn DataSourceProvider>) -> Arc<Self> {
        Self::with_collector(provider, DeclaredPropertyCollector)
    }

    #[must_use]
    pub fn with_collector(
        provider: Arc<dyn DataSourceProvider>,
        collector: impl PropertyCollector + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            exports: IdentityRegistry::new(),
            collector: Box::new(collector),
            provider,
        })
    }

    /// Number of objects sent to the host so far.
    #[must_use]
    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    fn encoder(&self) -> Encoder<'_> {
        Encoder::new(&self.exports, self.collector.as_ref())
    }

    /// Answer one request.
    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Ping => return Response::Pong,
            Request::Shutdown => return Response::Closing,
            Request::OpenDataSource { container_id } => self.open_data_source(&container_id).await,
            Request::Invoke {
                handle,
                method,
                args,
            } => self.invoke(&handle, &method, args).await,
        };
        match result {
            Ok(value) => Response::Value { value },
            Err(err) => {
                tracing::debug!(error = %err, "Request failed");
                Response::error(&err)
            }
        }
    }

    async fn open_data_source(&self, container_id: &str) -> DpiResult<serde_json::Value> {
        let root = self.provider.open(container_id).await?;
        let envelope = self.encoder().encode(&root)?;
        tracing::info!(container = container_id, handle = %envelope.handle, "Opened data source");
        Ok(serde_json::to_value(&envelope)?)
    }

    async fn invoke(
        &self,
        handle: &Handle,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> DpiResult<serde_json::Value> {
        let target = self
            .exports
            .resolve(handle)
            .ok_or_else(|| DpiError::Protocol(format!("unknown handle {handle}")))?;
        let args = args
            .into_iter()
            .map(|raw| decode_argument(&self.exports, WireValue::try_from(raw)?))
            .collect::<DpiResult<Vec<LocalValue>>>()?;

        tracing::debug!(handle = %handle, method, "Invoking");
        let value = target
            .invoke(method, args)
            .await
            .map_err(|err| match err {
                InvokeError::NoSuchOperation => DpiError::UnsupportedRemoteOperation {
                    method: method.to_string(),
                    handle: handle.clone(),
                    type_name: target.type_name().to_string(),
                },
                InvokeError::InvalidArguments(message) | InvokeError::Failed(message) => {
                    DpiError::RemoteFailure {
                        method: method.to_string(),
                        message,
                    }
                }
            })?;
        self.encoder().encode_value(&value)?.to_json()
    }

    /// Serve requests from `reader` until `shutdown` or EOF.
    ///
    /// Each request runs in its own task, so a slow call does not hold up
    /// the others. `shutdown` is answered after in-flight calls finish.
    ///
    /// # Errors
    /// Returns an I/O error if reading requests or writing a response fails.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));
        let mut reader = BufReader::new(reader);
        let mut tasks = JoinSet::new();
        let mut buffer = String::new();

        loop {
            buffer.clear();
            if reader.read_line(&mut buffer).await? == 0 {
                tracing::debug!("Host closed the channel");
                break;
            }
            let line = buffer.trim();
            if line.is_empty() {
                continue;
            }

            let RequestFrame { id, request } = match serde_json::from_str(line) {
                Ok(frame) => frame,
                Err(err) => {
                    reject(&writer, line, &err).await?;
                    continue;
                }
            };

            if request == Request::Shutdown {
                while tasks.join_next().await.is_some() {}
                write_frame(&writer, id, Response::Closing).await?;
                tracing::info!(exports = self.export_count(), "Worker shutting down");
                break;
            }

            let server = Arc::clone(&self);
            let writer = Arc::clone(&writer);
            tasks.spawn(async move {
                let response = server.handle(request).await;
                if let Err(err) = write_frame(&writer, id, response).await {
                    tracing::error!(id, error = %err, "Failed to write response");
                }
            });
            while tasks.try_join_next().is_some() {}
        }
        Ok(())
    }
}

async fn write_frame<W>(writer: &Mutex<W>, id: u64, response: Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(&ResponseFrame { id, response })?;
    line.push('\n');
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Answer a frame that does not parse, if it carries an id.
async fn reject<W>(writer: &Mutex<W>, line: &str, err: &serde_json::Error) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let id = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|raw| raw.get("id").and_then(serde_json::Value::as_u64));
    let Some(id) = id else {
        tracing::warn!(error = %err, "Discarding malformed request frame");
        return Ok(());
    };
    let response = Response::error(&DpiError::Protocol(format!("malformed request: {err}")));
    write_frame(writer, id, response).await
}
