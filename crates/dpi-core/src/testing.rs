//! Scripted channel for unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;

use crate::{
    context::Context,
    error::{DpiError, DpiResult, ErrorKind},
    model::standard_catalog,
    registry::Handle,
    traits::RpcChannel,
};

pub type RecordedCall = (String, String, Vec<serde_json::Value>);

/// Channel answering from a script and recording every forwarded call.
#[derive(Default)]
pub struct ScriptedChannel {
    root: Mutex<Option<serde_json::Value>>,
    responses: Mutex<HashMap<(String, String), serde_json::Value>>,
    calls: Mutex<Vec<RecordedCall>>,
    broken: AtomicBool,
    pings: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_root(&self, envelope: serde_json::Value) {
        *self.root.lock().unwrap() = Some(envelope);
    }

    pub fn respond(&self, handle: &str, method: &str, value: serde_json::Value) {
        self.responses
            .lock()
            .unwrap()
            .insert((handle.to_string(), method.to_string()), value);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn break_channel(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    fn check(&self) -> DpiResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(DpiError::Transport("pipe closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RpcChannel for ScriptedChannel {
    async fn ping(&self, _timeout: Duration) -> DpiResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn open_data_source(&self, container_id: &str) -> DpiResult<serde_json::Value> {
        self.check()?;
        self.root
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DpiError::NotFound(container_id.to_string()))
    }

    async fn invoke(
        &self,
        handle: &Handle,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> DpiResult<serde_json::Value> {
        self.check()?;
        self.calls
            .lock()
            .unwrap()
            .push((handle.to_string(), method.to_string(), args));
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&(handle.to_string(), method.to_string()))
            .cloned();
        response.ok_or_else(|| {
            DpiError::from_wire(
                ErrorKind::Unsupported,
                "no such operation".to_string(),
                method,
                Some(handle),
            )
        })
    }

    async fn shutdown(&self) -> DpiResult<()> {
        Ok(())
    }
}

/// Root envelope of the `pg-main` data source.
pub fn pg_main_root() -> serde_json::Value {
    json!({
        "handle": "obj-1",
        "type": "PostgreDataSource",
        "string": "pg-main",
        "interfaces": ["DataSource"],
        "properties": {"name": "pg-main"}
    })
}

/// Open context over a scripted channel serving `pg-main`.
pub fn scripted_context() -> (Context, Arc<ScriptedChannel>) {
    let channel = ScriptedChannel::new();
    channel.set_root(pg_main_root());
    let context = Context::new("proj1", channel.clone(), Arc::new(standard_catalog()));
    (context, channel)
}
