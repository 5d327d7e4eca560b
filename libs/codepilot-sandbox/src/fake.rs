// In-memory runtime and fixture store for tests
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::LogOutput;
use futures_util::stream::{self, StreamExt};

use crate::engine::{ContainerRuntime, ContainerSpec, ExecHandle, OutputStream};
use crate::error::{RuntimeError, StoreError};
use crate::storage::FixtureStore;

pub(crate) fn runtime_error(status_code: u16, message: &str) -> RuntimeError {
    RuntimeError::DockerResponseServerError {
        status_code,
        message: message.to_string(),
    }
}

#[derive(Debug, Clone)]
enum Frame {
    Out(String),
    Err(String),
}

/// Scripted behaviour of one exec
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeExec {
    frames: Vec<Frame>,
    exit_code: Option<i64>,
    hang: bool,
    dispatch_error: bool,
    stream_error: bool,
    delay: Option<Duration>,
}

impl FakeExec {
    pub fn silent() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn stdout(text: &str) -> Self {
        Self {
            frames: vec![Frame::Out(text.to_string())],
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn stderr(text: &str) -> Self {
        Self {
            frames: vec![Frame::Err(text.to_string())],
            exit_code: Some(1),
            ..Default::default()
        }
    }

    /// Never closes its output stream
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn undispatchable() -> Self {
        Self {
            dispatch_error: true,
            ..Default::default()
        }
    }

    pub fn broken_stream() -> Self {
        Self {
            stream_error: true,
            ..Default::default()
        }
    }

    pub fn with_exit(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_stream(self) -> OutputStream {
        let mut items: Vec<Result<LogOutput, RuntimeError>> = self
            .frames
            .into_iter()
            .map(|frame| match frame {
                Frame::Out(text) => Ok(LogOutput::StdOut {
                    message: text.into_bytes().into(),
                }),
                Frame::Err(text) => Ok(LogOutput::StdErr {
                    message: text.into_bytes().into(),
                }),
            })
            .collect();
        if self.stream_error {
            items.push(Err(runtime_error(500, "stream reset")));
        }

        let frames = stream::iter(items);
        let frames: OutputStream = if self.hang {
            frames.chain(stream::pending()).boxed()
        } else {
            frames.boxed()
        };

        match self.delay {
            Some(delay) => stream::once(async move {
                tokio::time::sleep(delay).await;
                frames
            })
            .flatten()
            .boxed(),
            None => frames,
        }
    }
}

type Script = dyn Fn(&[String], &str) -> FakeExec + Send + Sync;

/// Container runtime that keeps containers in a map and answers execs from a script.
///
/// The script sees the exec argv and the staged artifact content read
/// through the container's bind at exec time.
pub(crate) struct FakeRuntime {
    script: Box<Script>,
    fail_create: bool,
    fail_start: bool,
    live: Mutex<HashMap<String, ContainerSpec>>,
    specs: Mutex<Vec<ContainerSpec>>,
    execs: Mutex<Vec<(Vec<String>, String)>>,
    exit_codes: Mutex<HashMap<String, Option<i64>>>,
    created: AtomicUsize,
    removed: AtomicUsize,
    peak_live: AtomicUsize,
}

impl FakeRuntime {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[String], &str) -> FakeExec + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            fail_create: false,
            fail_start: false,
            live: Mutex::new(HashMap::new()),
            specs: Mutex::new(Vec::new()),
            execs: Mutex::new(Vec::new()),
            exit_codes: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            peak_live: AtomicUsize::new(0),
        }
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn live_containers(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.specs.lock().unwrap().last().cloned()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// Every exec as (argv, artifact content seen)
    pub fn execs(&self) -> Vec<(Vec<String>, String)> {
        self.execs.lock().unwrap().clone()
    }

    pub fn exec_count(&self, program: &str) -> usize {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .filter(|(cmd, _)| cmd.first().map(String::as_str) == Some(program))
            .count()
    }

    /// Poll until every container is gone or `limit` elapses
    pub async fn wait_until_empty(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.live_containers() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.live_containers() == 0
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if self.fail_create {
            return Err(runtime_error(404, "no such image"));
        }

        let id = format!("fake-{}", spec.name);
        self.specs.lock().unwrap().push(spec.clone());
        let live = {
            let mut live = self.live.lock().unwrap();
            live.insert(id.clone(), spec.clone());
            live.len()
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        self.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(id)
    }

    async fn start_container(&self, _container_id: &str) -> Result<(), RuntimeError> {
        if self.fail_start {
            return Err(runtime_error(500, "cannot start container"));
        }
        Ok(())
    }

    async fn start_exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecHandle, RuntimeError> {
        let spec = self
            .live
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .ok_or_else(|| runtime_error(404, "no such container"))?;

        let content = std::fs::read_to_string(&spec.artifact_host_path).unwrap_or_default();
        self.execs.lock().unwrap().push((cmd.to_vec(), content.clone()));

        let exec = (self.script)(cmd, &content);
        if exec.dispatch_error {
            return Err(runtime_error(409, "container is not running"));
        }

        let exec_id = uuid::Uuid::new_v4().to_string();
        self.exit_codes
            .lock()
            .unwrap()
            .insert(exec_id.clone(), exec.exit_code);

        Ok(ExecHandle {
            exec_id,
            output: exec.into_stream(),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        Ok(self.exit_codes.lock().unwrap().get(exec_id).copied().flatten())
    }

    async fn stop_container(&self, _container_id: &str, _grace_secs: i64) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        match self.live.lock().unwrap().remove(container_id) {
            Some(_) => {
                self.removed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(runtime_error(404, "no such container")),
        }
    }
}

/// Fixture store backed by a map
#[derive(Default)]
pub(crate) struct MemoryFixtureStore {
    fixtures: HashMap<String, Vec<u8>>,
}

impl MemoryFixtureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, content: &str) -> Self {
        self.fixtures.insert(key.to_string(), content.as_bytes().to_vec());
        self
    }
}

#[async_trait]
impl FixtureStore for MemoryFixtureStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.fixtures
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
