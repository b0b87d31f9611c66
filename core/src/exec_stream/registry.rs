use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio::time::Instant;

use tern_protocol::SessionStatus;

use crate::config::ExecStreamConfig;
use crate::exec_stream::session::Session;
use crate::exec_stream::session_id::SessionId;
use crate::shell;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

static GLOBAL: OnceLock<Arc<ProcessRegistry>> = OnceLock::new();

/// Process-wide store of running and recently finished sessions. The
/// registry owns every session for its whole lifetime; the supervisor and
/// control operations only ever hold `Arc` handles scoped to their work.
#[derive(Debug)]
pub struct ProcessRegistry {
    config: ExecStreamConfig,
    next_session_id: AtomicU32,
    inner: Mutex<RegistryInner>,
    sweeper_started: AtomicBool,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    running: HashMap<SessionId, Arc<Session>>,
    finished: HashMap<SessionId, Arc<Session>>,
}

impl ProcessRegistry {
    pub fn new(config: ExecStreamConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_session_id: AtomicU32::new(0),
            inner: Mutex::new(RegistryInner::default()),
            sweeper_started: AtomicBool::new(false),
            sweeper: StdMutex::new(None),
        })
    }

    /// The singleton registry, built from the environment on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Self::new(ExecStreamConfig::from_env())))
    }

    pub fn config(&self) -> &ExecStreamConfig {
        &self.config
    }

    pub(crate) fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) async fn add(self: &Arc<Self>, session: Arc<Session>) {
        self.ensure_sweeper();
        self.inner.lock().await.running.insert(session.id, session);
    }

    pub(crate) async fn get_running(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.lock().await.running.get(&id).cloned()
    }

    pub(crate) async fn get_finished(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.lock().await.finished.get(&id).cloned()
    }

    /// Snapshot of both partitions, running first.
    pub(crate) async fn snapshot_partitions(&self) -> (Vec<Arc<Session>>, Vec<Arc<Session>>) {
        let inner = self.inner.lock().await;
        (
            inner.running.values().cloned().collect(),
            inner.finished.values().cloned().collect(),
        )
    }

    /// Records terminal state on the session and, on the first terminal
    /// transition, moves it from `running` to `finished`. Later calls for
    /// the same session are no-ops, so a late exit notification cannot
    /// overwrite a `Killed` status.
    pub(crate) async fn mark_exited(
        &self,
        id: SessionId,
        exit_code: Option<i32>,
        exit_signal: Option<String>,
        status: SessionStatus,
    ) {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.running.get(&id).cloned() else {
            return;
        };
        let first = {
            let mut st = session.state.lock().await;
            st.mark_exited(exit_code, exit_signal, status)
        };
        if first {
            let _ = session.ended.set(Instant::now());
            inner.running.remove(&id);
            inner.finished.insert(id, session);
        }
    }

    /// Removes the session from whichever partition holds it.
    pub async fn evict(&self, id: SessionId) {
        let mut inner = self.inner.lock().await;
        if inner.running.remove(&id).is_none() {
            inner.finished.remove(&id);
        }
    }

    /// Evicts every finished session whose end instant is older than the TTL.
    /// Running sessions are never touched.
    pub async fn sweep(&self, now: Instant) {
        let ttl = self.config.job_ttl;
        let expired: Vec<SessionId> = {
            let inner = self.inner.lock().await;
            inner
                .finished
                .iter()
                .filter(|(_, session)| match session.ended.get() {
                    Some(end) => now.duration_since(*end) > ttl,
                    None => false,
                })
                .map(|(id, _)| *id)
                .collect()
        };
        for id in expired {
            self.evict(id).await;
        }
    }

    /// Explicit teardown: stops the sweeper and force-kills anything still
    /// running, recording the synthetic terminal state for each session.
    pub async fn shutdown(&self) {
        self.stop_sweeper();
        let running: Vec<Arc<Session>> = {
            self.inner.lock().await.running.values().cloned().collect()
        };
        for session in running {
            shell::kill_process_tree(session.pid);
            self.mark_exited(
                session.id,
                None,
                Some("SIGKILL".to_string()),
                SessionStatus::Killed,
            )
            .await;
        }
    }

    fn stop_sweeper(&self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    /// Starts the periodic sweeper on first use. The task holds only a weak
    /// handle so a dropped registry tears it down.
    fn ensure_sweeper(self: &Arc<Self>) {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep(Instant::now()).await;
            }
        });
        if let Ok(mut guard) = self.sweeper.lock() {
            *guard = Some(handle);
        }
    }
}

impl Drop for ProcessRegistry {
    /// Best-effort teardown when the last handle goes away: no awaiting
    /// here, so children are killed without recording terminal state. Hosts
    /// wanting an orderly record call [`ProcessRegistry::shutdown`] first.
    fn drop(&mut self) {
        self.stop_sweeper();
        if let Ok(inner) = self.inner.try_lock() {
            for session in inner.running.values() {
                shell::kill_process_tree(session.pid);
            }
        }
    }
}
