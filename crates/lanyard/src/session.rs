//! Routing sessions shared by routed networks.
//!
//! Routed networks on the same parent interface and backend share one
//! [`RoutingManager`] and one monitor task. The first network attaching
//! starts the monitor, the last one detaching stops it. A monitor that
//! exited on its own is restarted by the next network attaching.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use lanyard_common::{LanyardResult, NetworkId};
use lanyard_network::{RoutingBackend, RoutingManager, RoutingProvider};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long a stopping monitor may take before it is aborted.
pub const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

type SessionKey = (String, RoutingBackend);

struct Session {
    manager: Arc<dyn RoutingManager>,
    shutdown: watch::Sender<bool>,
    monitor: JoinHandle<()>,
    networks: HashSet<NetworkId>,
}

/// Monitor of a session whose last network detached.
#[must_use]
pub struct StoppedSession {
    host_iface: String,
    backend: RoutingBackend,
    monitor: JoinHandle<()>,
}

impl StoppedSession {
    /// Wait for the monitor to exit, aborting it after
    /// [`MONITOR_STOP_TIMEOUT`].
    pub async fn join(self) {
        let abort = self.monitor.abort_handle();
        if tokio::time::timeout(MONITOR_STOP_TIMEOUT, self.monitor)
            .await
            .is_err()
        {
            tracing::warn!(
                host_iface = %self.host_iface,
                backend = %self.backend,
                "Routing monitor did not stop in time, aborting"
            );
            abort.abort();
        }
    }
}

/// Table of live routing sessions.
#[derive(Default)]
pub struct RoutingSessions {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl RoutingSessions {
    /// Attach `network` to the session for `host_iface` and `backend`,
    /// creating the session and spawning its monitor if needed.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if no manager could be built.
    pub fn attach(
        &self,
        provider: &dyn RoutingProvider,
        host_iface: &str,
        backend: RoutingBackend,
        network: &NetworkId,
    ) -> LanyardResult<Arc<dyn RoutingManager>> {
        let mut sessions = self.sessions.lock();
        let key = (host_iface.to_string(), backend);
        if let Some(session) = sessions.get_mut(&key) {
            session.networks.insert(network.clone());
            if session.monitor.is_finished() {
                tracing::info!(%host_iface, %backend, %network, "Restarting routing monitor");
                (session.shutdown, session.monitor) =
                    spawn_monitor(Arc::clone(&session.manager), host_iface, backend);
            }
            return Ok(Arc::clone(&session.manager));
        }

        let manager = provider.connect(backend, host_iface)?;
        let (shutdown, monitor) = spawn_monitor(Arc::clone(&manager), host_iface, backend);
        tracing::info!(%host_iface, %backend, network = %network, "Routing session started");

        sessions.insert(
            key,
            Session {
                manager: Arc::clone(&manager),
                shutdown,
                monitor,
                networks: HashSet::from([network.clone()]),
            },
        );
        Ok(manager)
    }

    /// Manager of an existing session.
    #[must_use]
    pub fn manager(
        &self,
        host_iface: &str,
        backend: RoutingBackend,
    ) -> Option<Arc<dyn RoutingManager>> {
        self.sessions
            .lock()
            .get(&(host_iface.to_string(), backend))
            .map(|s| Arc::clone(&s.manager))
    }

    /// Detach `network`. If it was the last user, signal the monitor to stop
    /// and hand it back so the caller can wait for it outside the lock.
    pub fn detach(
        &self,
        host_iface: &str,
        backend: RoutingBackend,
        network: &NetworkId,
    ) -> Option<StoppedSession> {
        let mut sessions = self.sessions.lock();
        let key = (host_iface.to_string(), backend);
        let session = sessions.get_mut(&key)?;
        session.networks.remove(network);
        if !session.networks.is_empty() {
            return None;
        }

        let session = sessions.remove(&key)?;
        // The monitor may already have exited and dropped its receiver
        let _ = session.shutdown.send(true);
        tracing::info!(%host_iface, %backend, "Routing session stopped");
        Some(StoppedSession {
            host_iface: key.0,
            backend,
            monitor: session.monitor,
        })
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

fn spawn_monitor(
    manager: Arc<dyn RoutingManager>,
    host_iface: &str,
    backend: RoutingBackend,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (shutdown, rx) = watch::channel(false);
    let host_iface = host_iface.to_string();
    let monitor = tokio::spawn(async move {
        match manager.start_monitoring(rx).await {
            Ok(()) => tracing::debug!(%host_iface, %backend, "Routing monitor stopped"),
            Err(e) => tracing::warn!(%host_iface, %backend, error = %e, "Routing monitor exited"),
        }
    });
    (shutdown, monitor)
}

impl std::fmt::Debug for RoutingSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.lock();
        f.debug_list()
            .entries(sessions.iter().map(|((iface, backend), s)| {
                (iface.clone(), *backend, s.networks.len())
            }))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanyard_common::LanyardError;
    use lanyard_network::IpNet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Manager {
        runs: AtomicUsize,
        stopped: AtomicUsize,
        // Runs up to this count fail immediately
        failing_runs: usize,
    }

    #[async_trait]
    impl RoutingManager for Manager {
        fn backend(&self) -> RoutingBackend {
            RoutingBackend::Gobgp
        }

        async fn start_monitoring(&self, mut shutdown: watch::Receiver<bool>) -> LanyardResult<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run <= self.failing_runs {
                return Err(LanyardError::Routing {
                    backend: "gobgp",
                    message: "connection refused".to_string(),
                });
            }
            let _ = shutdown.wait_for(|stop| *stop).await;
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn advertise_route(&self, _: IpNet) -> LanyardResult<()> {
            Ok(())
        }

        async fn withdraw_route(&self, _: IpNet) -> LanyardResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Provider {
        manager: Arc<Manager>,
        connects: AtomicUsize,
    }

    impl RoutingProvider for Provider {
        fn connect(&self, _: RoutingBackend, _: &str) -> LanyardResult<Arc<dyn RoutingManager>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&self.manager) as Arc<dyn RoutingManager>)
        }
    }

    fn id(s: &str) -> NetworkId {
        NetworkId::new(s).unwrap()
    }

    #[tokio::test]
    async fn shared_until_last_detach() {
        let provider = Provider::default();
        let sessions = RoutingSessions::default();
        let backend = RoutingBackend::Gobgp;

        sessions.attach(&provider, "eth0", backend, &id("n1")).unwrap();
        sessions.attach(&provider, "eth0", backend, &id("n2")).unwrap();
        assert_eq!(provider.connects.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.len(), 1);

        assert!(sessions.detach("eth0", backend, &id("n1")).is_none());
        assert!(sessions.manager("eth0", backend).is_some());

        let stopped = sessions.detach("eth0", backend, &id("n2")).unwrap();
        stopped.join().await;
        assert!(sessions.is_empty());
        assert_eq!(provider.manager.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sessions_are_per_parent() {
        let provider = Provider::default();
        let sessions = RoutingSessions::default();
        sessions
            .attach(&provider, "eth0", RoutingBackend::Gobgp, &id("n1"))
            .unwrap();
        sessions
            .attach(&provider, "eth1", RoutingBackend::Gobgp, &id("n2"))
            .unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.detach("eth2", RoutingBackend::Gobgp, &id("n1")).is_none());
    }

    #[tokio::test]
    async fn dead_monitor_is_restarted() {
        let provider = Provider {
            manager: Arc::new(Manager {
                failing_runs: 1,
                ..Manager::default()
            }),
            ..Provider::default()
        };
        let sessions = RoutingSessions::default();
        let backend = RoutingBackend::Gobgp;

        sessions.attach(&provider, "eth0", backend, &id("n1")).unwrap();
        while provider.manager.runs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        // Wait for the failed run to be reaped
        while !sessions
            .sessions
            .lock()
            .values()
            .all(|s| s.monitor.is_finished())
        {
            tokio::task::yield_now().await;
        }

        sessions.attach(&provider, "eth0", backend, &id("n2")).unwrap();
        while provider.manager.runs.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.connects.load(Ordering::SeqCst), 1);

        // A live monitor is left alone
        sessions.attach(&provider, "eth0", backend, &id("n3")).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(provider.manager.runs.load(Ordering::SeqCst), 2);

        sessions.detach("eth0", backend, &id("n1"));
        sessions.detach("eth0", backend, &id("n2"));
        let stopped = sessions.detach("eth0", backend, &id("n3")).unwrap();
        stopped.join().await;
        assert_eq!(provider.manager.stopped.load(Ordering::SeqCst), 1);
    }
}
