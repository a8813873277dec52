// The operations the latency test performs against a ZooKeeper session, and the ZooKeeper-backed
// implementation of them.

use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use zookeeper::{Acl, CreateMode, WatchedEvent, ZooKeeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    Persistent,
    Ephemeral,
}

/// A session with one server or ensemble.  Sessions are shared by the workers of an asynchronous
/// batch, hence Sync.

pub trait Session: Send + Sync {
    /// Returns the path of the created node.
    fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> Result<String>;

    fn set(&self, path: &str, data: &[u8]) -> Result<()>;

    fn get(&self, path: &str) -> Result<Vec<u8>>;

    fn delete(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> Result<bool>;

    /// Like `exists`, leaving a one-shot watch that notifies `watcher` when the node changes.
    fn exists_watch(&self, path: &str, watcher: Arc<CountingWatcher>) -> Result<bool>;

    /// Child names, not paths.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    fn close(&self) -> Result<()>;
}

/// Counts watch notifications and lets a thread wait for a number of them.

#[derive(Debug, Default)]
pub struct CountingWatcher {
    count: Mutex<usize>,
    cv: Condvar,
}

impl CountingWatcher {
    pub fn new() -> CountingWatcher {
        CountingWatcher::default()
    }

    pub fn notify(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.cv.notify_all();
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until `expected` notifications have arrived or `timeout` has passed, and return the
    /// count at that point.

    pub fn wait_for_expected(&self, expected: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count < expected {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            count = match self.cv.wait_timeout(count, deadline - now) {
                Ok((c, _)) => c,
                Err(e) => e.into_inner().0,
            };
        }
        *count
    }
}

pub struct ZkSession {
    connect_string: String,
    zk: ZooKeeper,
}

impl ZkSession {
    /// Connect and make one round trip, so that an unreachable server or an ensemble without
    /// quorum fails here rather than in the middle of a test.

    pub fn connect(connect_string: &str, timeout: Duration) -> Result<ZkSession> {
        info!("Connecting to {connect_string}");
        let zk = ZooKeeper::connect(connect_string, timeout, |event: WatchedEvent| {
            debug!("Session event {:?}", event);
        })
        .with_context(|| format!("Connecting to {connect_string}"))?;
        zk.exists("/", false)
            .with_context(|| format!("Probing {connect_string}"))?;
        Ok(ZkSession {
            connect_string: connect_string.to_string(),
            zk,
        })
    }
}

impl Session for ZkSession {
    fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> Result<String> {
        let mode = match mode {
            NodeMode::Persistent => CreateMode::Persistent,
            NodeMode::Ephemeral => CreateMode::Ephemeral,
        };
        Ok(self
            .zk
            .create(path, data.to_vec(), Acl::open_unsafe().clone(), mode)
            .with_context(|| format!("create {path}"))?)
    }

    fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        self.zk
            .set_data(path, data.to_vec(), None)
            .with_context(|| format!("set {path}"))?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let (data, _stat) = self
            .zk
            .get_data(path, false)
            .with_context(|| format!("get {path}"))?;
        Ok(data)
    }

    fn delete(&self, path: &str) -> Result<()> {
        Ok(self
            .zk
            .delete(path, None)
            .with_context(|| format!("delete {path}"))?)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self
            .zk
            .exists(path, false)
            .with_context(|| format!("exists {path}"))?
            .is_some())
    }

    fn exists_watch(&self, path: &str, watcher: Arc<CountingWatcher>) -> Result<bool> {
        Ok(self
            .zk
            .exists_w(path, move |_event: WatchedEvent| watcher.notify())
            .with_context(|| format!("exists {path}"))?
            .is_some())
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .zk
            .get_children(path, false)
            .with_context(|| format!("children {path}"))?)
    }

    fn close(&self) -> Result<()> {
        debug!("Closing session to {}", self.connect_string);
        Ok(self.zk.close()?)
    }
}

#[test]
fn test_counting_watcher() {
    let w = Arc::new(CountingWatcher::new());
    let w2 = w.clone();
    let t = std::thread::spawn(move || {
        for _ in 0..3 {
            w2.notify();
        }
    });
    assert!(w.wait_for_expected(3, Duration::from_secs(10)) == 3);
    t.join().unwrap();
    assert!(w.count() == 3);

    // Times out short of the expected count
    assert!(w.wait_for_expected(4, Duration::from_millis(10)) == 3);
}
