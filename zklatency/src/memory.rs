// An in-memory znode tree for testing the driver without a server.  Sessions made with `sibling`
// share the tree, like sessions to the servers of one ensemble.

use crate::session::{CountingWatcher, NodeMode, Session};

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

struct Node {
    data: Vec<u8>,
    owner: Option<usize>,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watches: Vec<(String, Arc<CountingWatcher>)>,
    next_session: usize,
}

impl Tree {
    fn fire(&mut self, path: &str) {
        let (fired, kept): (Vec<_>, Vec<_>) =
            self.watches.drain(..).partition(|(p, _)| p == path);
        self.watches = kept;
        for (_, w) in fired {
            w.notify();
        }
    }
}

pub struct MemorySession {
    id: usize,
    tree: Arc<Mutex<Tree>>,
    delay: Duration,
    fail_path: Option<String>,
}

fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(k) => Some(&path[..k]),
    }
}

impl MemorySession {
    pub fn new() -> MemorySession {
        let mut tree = Tree::default();
        tree.nodes.insert("/".to_string(), Node { data: vec![], owner: None });
        tree.next_session = 1;
        MemorySession {
            id: 0,
            tree: Arc::new(Mutex::new(tree)),
            delay: Duration::ZERO,
            fail_path: None,
        }
    }

    /// Every operation sleeps for `delay` first.
    pub fn with_delay(delay: Duration) -> MemorySession {
        MemorySession {
            delay,
            ..MemorySession::new()
        }
    }

    /// Every operation on `path` fails.
    pub fn failing_on(path: &str) -> MemorySession {
        MemorySession {
            fail_path: Some(path.to_string()),
            ..MemorySession::new()
        }
    }

    pub fn sibling(&self) -> MemorySession {
        let id = {
            let mut tree = self.lock();
            tree.next_session += 1;
            tree.next_session - 1
        };
        MemorySession {
            id,
            tree: self.tree.clone(),
            delay: self.delay,
            fail_path: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, op: &str, path: &str) -> Result<MutexGuard<'_, Tree>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail_path.as_deref() == Some(path) {
            bail!("{op} {path}: injected failure");
        }
        Ok(self.lock())
    }
}

impl Session for MemorySession {
    fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> Result<String> {
        let mut tree = self.enter("create", path)?;
        if tree.nodes.contains_key(path) {
            bail!("create {path}: node exists");
        }
        match parent(path) {
            Some(p) if tree.nodes.contains_key(p) => {}
            _ => bail!("create {path}: no parent"),
        }
        let owner = match mode {
            NodeMode::Persistent => None,
            NodeMode::Ephemeral => Some(self.id),
        };
        tree.nodes.insert(path.to_string(), Node { data: data.to_vec(), owner });
        Ok(path.to_string())
    }

    fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut tree = self.enter("set", path)?;
        match tree.nodes.get_mut(path) {
            Some(node) => node.data = data.to_vec(),
            None => bail!("set {path}: no node"),
        }
        tree.fire(path);
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let tree = self.enter("get", path)?;
        match tree.nodes.get(path) {
            Some(node) => Ok(node.data.clone()),
            None => bail!("get {path}: no node"),
        }
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut tree = self.enter("delete", path)?;
        if !tree.nodes.contains_key(path) {
            bail!("delete {path}: no node");
        }
        let prefix = format!("{path}/");
        if tree.nodes.keys().any(|k| k.starts_with(&prefix)) {
            bail!("delete {path}: not empty");
        }
        tree.nodes.remove(path);
        tree.fire(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let tree = self.enter("exists", path)?;
        Ok(tree.nodes.contains_key(path))
    }

    fn exists_watch(&self, path: &str, watcher: Arc<CountingWatcher>) -> Result<bool> {
        let mut tree = self.enter("exists", path)?;
        tree.watches.push((path.to_string(), watcher));
        Ok(tree.nodes.contains_key(path))
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.enter("children", path)?;
        if !tree.nodes.contains_key(path) {
            bail!("children {path}: no node");
        }
        Ok(tree
            .nodes
            .keys()
            .filter(|k| parent(k) == Some(path))
            .map(|k| k[path.len()..].trim_start_matches('/').to_string())
            .collect())
    }

    fn close(&self) -> Result<()> {
        let mut tree = self.lock();
        let mine = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(self.id))
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        for path in mine {
            tree.nodes.remove(&path);
            tree.fire(&path);
        }
        Ok(())
    }
}

#[test]
fn test_memory_session() {
    let s = MemorySession::new();
    assert!(s.create("/a/b", b"", NodeMode::Persistent).is_err());
    assert!(s.create("/a", b"1", NodeMode::Persistent).unwrap() == "/a");
    assert!(s.create("/a", b"1", NodeMode::Persistent).is_err());
    s.create("/a/b", b"2", NodeMode::Ephemeral).unwrap();
    assert!(s.children("/a").unwrap() == vec!["b"]);
    assert!(s.children("/").unwrap() == vec!["a"]);
    assert!(s.delete("/a").is_err());

    let w = Arc::new(CountingWatcher::new());
    assert!(s.exists_watch("/a/b", w.clone()).unwrap());
    assert!(s.exists_watch("/a", w.clone()).unwrap());
    s.set("/a/b", b"3").unwrap();
    assert!(w.count() == 1);
    // One-shot
    s.set("/a/b", b"4").unwrap();
    assert!(w.count() == 1);
    assert!(s.get("/a/b").unwrap() == b"4");

    // Ephemerals go away with their session, and siblings see the same tree
    let t = s.sibling();
    t.create("/a/c", b"", NodeMode::Ephemeral).unwrap();
    t.close().unwrap();
    assert!(!s.exists("/a/c").unwrap());
    assert!(t.exists("/a/b").unwrap());
    s.delete("/a/b").unwrap();
    s.delete("/a").unwrap();
    assert!(w.count() == 2);
}
