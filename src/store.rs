//! Persistence seam for accepted samples.
//!
//! The store is an external collaborator: the link engines hand it prepared
//! records and read them back, and assume every call is internally
//! serialized and atomic. A store reference is injected into whichever
//! engine needs it (no global instance); its lifecycle belongs to the
//! embedding application.
//!
//! [`MemoryStore`] is the reference implementation, used by the test suite
//! and suitable for simulator sessions.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

/// Identity of the backing project store.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectInfo {
    pub name: String,
    /// Human-readable location (path, DSN, `:memory:`).
    pub location: String,
}

/// Operator- and parameter-context captured with a saved sample.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleMetadata {
    pub qualified: bool,
    pub remark: String,
    pub send_current: f64,
    pub sample_rate: u32,
    pub stack_count: u32,
}

/// A sample prepared for persistence.
///
/// Channels are base64 text over raw little-endian `f32` values — a narrower
/// at-rest format than the big-endian doubles used on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedSample {
    pub point_id: i64,
    pub metadata: SampleMetadata,
    pub recv_b64: String,
    pub send_b64: String,
    pub off_b64: String,
    pub recv_rate_hz: u32,
    pub send_rate_hz: u32,
}

/// A sample row read back from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredSample {
    pub record_id: i64,
    pub point_id: i64,
    pub metadata: SampleMetadata,
    pub recv_b64: String,
    pub send_b64: String,
    pub off_b64: String,
    pub recv_rate_hz: u32,
    pub send_rate_hz: u32,
}

/// One measurement point in the project tree.
#[derive(Clone, Debug, PartialEq)]
pub struct PointNode {
    pub id: i64,
    pub name: String,
}

/// One survey line and its points.
#[derive(Clone, Debug, PartialEq)]
pub struct LineNode {
    pub id: i64,
    pub name: String,
    pub points: Vec<PointNode>,
}

/// Storage collaborator for accepted samples and the project tree.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Persist a sample; returns the new record id.
    async fn save_sample(&self, sample: PersistedSample) -> Result<i64>;

    /// The most recently saved sample for a point, if any.
    async fn latest_sample(&self, point_id: i64) -> Result<Option<StoredSample>>;

    /// Display name for a point.
    async fn point_name(&self, point_id: i64) -> Result<Option<String>>;

    /// The line → point tree of the open project.
    async fn project_tree(&self) -> Result<Vec<LineNode>>;

    /// Identity of the open project.
    fn project(&self) -> ProjectInfo;
}

/// In-memory [`SampleStore`].
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_record_id: i64,
    next_node_id: i64,
    samples: Vec<StoredSample>,
    lines: Vec<LineNode>,
    point_names: BTreeMap<i64, String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::named("scratch")
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store presenting the given project name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), inner: Mutex::new(Inner::default()) }
    }

    /// Register a survey line; returns its id.
    pub fn add_line(&self, name: impl Into<String>) -> i64 {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.next_node_id += 1;
        let id = inner.next_node_id;
        inner.lines.push(LineNode { id, name: name.into(), points: Vec::new() });
        id
    }

    /// Register a point under a line; returns its id.
    pub fn add_point(&self, line_id: i64, name: impl Into<String>) -> i64 {
        let name = name.into();
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.next_node_id += 1;
        let id = inner.next_node_id;
        if let Some(line) = inner.lines.iter_mut().find(|l| l.id == line_id) {
            line.points.push(PointNode { id, name: name.clone() });
        }
        inner.point_names.insert(id, name);
        id
    }

    /// Number of samples held, for tests.
    pub fn sample_count(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").samples.len()
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn save_sample(&self, sample: PersistedSample) -> Result<i64> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.next_record_id += 1;
        let record_id = inner.next_record_id;
        inner.samples.push(StoredSample {
            record_id,
            point_id: sample.point_id,
            metadata: sample.metadata,
            recv_b64: sample.recv_b64,
            send_b64: sample.send_b64,
            off_b64: sample.off_b64,
            recv_rate_hz: sample.recv_rate_hz,
            send_rate_hz: sample.send_rate_hz,
        });
        Ok(record_id)
    }

    async fn latest_sample(&self, point_id: i64) -> Result<Option<StoredSample>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.samples.iter().rev().find(|s| s.point_id == point_id).cloned())
    }

    async fn point_name(&self, point_id: i64) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.point_names.get(&point_id).cloned())
    }

    async fn project_tree(&self) -> Result<Vec<LineNode>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.lines.clone())
    }

    fn project(&self) -> ProjectInfo {
        ProjectInfo { name: self.name.clone(), location: ":memory:".to_string() }
    }
}
