//! In-memory font backend for testing.

use crate::backend::{FontBackend, GlyphMap};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use fontsync_change::Pattern;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// One recorded `put_glyph` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPut {
    /// Glyph name.
    pub name: String,
    /// Glyph value as written.
    pub glyph: Value,
    /// Code points as written.
    pub code_points: Vec<u32>,
}

#[derive(Debug)]
struct FontData {
    glyphs: BTreeMap<String, Value>,
    glyph_map: GlyphMap,
    font_info: Value,
    axes: Value,
    sources: Value,
    units_per_em: u32,
    custom_data: Value,
    features: Value,
    kerning: Value,
}

impl Default for FontData {
    fn default() -> Self {
        Self {
            glyphs: BTreeMap::new(),
            glyph_map: GlyphMap::new(),
            font_info: json!({}),
            axes: json!([]),
            sources: json!([]),
            units_per_em: 1000,
            custom_data: json!({}),
            features: json!(""),
            kerning: json!({}),
        }
    }
}

/// An in-memory font backend.
///
/// Holds a whole font in memory, records every write, and supports
/// scripted write failures and artificial read latency so the
/// orchestrator's recovery and coalescing behavior can be tested
/// deterministically.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    font: RwLock<FontData>,
    read_only: bool,
    write_failures: Mutex<VecDeque<String>>,
    glyph_read_failures: Mutex<VecDeque<String>>,
    read_delay: Mutex<Option<Duration>>,
    glyph_reads: AtomicUsize,
    puts: Mutex<Vec<RecordedPut>>,
    deletes: Mutex<Vec<String>>,
    external_tx: Mutex<Option<mpsc::UnboundedSender<Option<Pattern>>>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Creates an empty writable backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty read-only backend.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Seeds a glyph without recording a write.
    pub fn seed_glyph(&self, name: &str, glyph: Value, code_points: Vec<u32>) {
        let mut font = self.font.write();
        font.glyphs.insert(name.to_owned(), glyph);
        font.glyph_map.insert(name.to_owned(), code_points);
    }

    /// Seeds the axis list without recording a write.
    pub fn seed_axes(&self, axes: Value) {
        self.font.write().axes = axes;
    }

    /// Queues a scripted failure for the next write call.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.write_failures.lock().push_back(message.into());
    }

    /// Queues a scripted failure for the next `get_glyph` call.
    pub fn fail_next_glyph_read(&self, message: impl Into<String>) {
        self.glyph_read_failures.lock().push_back(message.into());
    }

    /// Delays every glyph read by `delay`, for coalescing tests.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    /// Number of `get_glyph` calls that reached this backend.
    pub fn glyph_read_count(&self) -> usize {
        self.glyph_reads.load(Ordering::SeqCst)
    }

    /// All recorded `put_glyph` calls, in order.
    pub fn recorded_puts(&self) -> Vec<RecordedPut> {
        self.puts.lock().clone()
    }

    /// All recorded `delete_glyph` calls, in order.
    pub fn recorded_deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }

    /// Pushes an external-change notification to the watcher, if any.
    ///
    /// Returns false when nobody is watching.
    pub fn emit_external_change(&self, pattern: Option<Pattern>) -> bool {
        match self.external_tx.lock().as_ref() {
            Some(sender) => sender.send(pattern).is_ok(),
            None => false,
        }
    }

    /// True after `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> BackendResult<()> {
        if self.read_only {
            return Err(BackendError::ReadOnly);
        }
        if let Some(message) = self.write_failures.lock().pop_front() {
            return Err(BackendError::write_failed(message));
        }
        Ok(())
    }

    async fn apply_read_delay(&self) {
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl FontBackend for MemoryBackend {
    async fn get_glyph(&self, name: &str) -> BackendResult<Option<Value>> {
        self.glyph_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.glyph_read_failures.lock().pop_front() {
            return Err(BackendError::read_failed(message));
        }
        self.apply_read_delay().await;
        Ok(self.font.read().glyphs.get(name).cloned())
    }

    async fn get_glyph_map(&self) -> BackendResult<GlyphMap> {
        Ok(self.font.read().glyph_map.clone())
    }

    async fn get_font_info(&self) -> BackendResult<Value> {
        Ok(self.font.read().font_info.clone())
    }

    async fn get_axes(&self) -> BackendResult<Value> {
        Ok(self.font.read().axes.clone())
    }

    async fn get_sources(&self) -> BackendResult<Value> {
        Ok(self.font.read().sources.clone())
    }

    async fn get_units_per_em(&self) -> BackendResult<u32> {
        Ok(self.font.read().units_per_em)
    }

    async fn get_custom_data(&self) -> BackendResult<Value> {
        Ok(self.font.read().custom_data.clone())
    }

    async fn get_features(&self) -> BackendResult<Value> {
        Ok(self.font.read().features.clone())
    }

    async fn get_kerning(&self) -> BackendResult<Value> {
        Ok(self.font.read().kerning.clone())
    }

    fn is_writable(&self) -> bool {
        !self.read_only
    }

    async fn put_glyph(&self, name: &str, glyph: &Value, code_points: &[u32]) -> BackendResult<()> {
        self.check_writable()?;
        self.puts.lock().push(RecordedPut {
            name: name.to_owned(),
            glyph: glyph.clone(),
            code_points: code_points.to_vec(),
        });
        let mut font = self.font.write();
        font.glyphs.insert(name.to_owned(), glyph.clone());
        font.glyph_map.insert(name.to_owned(), code_points.to_vec());
        Ok(())
    }

    async fn delete_glyph(&self, name: &str) -> BackendResult<()> {
        self.check_writable()?;
        self.deletes.lock().push(name.to_owned());
        let mut font = self.font.write();
        font.glyphs.remove(name);
        font.glyph_map.remove(name);
        Ok(())
    }

    async fn put_glyph_map(&self, glyph_map: &GlyphMap) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().glyph_map = glyph_map.clone();
        Ok(())
    }

    async fn put_font_info(&self, font_info: &Value) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().font_info = font_info.clone();
        Ok(())
    }

    async fn put_axes(&self, axes: &Value) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().axes = axes.clone();
        Ok(())
    }

    async fn put_sources(&self, sources: &Value) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().sources = sources.clone();
        Ok(())
    }

    async fn put_units_per_em(&self, units_per_em: u32) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().units_per_em = units_per_em;
        Ok(())
    }

    async fn put_custom_data(&self, custom_data: &Value) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().custom_data = custom_data.clone();
        Ok(())
    }

    async fn put_features(&self, features: &Value) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().features = features.clone();
        Ok(())
    }

    async fn put_kerning(&self, kerning: &Value) -> BackendResult<()> {
        self.check_writable()?;
        self.font.write().kerning = kerning.clone();
        Ok(())
    }

    async fn find_glyphs_that_use_glyph(&self, name: &str) -> BackendResult<Vec<String>> {
        // Components reference their base glyph by name.
        let font = self.font.read();
        let mut users = Vec::new();
        for (glyph_name, glyph) in &font.glyphs {
            let component_names = glyph
                .get("layers")
                .and_then(Value::as_object)
                .into_iter()
                .flat_map(|layers| layers.values())
                .filter_map(|layer| layer.get("components"))
                .filter_map(Value::as_array)
                .flatten()
                .filter_map(|component| component.get("name"))
                .filter_map(Value::as_str);
            if component_names.into_iter().any(|base| base == name) {
                users.push(glyph_name.clone());
            }
        }
        Ok(users)
    }

    fn watch_external_changes(&self) -> Option<mpsc::UnboundedReceiver<Option<Pattern>>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.external_tx.lock() = Some(sender);
        Some(receiver)
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn glyph_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .put_glyph("A", &json!({"name": "A"}), &[65])
            .await
            .unwrap();

        assert_eq!(backend.get_glyph("A").await.unwrap(), Some(json!({"name": "A"})));
        assert_eq!(backend.get_glyph("B").await.unwrap(), None);
        assert_eq!(
            backend.get_glyph_map().await.unwrap(),
            GlyphMap::from([("A".to_owned(), vec![65])])
        );
    }

    #[tokio::test]
    async fn delete_removes_glyph_and_map_entry() {
        let backend = MemoryBackend::new();
        backend.seed_glyph("A", json!({"name": "A"}), vec![65]);

        backend.delete_glyph("A").await.unwrap();
        assert_eq!(backend.get_glyph("A").await.unwrap(), None);
        assert!(backend.get_glyph_map().await.unwrap().is_empty());
        assert_eq!(backend.recorded_deletes(), vec!["A".to_owned()]);
    }

    #[tokio::test]
    async fn read_only_rejects_writes() {
        let backend = MemoryBackend::read_only();
        assert!(!backend.is_writable());
        let result = backend.put_glyph("A", &json!({}), &[]).await;
        assert!(matches!(result, Err(BackendError::ReadOnly)));
    }

    #[tokio::test]
    async fn scripted_write_failure_fires_once() {
        let backend = MemoryBackend::new();
        backend.fail_next_write("disk full");

        let result = backend.put_glyph("A", &json!({}), &[65]).await;
        assert!(matches!(result, Err(BackendError::WriteFailed { .. })));
        // The failed write must not have touched the font.
        assert_eq!(backend.get_glyph("A").await.unwrap(), None);

        backend.put_glyph("A", &json!({}), &[65]).await.unwrap();
        assert!(backend.get_glyph("A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn component_users_are_found() {
        let backend = MemoryBackend::new();
        backend.seed_glyph("A", json!({"name": "A", "layers": {}}), vec![65]);
        backend.seed_glyph(
            "Aacute",
            json!({"name": "Aacute", "layers": {
                "fg": {"components": [{"name": "A"}, {"name": "acute"}]},
            }}),
            vec![193],
        );

        let users = backend.find_glyphs_that_use_glyph("A").await.unwrap();
        assert_eq!(users, vec!["Aacute".to_owned()]);
        assert!(backend
            .find_glyphs_that_use_glyph("B")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn external_changes_reach_the_watcher() {
        let backend = MemoryBackend::new();
        assert!(!backend.emit_external_change(None));

        let mut receiver = backend.watch_external_changes().unwrap();
        let pattern = Pattern::from_path(&fontsync_change::path(["glyphMap"]));
        assert!(backend.emit_external_change(Some(pattern.clone())));
        assert_eq!(receiver.recv().await, Some(Some(pattern)));
    }
}
