//! Font backend trait definition.

use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use fontsync_change::Pattern;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Glyph name to code point list.
pub type GlyphMap = BTreeMap<String, Vec<u32>>;

/// A pluggable storage backend for one font document.
///
/// Backends own the concrete file format; the editor core never
/// interprets storage. All operations are async; reads return decoded
/// JSON trees in the document's canonical shape.
///
/// # Invariants
///
/// - Reads after a successful write return the written value.
/// - `is_writable()` is constant for the backend's lifetime; the write
///   methods of a read-only backend fail with [`BackendError::ReadOnly`].
/// - `close` is called exactly once, at document teardown.
///
/// # Optional capabilities
///
/// `find_glyphs_that_use_glyph` and the background image pair default
/// to [`BackendError::NotSupported`]; `watch_external_changes` defaults
/// to `None` for backends that cannot observe out-of-band edits.
#[async_trait]
pub trait FontBackend: Send + Sync {
    /// Reads one glyph, or `None` if the font has no such glyph.
    async fn get_glyph(&self, name: &str) -> BackendResult<Option<Value>>;

    /// Reads the glyph name to code points mapping.
    async fn get_glyph_map(&self) -> BackendResult<GlyphMap>;

    /// Reads the font info record.
    async fn get_font_info(&self) -> BackendResult<Value>;

    /// Reads the axis list.
    async fn get_axes(&self) -> BackendResult<Value>;

    /// Reads the source list.
    async fn get_sources(&self) -> BackendResult<Value>;

    /// Reads the units-per-em value.
    async fn get_units_per_em(&self) -> BackendResult<u32>;

    /// Reads the custom data record.
    async fn get_custom_data(&self) -> BackendResult<Value>;

    /// Reads the feature text.
    async fn get_features(&self) -> BackendResult<Value>;

    /// Reads the kerning tables.
    async fn get_kerning(&self) -> BackendResult<Value>;

    /// True if this backend accepts writes.
    fn is_writable(&self) -> bool {
        false
    }

    /// Writes one glyph along with its code points.
    async fn put_glyph(
        &self,
        _name: &str,
        _glyph: &Value,
        _code_points: &[u32],
    ) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Deletes one glyph.
    async fn delete_glyph(&self, _name: &str) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the glyph map.
    async fn put_glyph_map(&self, _glyph_map: &GlyphMap) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the font info record.
    async fn put_font_info(&self, _font_info: &Value) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the axis list.
    async fn put_axes(&self, _axes: &Value) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the source list.
    async fn put_sources(&self, _sources: &Value) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the units-per-em value.
    async fn put_units_per_em(&self, _units_per_em: u32) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the custom data record.
    async fn put_custom_data(&self, _custom_data: &Value) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the feature text.
    async fn put_features(&self, _features: &Value) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Writes the kerning tables.
    async fn put_kerning(&self, _kerning: &Value) -> BackendResult<()> {
        Err(BackendError::ReadOnly)
    }

    /// Names the glyphs that use `name` as a component.
    async fn find_glyphs_that_use_glyph(&self, _name: &str) -> BackendResult<Vec<String>> {
        Err(BackendError::not_supported("findGlyphsThatUseGlyph"))
    }

    /// Reads a background image by identifier.
    async fn get_background_image(&self, _identifier: &str) -> BackendResult<Option<Value>> {
        Err(BackendError::not_supported("getBackgroundImage"))
    }

    /// Writes a background image.
    async fn put_background_image(&self, _identifier: &str, _data: &Value) -> BackendResult<()> {
        Err(BackendError::not_supported("putBackgroundImage"))
    }

    /// Starts watching for out-of-band modifications.
    ///
    /// Each received item scopes what may have changed; `None` means
    /// "assume everything changed". Backends that cannot detect
    /// external edits return `None` here.
    fn watch_external_changes(&self) -> Option<mpsc::UnboundedReceiver<Option<Pattern>>> {
        None
    }

    /// Releases backend resources. Called once at teardown.
    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}
