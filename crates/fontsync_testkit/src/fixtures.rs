//! Canonical font fixtures and handler helpers.
//!
//! Provides a small seeded font and convenience constructors for
//! handlers in deferred-write mode, where tests control exactly when
//! the write queue drains.

use fontsync_backend::MemoryBackend;
use fontsync_core::{FontHandler, HandlerConfig};
use serde_json::{json, Value};
use std::sync::Arc;

/// A packed triangle contour: three on-curve points.
pub fn triangle_path() -> Value {
    json!({
        "coordinates": [0.0, 0.0, 100.0, 0.0, 50.0, 100.0],
        "pointTypes": [0, 0, 0],
        "contourInfo": [{"endPoint": 2, "isClosed": true}],
    })
}

/// A minimal glyph with one outline layer.
pub fn test_glyph(name: &str, x_advance: u32) -> Value {
    json!({
        "name": name,
        "xAdvance": x_advance,
        "layers": {
            "default": {"path": triangle_path(), "components": []},
        },
    })
}

/// A glyph built from a single component reference.
pub fn composite_glyph(name: &str, base: &str, x_advance: u32) -> Value {
    json!({
        "name": name,
        "xAdvance": x_advance,
        "layers": {
            "default": {
                "path": {"coordinates": [], "pointTypes": [], "contourInfo": []},
                "components": [{"name": base, "translation": [0, 120]}],
            },
        },
    })
}

/// An in-memory backend seeded with the canonical test font.
///
/// Glyphs: `A` (65), `B` (66), `Aacute` (193, a composite using `A`).
/// Two axes and a weight-range source list are seeded too.
pub fn seeded_font() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_glyph("A", test_glyph("A", 500), vec![65]);
    backend.seed_glyph("B", test_glyph("B", 520), vec![66]);
    backend.seed_glyph("Aacute", composite_glyph("Aacute", "A", 500), vec![193]);
    backend.seed_axes(json!([
        {"name": "Weight", "tag": "wght", "minValue": 100, "defaultValue": 400, "maxValue": 900},
        {"name": "Width", "tag": "wdth", "minValue": 50, "defaultValue": 100, "maxValue": 150},
    ]));
    backend
}

/// A handler over [`seeded_font`] in deferred-write mode.
///
/// Tests drain the queue with `handler.flush_writes().await` at the
/// points they want persistence to happen.
pub fn test_handler() -> (Arc<FontHandler>, Arc<MemoryBackend>) {
    let backend = seeded_font();
    let handler = FontHandler::new(
        backend.clone(),
        HandlerConfig::new().with_defer_writes(true),
    );
    (handler, backend)
}

/// Like [`test_handler`], with a caller-provided configuration.
pub fn test_handler_with(config: HandlerConfig) -> (Arc<FontHandler>, Arc<MemoryBackend>) {
    let backend = seeded_font();
    let handler = FontHandler::new(backend.clone(), config);
    (handler, backend)
}
