//! The per-document orchestrator.
//!
//! A [`FontHandler`] owns one font document: the authoritative cache,
//! the write-back queue, the session registry, and the reconciliation
//! of out-of-band backend modifications. All mutation flows through
//! [`FontHandler::edit_final`], which runs assemble, apply and fold
//! under a single edit mutex so readers never observe a half-applied
//! change.

use crate::cache::{CacheKey, LruCache};
use crate::config::HandlerConfig;
use crate::error::{CoreError, CoreResult};
use crate::session::{Session, SessionSink};
use crate::write_queue::{PendingWrite, WriteAction, WriteQueue};
use fontsync_backend::{FontBackend, GlyphMap};
use fontsync_change::{
    apply_change, format_path, Change, OutlineFunctions, Path, PathSegment, Pattern,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Cache and write queue, guarded together by the edit mutex.
struct EditState {
    cache: LruCache<CacheKey, Value>,
    queue: WriteQueue,
}

type FetchWaiter = oneshot::Sender<Result<Value, String>>;

/// Per-document orchestrator: cache, write-back, sessions, broadcast.
///
/// Created with [`FontHandler::new`] inside a tokio runtime; the
/// constructor spawns the background write-back task (unless writes
/// are deferred or the document is read-only) and, when the backend
/// supports it, the external-change watch task.
pub struct FontHandler {
    backend: Arc<dyn FontBackend>,
    config: HandlerConfig,
    read_only: bool,
    state: AsyncMutex<EditState>,
    sessions: RwLock<BTreeMap<u64, Arc<Session>>>,
    next_session_id: AtomicU64,
    pending_fetches: Mutex<HashMap<CacheKey, Vec<FetchWaiter>>>,
    broadcasts: mpsc::UnboundedSender<(u64, Change, bool)>,
    write_signal: Notify,
    idle_signal: Notify,
    dead: RwLock<Option<String>>,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    weak: Weak<FontHandler>,
}

impl FontHandler {
    /// Creates a handler for one font document.
    ///
    /// Must be called inside a tokio runtime. The document is forced
    /// read-only when the backend itself rejects writes.
    pub fn new(backend: Arc<dyn FontBackend>, config: HandlerConfig) -> Arc<Self> {
        let read_only = config.read_only || !backend.is_writable();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let handler = Arc::new_cyclic(|weak| Self {
            state: AsyncMutex::new(EditState {
                cache: LruCache::new(config.cache_capacity),
                queue: WriteQueue::new(),
            }),
            backend,
            config,
            read_only,
            sessions: RwLock::new(BTreeMap::new()),
            next_session_id: AtomicU64::new(1),
            pending_fetches: Mutex::new(HashMap::new()),
            broadcasts: broadcast_tx,
            write_signal: Notify::new(),
            idle_signal: Notify::new(),
            dead: RwLock::new(None),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            weak: weak.clone(),
        });

        {
            let broadcaster = Arc::clone(&handler);
            handler
                .tasks
                .lock()
                .push(tokio::spawn(broadcaster.run_broadcast_loop(broadcast_rx)));
        }
        if !handler.read_only && !handler.config.defer_writes {
            let writer = Arc::clone(&handler);
            handler.tasks.lock().push(tokio::spawn(writer.run_write_loop()));
        }
        if let Some(receiver) = handler.backend.watch_external_changes() {
            let watcher = Arc::clone(&handler);
            handler
                .tasks
                .lock()
                .push(tokio::spawn(watcher.run_watch_loop(receiver)));
        }
        handler
    }

    /// True when edits are kept in the cache but never persisted.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Registers a new session; dropping the returned guard
    /// unregisters it.
    pub fn connect(&self, sink: Arc<dyn SessionSink>) -> Connection {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, sink));
        self.sessions.write().insert(id, Arc::clone(&session));
        debug!(session_id = id, "session connected");
        Connection {
            handler: self.weak.clone(),
            session,
        }
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Waits until the last session disconnects.
    pub async fn wait_until_idle(&self) {
        loop {
            let idle = self.idle_signal.notified();
            if self.sessions.read().is_empty() {
                return;
            }
            idle.await;
        }
    }

    /// Adds to a session's change subscriptions.
    pub fn subscribe_changes(&self, session: &Session, pattern: &Pattern, want_live_changes: bool) {
        session.subscribe(pattern, want_live_changes);
    }

    /// Removes from a session's change subscriptions.
    pub fn unsubscribe_changes(
        &self,
        session: &Session,
        pattern: &Pattern,
        want_live_changes: bool,
    ) {
        session.unsubscribe(pattern, want_live_changes);
    }

    /// Reads one cache entry, fetching from the backend on a miss.
    ///
    /// Concurrent misses for the same key coalesce into one backend
    /// read, which runs on its own task and so completes even when
    /// the caller that triggered it goes away. The fetch result never
    /// overwrites a value an edit published in the meantime.
    pub async fn get_data(&self, key: &CacheKey) -> CoreResult<Value> {
        self.check_open()?;
        if let Some(value) = self.state.lock().await.cache.get(key) {
            return Ok(value.clone());
        }

        let (sender, receiver) = oneshot::channel();
        let leads = {
            let mut pending = self.pending_fetches.lock();
            match pending.get_mut(key) {
                Some(waiters) => {
                    waiters.push(sender);
                    false
                }
                None => {
                    pending.insert(key.clone(), vec![sender]);
                    true
                }
            }
        };
        if leads {
            // The fetch runs as its own task; every caller, the first
            // one included, is only a waiter, so an abandoned caller
            // cannot strand the others on a fetch nobody is driving.
            match self.weak.upgrade() {
                Some(handler) => {
                    let key = key.clone();
                    tokio::spawn(async move { handler.run_fetch(&key).await });
                }
                None => self.settle_fetch(key, Err("handler is shutting down".to_owned())),
            }
        }

        match receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(CoreError::fetch_failed(message)),
            Err(_) => Err(CoreError::fetch_failed("fetch was abandoned")),
        }
    }

    async fn run_fetch(&self, key: &CacheKey) {
        debug!(%key, "cache miss, fetching from backend");
        let outcome = match self.fetch_from_backend(key).await {
            Ok(value) => {
                let mut state = self.state.lock().await;
                match state.cache.get(key) {
                    // An edit landed while we were reading; the
                    // cached value is newer than the fetch.
                    Some(existing) => Ok(existing.clone()),
                    None => {
                        state.cache.insert(key.clone(), value.clone());
                        Ok(value)
                    }
                }
            }
            Err(error) => Err(error.to_string()),
        };
        self.settle_fetch(key, outcome);
    }

    /// Reads one glyph, or `None` if the font has no such glyph.
    pub async fn get_glyph(&self, name: &str) -> CoreResult<Option<Value>> {
        let value = self.get_data(&CacheKey::glyph(name)).await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Broadcasts a non-persisted preview change to live subscribers.
    ///
    /// Incremental changes never touch the cache or the backend.
    pub async fn edit_incremental(&self, session: &Session, change: &Change) -> CoreResult<()> {
        self.check_open()?;
        self.broadcast_change(session.id(), change, true);
        Ok(())
    }

    /// Applies a final change: assemble, apply, fold into the cache,
    /// enqueue backend writes, broadcast to other matching sessions.
    ///
    /// When applying fails after previews went out, `rollback` is
    /// broadcast to live subscribers so their preview state reverts.
    pub async fn edit_final(
        &self,
        session: &Session,
        change: &Change,
        rollback: Option<&Change>,
        label: &str,
        broadcast: bool,
    ) -> CoreResult<()> {
        self.check_open()?;
        if let Some(reason) = self.dead.read().clone() {
            return Err(CoreError::EditingDisabled { reason });
        }

        let roots = collect_edit_roots(change)?;
        if roots.is_empty() {
            return Ok(());
        }
        let glyph_names = collect_glyph_names(change);
        debug!(session_id = session.id(), label, ?roots, "applying edit");

        let mut scheduled = false;
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            // Assemble the sparse root object from the cache.
            let mut root = serde_json::Map::new();
            let mut glyphs_before: BTreeMap<String, Value> = BTreeMap::new();
            for field in &roots {
                if field == "glyphs" {
                    let mut glyphs = serde_json::Map::new();
                    for name in &glyph_names {
                        let value = self
                            .fetch_locked(&mut state.cache, &CacheKey::glyph(name))
                            .await?;
                        if !value.is_null() {
                            glyphs.insert(name.clone(), value.clone());
                        }
                        glyphs_before.insert(name.clone(), value);
                    }
                    root.insert("glyphs".to_owned(), Value::Object(glyphs));
                } else {
                    let value = self
                        .fetch_locked(&mut state.cache, &CacheKey::field(field))
                        .await?;
                    root.insert(field.clone(), value);
                }
            }

            let before_map = root;
            let mut after = Value::Object(before_map.clone());
            if let Err(apply_error) = apply_change(&mut after, change, &OutlineFunctions) {
                drop(guard);
                warn!(session_id = session.id(), label, error = %apply_error, "edit failed to apply");
                if broadcast {
                    if let Some(rollback) = rollback {
                        self.broadcast_change(session.id(), rollback, true);
                    }
                }
                return Err(apply_error.into());
            }

            let Some(after_map) = after.as_object() else {
                return Err(CoreError::invalid_data("font", "root must be an object"));
            };

            // Fold the applied state back into cache and queue.
            for field in &roots {
                if field == "glyphs" {
                    let glyphs_after = after_map
                        .get("glyphs")
                        .and_then(Value::as_object)
                        .ok_or_else(|| {
                            CoreError::invalid_data("glyphs", "glyphs must be an object")
                        })?
                        .clone();
                    let glyph_map_value = match after_map.get("glyphMap") {
                        Some(value) => value.clone(),
                        None => {
                            self.fetch_locked(&mut state.cache, &CacheKey::field("glyphMap"))
                                .await?
                        }
                    };
                    for name in &glyph_names {
                        let previous = glyphs_before.get(name).cloned().unwrap_or(Value::Null);
                        match glyphs_after.get(name) {
                            Some(glyph) if *glyph != previous => {
                                state
                                    .cache
                                    .insert(CacheKey::glyph(name), glyph.clone());
                                if !self.read_only {
                                    let action = self.glyph_write_action(
                                        name,
                                        glyph.clone(),
                                        code_points_for(&glyph_map_value, name),
                                    );
                                    schedule_write(
                                        &mut state.queue,
                                        CacheKey::glyph(name),
                                        session.id(),
                                        action,
                                    );
                                    scheduled = true;
                                }
                            }
                            None if !previous.is_null() => {
                                state.cache.insert(CacheKey::glyph(name), Value::Null);
                                if !self.read_only {
                                    let action = self.glyph_delete_action(name);
                                    schedule_write(
                                        &mut state.queue,
                                        CacheKey::glyph(name),
                                        session.id(),
                                        action,
                                    );
                                    scheduled = true;
                                }
                            }
                            _ => {}
                        }
                    }
                } else {
                    let value = after_map.get(field).cloned().unwrap_or(Value::Null);
                    if before_map.get(field) == Some(&value) {
                        continue;
                    }
                    state.cache.insert(CacheKey::field(field), value.clone());
                    if !self.read_only {
                        let action = self.field_write_action(field, value)?;
                        schedule_write(
                            &mut state.queue,
                            CacheKey::field(field),
                            session.id(),
                            action,
                        );
                        scheduled = true;
                    }
                }
            }
        }

        if scheduled && !self.config.defer_writes {
            self.write_signal.notify_one();
        }
        if broadcast {
            self.broadcast_change(session.id(), change, false);
        }
        Ok(())
    }

    /// Reconciles an out-of-band backend modification.
    ///
    /// `None` means "assume everything changed": the whole cache is
    /// dropped and every session is told to reload. Otherwise matching
    /// cache entries are dropped, a cached glyph map is re-read and
    /// diffed into a synthetic change for its subscribers, and each
    /// session is told to reload the intersection of its subscriptions
    /// with the reported scope.
    pub async fn process_external_changes(&self, reload_pattern: Option<Pattern>) {
        let Some(pattern) = reload_pattern else {
            self.state.lock().await.cache.clear();
            for session in self.all_sessions() {
                session.sink().reload_data(None).await;
            }
            return;
        };
        if pattern.is_empty() {
            return;
        }

        let glyph_map_scope = Pattern::from_path(&vec![PathSegment::Key("glyphMap".to_owned())]);
        let mut synthetic: Option<Change> = None;
        {
            let mut state = self.state.lock().await;
            let glyph_map_key = CacheKey::field("glyphMap");
            if !pattern.intersect(&glyph_map_scope).is_empty()
                && state.cache.contains_key(&glyph_map_key)
            {
                synthetic = self.refresh_glyph_map(&mut state.cache).await;
            }
            let cached: Vec<CacheKey> = state.cache.keys().cloned().collect();
            for key in cached {
                if key == glyph_map_key {
                    continue;
                }
                let scope = Pattern::from_path(&key_path(&key));
                if !pattern.intersect(&scope).is_empty() {
                    state.cache.remove(&key);
                }
            }
        }

        if let Some(change) = &synthetic {
            for session in self.all_sessions() {
                if session.wants_change(change, false) {
                    session.sink().external_change(change, false).await;
                }
            }
        }
        for session in self.all_sessions() {
            let mut scope = session.subscribed_pattern().intersect(&pattern);
            if synthetic.is_some() {
                // Glyph map subscribers already got the synthetic change.
                scope = scope.difference(&glyph_map_scope);
            }
            if !scope.is_empty() {
                session.sink().reload_data(Some(&scope)).await;
            }
        }
    }

    /// Drains the write queue inline, for deferred-write mode.
    pub async fn flush_writes(&self) {
        self.drain_pending().await;
    }

    /// Names the glyphs that use `name` as a component.
    pub async fn find_glyphs_that_use_glyph(&self, name: &str) -> CoreResult<Vec<String>> {
        self.check_open()?;
        Ok(self.backend.find_glyphs_that_use_glyph(name).await?)
    }

    /// Reads a background image by identifier.
    pub async fn get_background_image(&self, identifier: &str) -> CoreResult<Option<Value>> {
        self.check_open()?;
        Ok(self.backend.get_background_image(identifier).await?)
    }

    /// Writes a background image.
    pub async fn put_background_image(&self, identifier: &str, data: &Value) -> CoreResult<()> {
        self.check_open()?;
        if self.read_only {
            return Err(fontsync_backend::BackendError::ReadOnly.into());
        }
        Ok(self.backend.put_background_image(identifier, data).await?)
    }

    /// Shuts the document down: stops the background tasks and closes
    /// the backend. Pending writes are not flushed; call
    /// [`FontHandler::flush_writes`] first when they must land.
    pub async fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.backend.close().await?;
        Ok(())
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    fn drop_session(&self, id: u64) {
        let mut sessions = self.sessions.write();
        sessions.remove(&id);
        debug!(session_id = id, "session disconnected");
        if sessions.is_empty() {
            self.idle_signal.notify_waiters();
        }
    }

    /// Queues a change for delivery to every other matching session.
    /// Deliveries run on the broadcast task, in queue order, so a slow
    /// sink never stalls the editing call that caused the change.
    fn broadcast_change(&self, origin: u64, change: &Change, is_live_change: bool) {
        let _ = self.broadcasts.send((origin, change.clone(), is_live_change));
    }

    async fn run_broadcast_loop(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<(u64, Change, bool)>,
    ) {
        while let Some((origin, change, is_live_change)) = receiver.recv().await {
            for session in self.all_sessions() {
                if session.id() != origin && session.wants_change(&change, is_live_change) {
                    session.sink().external_change(&change, is_live_change).await;
                }
            }
        }
    }

    /// Cache-or-fetch while already holding the edit mutex. Bypasses
    /// the coalescing table; re-entering [`FontHandler::get_data`]
    /// here would deadlock on the state lock.
    async fn fetch_locked(
        &self,
        cache: &mut LruCache<CacheKey, Value>,
        key: &CacheKey,
    ) -> CoreResult<Value> {
        if let Some(value) = cache.get(key) {
            return Ok(value.clone());
        }
        let value = self.fetch_from_backend(key).await?;
        cache.insert(key.clone(), value.clone());
        Ok(value)
    }

    async fn fetch_from_backend(&self, key: &CacheKey) -> CoreResult<Value> {
        match key {
            CacheKey::Glyph(name) => {
                let glyph = self.backend.get_glyph(name).await?;
                // Missing glyphs are cached as null so repeated reads
                // of an absent glyph stay cheap.
                Ok(glyph.unwrap_or(Value::Null))
            }
            CacheKey::Field(field) => match field.as_str() {
                "glyphMap" => {
                    let glyph_map = self.backend.get_glyph_map().await?;
                    serde_json::to_value(glyph_map)
                        .map_err(|e| CoreError::invalid_data("glyphMap", e.to_string()))
                }
                "fontInfo" => Ok(self.backend.get_font_info().await?),
                "axes" => Ok(self.backend.get_axes().await?),
                "sources" => Ok(self.backend.get_sources().await?),
                "unitsPerEm" => Ok(Value::from(self.backend.get_units_per_em().await?)),
                "customData" => Ok(self.backend.get_custom_data().await?),
                "features" => Ok(self.backend.get_features().await?),
                "kerning" => Ok(self.backend.get_kerning().await?),
                other => Err(CoreError::invalid_data(other, "unknown font field")),
            },
        }
    }

    fn settle_fetch(&self, key: &CacheKey, outcome: Result<Value, String>) {
        let waiters = self.pending_fetches.lock().remove(key).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn glyph_write_action(&self, name: &str, glyph: Value, code_points: Vec<u32>) -> WriteAction {
        let backend = Arc::clone(&self.backend);
        let name = name.to_owned();
        Box::pin(async move { backend.put_glyph(&name, &glyph, &code_points).await })
    }

    fn glyph_delete_action(&self, name: &str) -> WriteAction {
        let backend = Arc::clone(&self.backend);
        let name = name.to_owned();
        Box::pin(async move { backend.delete_glyph(&name).await })
    }

    fn field_write_action(&self, field: &str, value: Value) -> CoreResult<WriteAction> {
        let backend = Arc::clone(&self.backend);
        let action: WriteAction = match field {
            "glyphMap" => {
                let glyph_map: GlyphMap = serde_json::from_value(value)
                    .map_err(|e| CoreError::invalid_data("glyphMap", e.to_string()))?;
                Box::pin(async move { backend.put_glyph_map(&glyph_map).await })
            }
            "unitsPerEm" => {
                let units_per_em = value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        CoreError::invalid_data("unitsPerEm", "must be an unsigned 32-bit integer")
                    })?;
                Box::pin(async move { backend.put_units_per_em(units_per_em).await })
            }
            "fontInfo" => Box::pin(async move { backend.put_font_info(&value).await }),
            "axes" => Box::pin(async move { backend.put_axes(&value).await }),
            "sources" => Box::pin(async move { backend.put_sources(&value).await }),
            "customData" => Box::pin(async move { backend.put_custom_data(&value).await }),
            "features" => Box::pin(async move { backend.put_features(&value).await }),
            "kerning" => Box::pin(async move { backend.put_kerning(&value).await }),
            other => return Err(CoreError::invalid_data(other, "unknown font field")),
        };
        Ok(action)
    }

    /// Re-reads the glyph map and returns a synthetic change covering
    /// the differences. The cache entry is replaced in place; on a
    /// read failure it is dropped instead so the next reader refetches.
    async fn refresh_glyph_map(&self, cache: &mut LruCache<CacheKey, Value>) -> Option<Change> {
        let key = CacheKey::field("glyphMap");
        let old = cache.peek(&key).cloned()?;
        let new = match self.fetch_from_backend(&key).await {
            Ok(value) => value,
            Err(error) => {
                warn!(%error, "glyph map refresh failed, dropping cache entry");
                cache.remove(&key);
                return None;
            }
        };
        cache.insert(key, new.clone());

        let old_map = old.as_object()?;
        let new_map = new.as_object()?;
        let glyph_map_path = vec![PathSegment::Key("glyphMap".to_owned())];
        let mut children = Vec::new();
        for (name, code_points) in new_map {
            if old_map.get(name) != Some(code_points) {
                children.push(Change::assign(
                    glyph_map_path.clone(),
                    name.clone(),
                    code_points.clone(),
                ));
            }
        }
        for name in old_map.keys() {
            if !new_map.contains_key(name) {
                children.push(Change::delete_attr(glyph_map_path.clone(), name.clone()));
            }
        }
        Change::structural(Vec::new(), children).normalized()
    }

    async fn run_write_loop(self: Arc<Self>) {
        loop {
            let wakeup = self.write_signal.notified();
            // Each drain runs in a child task so a panicking write
            // action surfaces as a JoinError here instead of killing
            // the loop silently while edits keep queueing writes.
            let drainer = Arc::clone(&self);
            let drained = match tokio::spawn(async move { drainer.drain_pending().await }).await {
                Ok(count) => count,
                Err(join_error) => {
                    error!(%join_error, "write task failed, disabling editing");
                    *self.dead.write() = Some("the write task stopped unexpectedly".to_owned());
                    return;
                }
            };
            if drained == 0 {
                wakeup.await;
            }
        }
    }

    async fn run_watch_loop(
        self: Arc<Self>,
        mut receiver: tokio::sync::mpsc::UnboundedReceiver<Option<Pattern>>,
    ) {
        while let Some(reload_pattern) = receiver.recv().await {
            self.process_external_changes(reload_pattern).await;
        }
    }

    async fn drain_pending(&self) -> usize {
        let mut drained = 0;
        loop {
            let entry = self.state.lock().await.queue.pop_front();
            let Some((key, write)) = entry else {
                return drained;
            };
            self.perform_write(key, write).await;
            drained += 1;
        }
    }

    /// Performs one queued write. On failure the key is reloaded from
    /// the backend and the originating session is told its edit was
    /// reverted; if that reload also fails the document stops
    /// accepting edits. A reload result is discarded when a newer
    /// write for the key got queued in the meantime, since the cache
    /// already holds that write's value.
    async fn perform_write(&self, key: CacheKey, write: PendingWrite) {
        let error = match write.action.await {
            Ok(()) => {
                debug!(%key, "write committed");
                return;
            }
            Err(error) => error,
        };
        warn!(%key, %error, "backend write failed, reverting");

        match self.fetch_from_backend(&key).await {
            Ok(value) => {
                let mut state = self.state.lock().await;
                // A newer edit may have queued its own write for this
                // key while the reload ran; its cached value
                // supersedes the backend's older state.
                if !state.queue.contains_key(&key) {
                    state.cache.insert(key.clone(), value);
                }
            }
            Err(fetch_error) => {
                let mut state = self.state.lock().await;
                if state.queue.contains_key(&key) {
                    warn!(%key, %fetch_error, "revert reload failed, a newer write is pending");
                } else {
                    error!(%key, %fetch_error, "revert reload failed, disabling editing");
                    state.cache.remove(&key);
                    *self.dead.write() = Some(format!(
                        "a write failed and the data could not be reloaded: {fetch_error}"
                    ));
                }
            }
        }

        if let Some(session_id) = write.session_id {
            let session = self.sessions.read().get(&session_id).cloned();
            if let Some(session) = session {
                session
                    .sink()
                    .edit_reverted(
                        &format!("The edit could not be saved: {error}"),
                        &write.reload_pattern,
                    )
                    .await;
            }
        }
    }
}

/// Scoped session registration returned by [`FontHandler::connect`].
///
/// Dropping the guard unregisters the session; when the last one goes,
/// [`FontHandler::wait_until_idle`] wakes up.
pub struct Connection {
    handler: Weak<FontHandler>,
    session: Arc<Session>,
}

impl Connection {
    /// The registered session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Deref for Connection {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.upgrade() {
            handler.drop_session(self.session.id());
        }
    }
}

fn schedule_write(queue: &mut WriteQueue, key: CacheKey, session_id: u64, action: WriteAction) {
    let reload_pattern = Pattern::from_path(&key_path(&key));
    queue.schedule(
        key,
        PendingWrite {
            action,
            session_id: Some(session_id),
            reload_pattern,
        },
    );
}

fn key_path(key: &CacheKey) -> Path {
    match key {
        CacheKey::Field(field) => vec![PathSegment::Key(field.clone())],
        CacheKey::Glyph(name) => vec![
            PathSegment::Key("glyphs".to_owned()),
            PathSegment::Key(name.clone()),
        ],
    }
}

/// Top-level font fields a change touches. A change whose subject is
/// the font root contributes its function's key argument; array
/// indices can never be edit roots.
fn collect_edit_roots(change: &Change) -> CoreResult<BTreeSet<String>> {
    let mut roots = BTreeSet::new();
    walk_roots(change, &mut roots)?;
    Ok(roots)
}

fn walk_roots(change: &Change, roots: &mut BTreeSet<String>) -> CoreResult<()> {
    match change.path.first() {
        Some(PathSegment::Key(field)) => {
            roots.insert(field.clone());
            return Ok(());
        }
        Some(PathSegment::Index(_)) => {
            return Err(CoreError::InvalidEditRoot {
                path: format_path(&change.path),
            });
        }
        None => {}
    }
    if change.function.is_some() {
        match change.arguments.first() {
            Some(Value::String(field)) => {
                roots.insert(field.clone());
            }
            _ => {
                return Err(CoreError::InvalidEditRoot {
                    path: format_path(&change.path),
                });
            }
        }
    }
    for child in &change.children {
        walk_roots(child, roots)?;
    }
    Ok(())
}

/// Glyph names a change touches, including glyphs addressed by a
/// function key argument on the glyphs container itself.
fn collect_glyph_names(change: &Change) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    gather_glyph_names(change, &[], &mut names);
    names
}

fn gather_glyph_names(change: &Change, prefix: &[PathSegment], names: &mut BTreeSet<String>) {
    let mut absolute: Path = prefix.to_vec();
    absolute.extend(change.path.iter().cloned());

    let under_glyphs = matches!(absolute.first(), Some(PathSegment::Key(field)) if field == "glyphs");
    if !under_glyphs {
        if absolute.is_empty() {
            for child in &change.children {
                gather_glyph_names(child, &absolute, names);
            }
        }
        return;
    }
    if let Some(PathSegment::Key(name)) = absolute.get(1) {
        names.insert(name.clone());
        return;
    }
    if absolute.len() == 1 {
        if change.function.is_some() {
            if let Some(Value::String(name)) = change.arguments.first() {
                names.insert(name.clone());
            }
        }
        for child in &change.children {
            gather_glyph_names(child, &absolute, names);
        }
    }
}

fn code_points_for(glyph_map: &Value, name: &str) -> Vec<u32> {
    glyph_map
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|n| u32::try_from(n).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, SinkEvent};
    use fontsync_backend::MemoryBackend;
    use fontsync_change::path;
    use serde_json::json;
    use std::time::Duration;

    fn deferred_handler(backend: Arc<MemoryBackend>) -> Arc<FontHandler> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        FontHandler::new(backend, HandlerConfig::new().with_defer_writes(true))
    }

    fn seeded_backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_glyph("A", json!({"name": "A", "xAdvance": 500}), vec![65]);
        backend.seed_glyph("B", json!({"name": "B", "xAdvance": 520}), vec![66]);
        backend
    }

    fn connect_with_sink(handler: &Arc<FontHandler>) -> (Connection, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let connection = handler.connect(sink.clone());
        (connection, sink)
    }

    fn set_x_advance(value: i64) -> Change {
        Change::assign(path(["glyphs", "A"]), "xAdvance", json!(value))
    }

    #[tokio::test]
    async fn get_glyph_reads_through_the_cache() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());

        let glyph = handler.get_glyph("A").await.unwrap().unwrap();
        assert_eq!(glyph["xAdvance"], json!(500));
        handler.get_glyph("A").await.unwrap();
        assert_eq!(backend.glyph_read_count(), 1);

        assert_eq!(handler.get_glyph("Missing").await.unwrap(), None);
        // Absent glyphs are cached too.
        assert_eq!(handler.get_glyph("Missing").await.unwrap(), None);
        assert_eq!(backend.glyph_read_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_one_fetch() {
        let backend = seeded_backend();
        backend.set_read_delay(Duration::from_millis(20));
        let handler = deferred_handler(backend.clone());

        let (first, second, third) = tokio::join!(
            handler.get_glyph("A"),
            handler.get_glyph("A"),
            handler.get_glyph("A"),
        );
        assert_eq!(first.unwrap(), second.unwrap());
        assert!(third.unwrap().is_some());
        assert_eq!(backend.glyph_read_count(), 1);
    }

    #[tokio::test]
    async fn fetch_survives_an_abandoned_caller() {
        let backend = seeded_backend();
        backend.set_read_delay(Duration::from_millis(40));
        let handler = deferred_handler(backend.clone());

        let first_caller = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.get_glyph("A").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first_caller.abort();
        assert!(first_caller.await.unwrap_err().is_cancelled());

        // The fetch keeps running; a later caller joins it instead of
        // waiting forever on a dead coalescing entry.
        let glyph = tokio::time::timeout(Duration::from_secs(1), handler.get_glyph("A"))
            .await
            .expect("fetch must complete after the first caller went away")
            .unwrap()
            .unwrap();
        assert_eq!(glyph["xAdvance"], json!(500));
        assert_eq!(backend.glyph_read_count(), 1);
    }

    #[tokio::test]
    async fn edit_final_updates_cache_and_persists() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, _sink) = connect_with_sink(&handler);

        handler
            .edit_final(connection.session(), &set_x_advance(510), None, "move", true)
            .await
            .unwrap();

        let cached = handler.get_glyph("A").await.unwrap().unwrap();
        assert_eq!(cached["xAdvance"], json!(510));
        assert!(backend.recorded_puts().is_empty());

        handler.flush_writes().await;
        let puts = backend.recorded_puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].name, "A");
        assert_eq!(puts[0].glyph["xAdvance"], json!(510));
        assert_eq!(puts[0].code_points, vec![65]);
    }

    #[tokio::test]
    async fn consecutive_edits_coalesce_into_one_write() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, _sink) = connect_with_sink(&handler);

        for advance in [510, 520, 530] {
            handler
                .edit_final(connection.session(), &set_x_advance(advance), None, "move", true)
                .await
                .unwrap();
        }
        handler.flush_writes().await;

        let puts = backend.recorded_puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].glyph["xAdvance"], json!(530));
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribed_sessions_only() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend);
        let (editor, editor_sink) = connect_with_sink(&handler);
        let (subscriber, subscriber_sink) = connect_with_sink(&handler);
        let (bystander, bystander_sink) = connect_with_sink(&handler);

        handler.subscribe_changes(
            subscriber.session(),
            &Pattern::from_path(&path(["glyphs", "A"])),
            false,
        );
        handler.subscribe_changes(
            bystander.session(),
            &Pattern::from_path(&path(["glyphs", "B"])),
            false,
        );

        handler
            .edit_final(editor.session(), &set_x_advance(600), None, "move", true)
            .await
            .unwrap();
        subscriber_sink.wait_for(1).await;

        assert_eq!(editor_sink.event_count(), 0);
        assert_eq!(bystander_sink.event_count(), 0);
        let events = subscriber_sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SinkEvent::ExternalChange { change, is_live_change } => {
                assert!(!is_live_change);
                assert_eq!(change, &set_x_advance(600));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn incremental_edits_reach_live_subscribers_only() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (editor, _) = connect_with_sink(&handler);
        let (live, live_sink) = connect_with_sink(&handler);
        let (final_only, final_sink) = connect_with_sink(&handler);

        let pattern = Pattern::from_path(&path(["glyphs", "A"]));
        handler.subscribe_changes(live.session(), &pattern, true);
        handler.subscribe_changes(final_only.session(), &pattern, false);

        handler
            .edit_incremental(editor.session(), &set_x_advance(505))
            .await
            .unwrap();
        live_sink.wait_for(1).await;

        assert_eq!(live_sink.event_count(), 1);
        assert_eq!(final_sink.event_count(), 0);
        // Nothing was cached or persisted.
        handler.flush_writes().await;
        assert!(backend.recorded_puts().is_empty());
        assert_eq!(
            handler.get_glyph("A").await.unwrap().unwrap()["xAdvance"],
            json!(500)
        );
    }

    struct StalledSink;

    #[async_trait::async_trait]
    impl SessionSink for StalledSink {
        async fn external_change(&self, _change: &Change, _is_live_change: bool) {
            std::future::pending::<()>().await;
        }

        async fn reload_data(&self, _pattern: Option<&Pattern>) {}

        async fn edit_reverted(&self, _message: &str, _reload_pattern: &Pattern) {}
    }

    #[tokio::test]
    async fn stalled_subscriber_never_blocks_the_editor() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend);
        let (editor, _) = connect_with_sink(&handler);
        let stalled = handler.connect(Arc::new(StalledSink));
        handler.subscribe_changes(
            stalled.session(),
            &Pattern::from_path(&path(["glyphs", "A"])),
            true,
        );

        tokio::time::timeout(
            Duration::from_secs(1),
            handler.edit_final(editor.session(), &set_x_advance(510), None, "move", true),
        )
        .await
        .expect("editing must not wait on a slow sink")
        .unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            handler.edit_incremental(editor.session(), &set_x_advance(515)),
        )
        .await
        .expect("editing must not wait on a slow sink")
        .unwrap();
    }

    #[tokio::test]
    async fn delete_glyph_end_to_end() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, _sink) = connect_with_sink(&handler);

        let change = Change::structural(
            Vec::new(),
            vec![
                Change::delete_attr(path(["glyphMap"]), "A"),
                Change::delete_attr(path(["glyphs"]), "A"),
            ],
        );
        // Prime the caches so the edit sees current state.
        handler.get_glyph("A").await.unwrap();
        handler.get_data(&CacheKey::field("glyphMap")).await.unwrap();

        handler
            .edit_final(connection.session(), &change, None, "delete glyph", true)
            .await
            .unwrap();
        handler.flush_writes().await;

        assert_eq!(backend.recorded_deletes(), vec!["A".to_owned()]);
        assert_eq!(handler.get_glyph("A").await.unwrap(), None);
        let glyph_map = handler.get_data(&CacheKey::field("glyphMap")).await.unwrap();
        assert!(glyph_map.get("A").is_none());
        assert!(glyph_map.get("B").is_some());
    }

    #[tokio::test]
    async fn new_glyph_via_container_assign() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, _sink) = connect_with_sink(&handler);

        let change = Change::structural(
            Vec::new(),
            vec![
                Change::assign(path(["glyphMap"]), "C", json!([67])),
                Change::assign(path(["glyphs"]), "C", json!({"name": "C", "xAdvance": 400})),
            ],
        );
        handler
            .edit_final(connection.session(), &change, None, "add glyph", true)
            .await
            .unwrap();
        handler.flush_writes().await;

        let puts = backend.recorded_puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].name, "C");
        assert_eq!(puts[0].code_points, vec![67]);
        assert!(handler.get_glyph("C").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn index_edit_root_is_rejected() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend);
        let (connection, _sink) = connect_with_sink(&handler);

        let change = Change::assign(vec![PathSegment::Index(0)], "x", json!(1));
        let result = handler
            .edit_final(connection.session(), &change, None, "bad", true)
            .await;
        assert!(matches!(result, Err(CoreError::InvalidEditRoot { .. })));
    }

    #[tokio::test]
    async fn failed_apply_broadcasts_rollback_to_live_subscribers() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend);
        let (editor, _) = connect_with_sink(&handler);
        let (live, live_sink) = connect_with_sink(&handler);
        handler.subscribe_changes(
            live.session(),
            &Pattern::from_path(&path(["glyphs", "A"])),
            true,
        );

        let bad = Change::assign(path(["glyphs", "A", "missing", "deeper"]), "x", json!(1));
        let rollback = set_x_advance(500);
        let result = handler
            .edit_final(editor.session(), &bad, Some(&rollback), "bad", true)
            .await;
        assert!(result.is_err());
        live_sink.wait_for(1).await;

        let events = live_sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SinkEvent::ExternalChange { change, is_live_change } => {
                assert!(is_live_change);
                assert_eq!(change, &rollback);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_failure_reverts_and_notifies_once() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, sink) = connect_with_sink(&handler);

        handler
            .edit_final(connection.session(), &set_x_advance(510), None, "move", true)
            .await
            .unwrap();
        backend.fail_next_write("disk full");
        handler.flush_writes().await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SinkEvent::EditReverted { message, reload_pattern } => {
                assert!(message.contains("disk full"));
                assert!(!reload_pattern
                    .intersect(&Pattern::from_path(&path(["glyphs", "A"])))
                    .is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // The cache was reloaded to the backend's state.
        assert_eq!(
            handler.get_glyph("A").await.unwrap().unwrap()["xAdvance"],
            json!(500)
        );
        // Editing still works after recovery.
        handler
            .edit_final(connection.session(), &set_x_advance(520), None, "move", true)
            .await
            .unwrap();
        handler.flush_writes().await;
        assert_eq!(backend.recorded_puts().len(), 1);
    }

    #[tokio::test]
    async fn revert_reload_never_clobbers_a_newer_edit() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, sink) = connect_with_sink(&handler);

        handler
            .edit_final(connection.session(), &set_x_advance(510), None, "move", true)
            .await
            .unwrap();
        backend.fail_next_write("disk full");
        backend.set_read_delay(Duration::from_millis(80));

        let flush = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.flush_writes().await })
        };
        // Land a second edit while the revert reload is still reading.
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler
            .edit_final(connection.session(), &set_x_advance(520), None, "move", true)
            .await
            .unwrap();
        flush.await.unwrap();

        // The stale backend value must not replace the newer edit.
        assert_eq!(
            handler.get_glyph("A").await.unwrap().unwrap()["xAdvance"],
            json!(520)
        );
        let puts = backend.recorded_puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].glyph["xAdvance"], json!(520));
        let reverts = sink
            .events()
            .iter()
            .filter(|event| matches!(event, SinkEvent::EditReverted { .. }))
            .count();
        assert_eq!(reverts, 1);
    }

    #[tokio::test]
    async fn failed_revert_reload_disables_editing() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, sink) = connect_with_sink(&handler);

        handler
            .edit_final(connection.session(), &set_x_advance(510), None, "move", true)
            .await
            .unwrap();
        backend.fail_next_write("disk full");
        backend.fail_next_glyph_read("device gone");
        handler.flush_writes().await;

        assert_eq!(sink.event_count(), 1);
        let result = handler
            .edit_final(connection.session(), &set_x_advance(520), None, "move", true)
            .await;
        assert!(matches!(result, Err(CoreError::EditingDisabled { .. })));
    }

    #[tokio::test]
    async fn read_only_edits_update_cache_but_never_persist() {
        let backend = seeded_backend();
        let handler = FontHandler::new(
            backend.clone(),
            HandlerConfig::new().with_read_only(true).with_defer_writes(true),
        );
        let (connection, _sink) = connect_with_sink(&handler);

        handler
            .edit_final(connection.session(), &set_x_advance(900), None, "move", true)
            .await
            .unwrap();
        handler.flush_writes().await;

        assert!(backend.recorded_puts().is_empty());
        assert_eq!(
            handler.get_glyph("A").await.unwrap().unwrap()["xAdvance"],
            json!(900)
        );
    }

    #[tokio::test]
    async fn units_per_em_edit_persists_as_integer() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, _sink) = connect_with_sink(&handler);

        let change = Change::assign(Vec::new(), "unitsPerEm", json!(2048));
        handler
            .edit_final(connection.session(), &change, None, "upm", true)
            .await
            .unwrap();
        handler.flush_writes().await;

        assert_eq!(backend.get_units_per_em().await.unwrap(), 2048);
        assert_eq!(
            handler.get_data(&CacheKey::field("unitsPerEm")).await.unwrap(),
            json!(2048)
        );
    }

    #[tokio::test]
    async fn external_change_drops_matching_cache_entries() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, sink) = connect_with_sink(&handler);
        handler.subscribe_changes(
            connection.session(),
            &Pattern::from_path(&path(["glyphs", "A"])),
            false,
        );

        handler.get_glyph("A").await.unwrap();
        handler.get_glyph("B").await.unwrap();
        assert_eq!(backend.glyph_read_count(), 2);

        backend.seed_glyph("A", json!({"name": "A", "xAdvance": 777}), vec![65]);
        handler
            .process_external_changes(Some(Pattern::from_path(&path(["glyphs", "A"]))))
            .await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SinkEvent::ReloadData { pattern: Some(_) }));

        assert_eq!(
            handler.get_glyph("A").await.unwrap().unwrap()["xAdvance"],
            json!(777)
        );
        // B stayed cached.
        assert_eq!(backend.glyph_read_count(), 3);
    }

    #[tokio::test]
    async fn external_change_none_clears_everything() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (_connection, sink) = connect_with_sink(&handler);

        handler.get_glyph("A").await.unwrap();
        handler.process_external_changes(None).await;

        assert!(matches!(sink.events()[0], SinkEvent::ReloadData { pattern: None }));
        handler.get_glyph("A").await.unwrap();
        assert_eq!(backend.glyph_read_count(), 2);
    }

    #[tokio::test]
    async fn external_glyph_map_change_becomes_a_synthetic_change() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());
        let (connection, sink) = connect_with_sink(&handler);
        handler.subscribe_changes(
            connection.session(),
            &Pattern::from_path(&path(["glyphMap"])),
            false,
        );

        handler.get_data(&CacheKey::field("glyphMap")).await.unwrap();
        backend.seed_glyph("C", json!({"name": "C"}), vec![67]);
        handler
            .process_external_changes(Some(Pattern::from_path(&path(["glyphMap"]))))
            .await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SinkEvent::ExternalChange { change, is_live_change } => {
                assert!(!is_live_change);
                assert_eq!(change, &Change::assign(path(["glyphMap"]), "C", json!([67])));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // The cache entry was refreshed, not dropped.
        let glyph_map = handler.get_data(&CacheKey::field("glyphMap")).await.unwrap();
        assert!(glyph_map.get("C").is_some());
    }

    #[tokio::test]
    async fn watch_task_feeds_reconciliation() {
        let backend = seeded_backend();
        let handler = FontHandler::new(backend.clone(), HandlerConfig::new().with_defer_writes(true));
        let (connection, sink) = connect_with_sink(&handler);
        handler.subscribe_changes(
            connection.session(),
            &Pattern::from_path(&path(["glyphs", "A"])),
            false,
        );

        assert!(backend.emit_external_change(Some(Pattern::from_path(&path(["glyphs", "A"])))));
        sink.wait_for(1).await;
        assert!(matches!(sink.events()[0], SinkEvent::ReloadData { .. }));
        handler.close().await.unwrap();
    }

    #[tokio::test]
    async fn background_writer_drains_without_flush() {
        let backend = seeded_backend();
        let handler = FontHandler::new(backend.clone(), HandlerConfig::new());
        let (connection, _sink) = connect_with_sink(&handler);

        handler
            .edit_final(connection.session(), &set_x_advance(510), None, "move", true)
            .await
            .unwrap();

        // Wait for the background task to commit the write.
        for _ in 0..100 {
            if !backend.recorded_puts().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(backend.recorded_puts().len(), 1);
        handler.close().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_write_action_disables_editing() {
        let backend = seeded_backend();
        let handler = FontHandler::new(backend, HandlerConfig::new());
        let (connection, _sink) = connect_with_sink(&handler);

        {
            let mut state = handler.state.lock().await;
            state.queue.schedule(
                CacheKey::glyph("A"),
                PendingWrite {
                    action: Box::pin(async { panic!("poisoned write") }),
                    session_id: None,
                    reload_pattern: Pattern::new(),
                },
            );
        }
        handler.write_signal.notify_one();

        for _ in 0..100 {
            if handler.dead.read().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let result = handler
            .edit_final(connection.session(), &set_x_advance(510), None, "move", true)
            .await;
        assert!(matches!(result, Err(CoreError::EditingDisabled { .. })));
        handler.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_rejects_further_use_and_closes_backend_once() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend.clone());

        handler.close().await.unwrap();
        handler.close().await.unwrap();
        assert!(backend.is_closed());
        assert!(matches!(handler.get_glyph("A").await, Err(CoreError::Closed)));
    }

    #[tokio::test]
    async fn connection_guard_tracks_session_count() {
        let backend = seeded_backend();
        let handler = deferred_handler(backend);

        let first = handler.connect(Arc::new(RecordingSink::new()));
        let second = handler.connect(Arc::new(RecordingSink::new()));
        assert_eq!(handler.session_count(), 2);
        assert_ne!(first.id(), second.id());

        drop(first);
        assert_eq!(handler.session_count(), 1);

        let idle = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.wait_until_idle().await })
        };
        drop(second);
        idle.await.unwrap();
        assert_eq!(handler.session_count(), 0);
    }
}
