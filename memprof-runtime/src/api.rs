//! Process-wide runtime context (spec §6). Replaces the "ambient global"
//! pattern with one explicit, lazily-populated singleton: nothing records
//! anything until [`init`] has run.

use std::sync::Arc;
use std::time::Duration;

use memprof_common::{clock, Event};
use memprof_registry::Registry;
use once_cell::sync::OnceCell;

use crate::interceptor::{ReentrancyGuard, SiteInfo};
use crate::sender::Sender;
use crate::snapshot::SnapshotBuilder;

struct RuntimeContext {
    registry: Arc<Registry>,
    sender: Arc<Sender>,
    snapshot: std::sync::Mutex<Option<SnapshotBuilder>>,
}

static CONTEXT: OnceCell<RuntimeContext> = OnceCell::new();

/// Options for [`init`]; all have sensible defaults via [`Default`].
pub struct InitOptions {
    pub snapshot_period: Duration,
    pub timeline_capacity: usize,
    pub leak_threshold_ms: u64,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            snapshot_period: Duration::from_millis(memprof_common::DEFAULT_SNAPSHOT_PERIOD_MS),
            timeline_capacity: memprof_common::DEFAULT_TIMELINE_CAPACITY,
            leak_threshold_ms: memprof_common::DEFAULT_LEAK_THRESHOLD_MS,
        }
    }
}

/// Start recording. Idempotent: a second call is a no-op (logged at
/// `warn`) since the context is process-lifetime, not re-openable.
pub fn init(host: impl Into<String>, port: u16) {
    init_with(host, port, InitOptions::default())
}

pub fn init_with(host: impl Into<String>, port: u16, opts: InitOptions) {
    let host = host.into();
    if CONTEXT.get().is_some() {
        log::warn!("memprof runtime: init() called more than once, ignoring");
        return;
    }

    let registry = Arc::new(Registry::new(opts.timeline_capacity, opts.leak_threshold_ms));
    let sender = Arc::new(Sender::new(host, port));
    let snapshot = SnapshotBuilder::start(registry.clone(), sender.clone(), opts.snapshot_period);

    let ctx = RuntimeContext { registry, sender, snapshot: std::sync::Mutex::new(Some(snapshot)) };
    if CONTEXT.set(ctx).is_err() {
        log::warn!("memprof runtime: lost a racing init() call");
    }
}

/// Stop the snapshot builder thread. The registry and sender remain in
/// place (further `record_*` calls are harmless no-ops against a context
/// whose background thread has already stopped).
pub fn shutdown() {
    if let Some(ctx) = CONTEXT.get() {
        if let Some(builder) = ctx.snapshot.lock().unwrap().take() {
            builder.stop();
        }
    }
}

/// The reconnecting sender's current connection state, for diagnostics.
/// Returns `None` before [`init`] has run.
pub fn sender_state() -> Option<crate::sender::SenderState> {
    CONTEXT.get().map(|ctx| ctx.sender.state())
}

pub(crate) fn on_alloc(ptr: u64, size: u64, site: Option<SiteInfo>) {
    let Some(ctx) = CONTEXT.get() else { return };
    let mut ev = Event::alloc(ptr, size, clock::now_ns(), clock::thread_id());
    ev.ty = site.as_ref().and_then(|s| s.ty.clone());
    ev.file = site.as_ref().and_then(|s| s.file.clone());
    ev.line = site.as_ref().map_or(0, |s| s.line);
    ev.is_array = site.as_ref().map_or(false, |s| s.is_array);
    ctx.registry.on_alloc(ev);
}

pub(crate) fn on_free(ptr: u64, hinted_size: u64) {
    let Some(ctx) = CONTEXT.get() else { return };
    ctx.registry.on_free(ptr, Some(hinted_size));
}

/// Record an allocation made outside the global allocator hook (e.g. from
/// an FFI boundary that hands back a raw pointer it allocated itself).
///
/// Raises the same reentrancy guard the allocator hook uses (spec §4.D):
/// when `TrackingAllocator` is also installed as the `#[global_allocator]`,
/// the registry's own internal allocations (growing its live map, pushing
/// a timeline entry) would otherwise recurse back into this same call on
/// this thread and deadlock on the registry's mutex. A reentrant call is
/// dropped silently, matching `RecordingDropped` (spec §7).
pub fn record_alloc(ptr: u64, size: u64, file: Option<&'static str>, line: u32) {
    let Some(_guard) = ReentrancyGuard::enter() else { return };
    let site = Some(SiteInfo { file: file.map(str::to_owned), line, ty: None, is_array: false });
    on_alloc(ptr, size, site);
}

/// Record a deallocation made outside the global allocator hook. See
/// [`record_alloc`] for why this raises the reentrancy guard.
pub fn record_free(ptr: u64) {
    let Some(_guard) = ReentrancyGuard::enter() else { return };
    on_free(ptr, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_init_calls_are_harmless_no_ops() {
        // CONTEXT is process-global and may already be set by another
        // test in this binary; either way this must not panic.
        on_alloc(0x1, 8, None);
        on_free(0x1, 8);
    }

    #[test]
    fn record_alloc_does_not_reenter_while_the_guard_is_already_held() {
        // Simulates `TrackingAllocator` already being mid-recording on this
        // thread (e.g. the registry growing its own map) when something
        // calls the public `record_alloc`/`record_free` FFI entry points.
        // Without the guard at this boundary this would recurse into
        // `Registry::on_alloc`'s mutex a second time on the same thread.
        let _outer = ReentrancyGuard::enter().expect("no guard held yet on this thread");
        record_alloc(0x1234, 8, None, 0);
        record_free(0x1234);
        // Reaching here without a deadlock or panic is the assertion.
    }
}
