//! Debounced filesystem watcher over the key directory.
//!
//! Any create/write/remove/rename touching a `.key` file schedules a
//! rescan; bursts are collapsed by a quiet-period debounce so a bulk copy
//! triggers one reload, not one per file.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::store::{KeyStore, KEY_SUFFIX};

pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Handle keeping the watcher (and its debounce thread) alive.
pub struct KeyWatcher {
    _watcher: RecommendedWatcher,
}

fn touches_key_file(event: &Event) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.extension().and_then(|e| e.to_str()) == Some(KEY_SUFFIX))
}

/// Watch the store's key directory. After each debounced change burst the
/// store is rescanned and `on_reload` is called with the new key count.
pub fn spawn(
    store: Arc<KeyStore>,
    on_reload: impl Fn(usize) + Send + 'static,
) -> notify::Result<KeyWatcher> {
    let (tx, rx) = mpsc::channel::<()>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) if touches_key_file(&event) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "key watcher error"),
        }
    })?;

    let dir = store.keys_dir();
    watcher.watch(Path::new(&dir), RecursiveMode::NonRecursive)?;
    debug!(dir = %dir.display(), "key watcher started");

    std::thread::spawn(move || {
        while rx.recv().is_ok() {
            // Quiet period: swallow follow-up events until none arrive for
            // a full debounce window.
            while rx.recv_timeout(DEBOUNCE).is_ok() {}
            match store.scan() {
                Ok(count) => on_reload(count),
                Err(e) => warn!(error = %e, "rescan after file change failed"),
            }
        }
    });

    Ok(KeyWatcher { _watcher: watcher })
}
