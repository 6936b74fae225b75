//! Detached implementation runs.
//!
//! An approved plan is executed on a fire-and-forget thread that outlives
//! whatever front end triggered it. The caller only keeps a per-path stop
//! flag; everything else flows through the chunk and completion sinks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use chrono::Utc;
use kiln_agent::adapter::AssistantAdapter;
use kiln_agent::runner::TurnRunner;
use kiln_agent::types::{TurnRequest, TurnResult, TurnStopReason};

/// Receives each streamed output chunk for a worktree path.
pub type ChunkSink = Arc<dyn Fn(&Path, &str) + Send + Sync>;
/// Receives the final turn result for a worktree path.
pub type CompletionSink = Arc<dyn Fn(&Path, &TurnResult) + Send + Sync>;

/// Tracks one stop flag per worktree path and spawns detached runs.
#[derive(Default)]
pub struct Detacher {
    flags: Mutex<HashMap<PathBuf, Arc<AtomicBool>>>,
}

impl Detacher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<AtomicBool>>> {
        match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start a detached run for `path`. The spawned thread is not joined:
    /// it reports through `on_chunk` while running and `on_complete` when
    /// the turn ends, even if every front-end handle is gone by then.
    pub fn spawn(
        &self,
        runner: TurnRunner,
        adapter: Box<dyn AssistantAdapter>,
        request: TurnRequest,
        path: PathBuf,
        on_chunk: ChunkSink,
        on_complete: CompletionSink,
    ) -> Arc<AtomicBool> {
        let stop = Arc::new(AtomicBool::new(false));
        self.lock().insert(path.clone(), Arc::clone(&stop));

        let thread_stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut sink = |chunk: &str| on_chunk(&path, chunk);
            match runner.run_turn(&request, adapter.as_ref(), &mut sink, &thread_stop) {
                Ok(result) => on_complete(&path, &result),
                Err(err) => {
                    let now = Utc::now();
                    on_complete(
                        &path,
                        &TurnResult {
                            started_at: now,
                            finished_at: now,
                            stop_reason: TurnStopReason::Failed,
                            exit_code: None,
                            response: err.to_string(),
                        },
                    );
                }
            }
        });

        stop
    }

    /// Request a stop for the run on `path`. Returns false when no run is
    /// tracked there.
    pub fn stop(&self, path: &Path) -> bool {
        match self.lock().get(path) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    pub fn forget(&self, path: &Path) {
        self.lock().remove(path);
    }
}
