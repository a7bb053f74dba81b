//! Standard background tasks: sync, eviction, and retention GC.

use crate::substrate::Substrate;
use keel_common::events::EventKind;
use keel_journal::{CursorKind, SyncTarget};
use keel_sched::{SchedulerError, TaskSpec};
use std::sync::Arc;
use std::time::Duration;

/// Jitter is a tenth of the interval, so fleets of agents don't tick in
/// lockstep.
fn jitter_for(interval: Duration) -> Duration {
    interval / 10
}

impl Substrate {
    /// Register the substrate's standard task set.
    ///
    /// The two sync tasks run independently — one slow downstream must never
    /// block the other — while the retention tasks share a `gc` mutex group
    /// so at most one sweeps the filesystem at a time. Call
    /// [`Scheduler::start`](keel_sched::Scheduler::start) afterwards.
    pub async fn register_standard_tasks(
        self: &Arc<Self>,
        object_store: Arc<dyn SyncTarget>,
        version_control: Arc<dyn SyncTarget>,
    ) -> Result<(), SchedulerError> {
        let intervals = self.config().intervals.clone();

        for (id, name, kind, target) in [
            (
                "journal-sync-object-store",
                "journal sync: object store",
                CursorKind::ObjectStore,
                object_store,
            ),
            (
                "journal-sync-version-control",
                "journal sync: version control",
                CursorKind::VersionControl,
                version_control,
            ),
        ] {
            let substrate = self.clone();
            let spec = TaskSpec::new(id, name, intervals.sync, move || {
                let substrate = substrate.clone();
                let target = target.clone();
                async move {
                    substrate.journal().drain(kind, target.as_ref()).await?;
                    Ok(())
                }
            })
            .with_jitter(jitter_for(intervals.sync));
            self.scheduler().register(spec).await?;
        }

        let substrate = self.clone();
        let spec = TaskSpec::new(
            "idempotency-evict",
            "idempotency eviction",
            intervals.evict,
            move || {
                let substrate = substrate.clone();
                async move {
                    substrate.idempotency().evict().await?;
                    Ok(())
                }
            },
        )
        .with_jitter(jitter_for(intervals.evict));
        self.scheduler().register(spec).await?;

        let substrate = self.clone();
        let spec = TaskSpec::new("journal-gc", "journal archive GC", intervals.gc, move || {
            let substrate = substrate.clone();
            async move {
                substrate.journal().gc_archives().await?;
                Ok(())
            }
        })
        .with_jitter(jitter_for(intervals.gc))
        .with_mutex_group("gc");
        self.scheduler().register(spec).await?;

        let substrate = self.clone();
        let spec = TaskSpec::new("audit-gc", "audit archive GC", intervals.gc, move || {
            let substrate = substrate.clone();
            async move {
                substrate.audit().gc_archives().await?;
                Ok(())
            }
        })
        .with_jitter(jitter_for(intervals.gc))
        .with_mutex_group("gc");
        self.scheduler().register(spec).await?;

        // One sweep covers every document under state/, including ones a
        // caller opened through `state_document` and has since dropped.
        let substrate = self.clone();
        let spec = TaskSpec::new(
            "state-gc",
            "state directory sideline GC",
            intervals.gc,
            move || {
                let substrate = substrate.clone();
                async move {
                    let stats = keel_store::sideline_sweep(
                        &substrate.config().state_dir(),
                        substrate.config().store.quarantine_max_age,
                    );
                    if stats.removed > 0 {
                        substrate.events().emit(
                            EventKind::SidelineGc,
                            "store",
                            &serde_json::json!({ "removed": stats.removed }),
                        );
                    }
                    Ok(())
                }
            },
        )
        .with_jitter(jitter_for(intervals.gc))
        .with_mutex_group("gc");
        self.scheduler().register(spec).await?;

        Ok(())
    }
}
