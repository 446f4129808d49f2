// Thread synchronization coordinator
//
// Remote invocation is only safe while the target thread is provably
// parked. `run_while_stopped` guarantees a caller-supplied unit of work
// executes inside such a window, then lets a delayed auto-resume task
// give the thread back unless another protected region claims it first.

use crate::error::EngineResult;
use crate::service::{ServiceHandle, ServiceKind};
use crate::session::Session;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uiscope_wire::types::{tags, Location, ThreadId, Value, NULL_OBJECT};
use uiscope_wire::{SuspendPolicy, WireConnection};
use std::sync::Arc;

/// Grace period before a thread parked for a protected region is given
/// back to the target.
pub const AUTORESUME_GRACE: Duration = Duration::from_millis(500);

/// Access state for one target thread. The write lock is the single
/// serialization point for all remote calls issued against the thread.
pub struct ThreadAccess {
    pub id: ThreadId,
    pub(crate) lock: Mutex<()>,
    pub(crate) invoking: AtomicBool,
    autoresume: StdMutex<Option<JoinHandle<()>>>,
}

impl ThreadAccess {
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            lock: Mutex::new(()),
            invoking: AtomicBool::new(false),
            autoresume: StdMutex::new(None),
        }
    }

    pub(crate) fn cancel_autoresume(&self) {
        if let Some(handle) = self.autoresume.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Whether this coordinator still owes the target a resume, i.e. the
    /// current suspension is ours rather than an unrelated one.
    pub(crate) fn has_pending_autoresume(&self) -> bool {
        self.autoresume
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn store_autoresume(&self, handle: JoinHandle<()>) {
        let mut slot = self.autoresume.lock().unwrap();
        if let Some(prev) = slot.take() {
            prev.abort();
        }
        *slot = Some(handle);
    }
}

impl std::fmt::Debug for ThreadAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadAccess").field("id", &self.id).finish()
    }
}

/// Reschedule the delayed auto-resume for a thread this coordinator
/// parked. The task self-cancels when it observes the suspension moved
/// for a reason other than our own invocation marker.
pub(crate) fn schedule_autoresume(wire: Arc<WireConnection>, access: Arc<ThreadAccess>) {
    let task_access = access.clone();
    let handle = tokio::spawn(async move {
        let baseline = wire.suspend_count(task_access.id).await.ok();
        tokio::time::sleep(AUTORESUME_GRACE).await;

        if task_access.invoking.load(Ordering::SeqCst) {
            return;
        }
        let current = wire.suspend_count(task_access.id).await.ok();
        if baseline.is_none() || current != baseline {
            trace!("auto-resume self-cancelled: suspension changed externally");
            return;
        }
        if let Err(e) = wire.thread_resume(task_access.id).await {
            debug!("auto-resume skipped: {}", e);
        }
    });
    access.store_autoresume(handle);
}

impl Session {
    /// Run `work` while `access`'s thread is provably stopped.
    ///
    /// Returns `Ok(None)` without running the work when the session goes
    /// away before the thread could be parked; the per-thread lock is
    /// released on every path.
    pub async fn run_while_stopped<T, F>(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
        work: F,
    ) -> EngineResult<Option<T>>
    where
        F: Future<Output = EngineResult<T>>,
    {
        if self.is_closed() || !self.wire().is_alive() {
            return Ok(None);
        }

        let _guard = access.lock.lock().await;

        let service = self.service(kind).await;

        // Best-effort preferred-thread marker so target-side dispatch
        // prefers this thread for ambiguous callbacks.
        if let Some(svc) = &service {
            let _ = self
                .wire()
                .set_static_values(
                    svc.class,
                    &[(
                        svc.preferred_thread_field,
                        Value::object(tags::THREAD, access.id),
                    )],
                )
                .await;
        }

        let result = self.run_stopped_inner(access, service.as_ref(), work).await;

        if let Some(svc) = &service {
            let _ = self
                .wire()
                .set_static_values(
                    svc.class,
                    &[(
                        svc.preferred_thread_field,
                        Value::object(tags::THREAD, NULL_OBJECT),
                    )],
                )
                .await;
        }

        result
    }

    async fn run_stopped_inner<T, F>(
        &self,
        access: &Arc<ThreadAccess>,
        service: Option<&ServiceHandle>,
        work: F,
    ) -> EngineResult<Option<T>>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let status = match self.wire().thread_status(access.id).await {
            Ok(status) => status,
            Err(e) if e.is_session_gone() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if status.is_suspended() {
            // Already stopped at a debuggable point. Only re-arm the
            // auto-resume when the suspension is ours to give back.
            let ours = access.has_pending_autoresume();
            access.cancel_autoresume();

            access.invoking.store(true, Ordering::SeqCst);
            let out = work.await;
            access.invoking.store(false, Ordering::SeqCst);

            if ours {
                schedule_autoresume(self.wire().clone(), access.clone());
            }
            return out.map(Some);
        }

        match service {
            Some(svc) => self.handshake_and_run(access, svc, work).await,
            None => {
                // No synchronization entry point exists yet (payload not
                // uploaded): park the thread directly.
                match self.wire().thread_suspend(access.id).await {
                    Ok(()) => {}
                    Err(e) if e.is_session_gone() => return Ok(None),
                    Err(e) => return Err(e.into()),
                }

                access.invoking.store(true, Ordering::SeqCst);
                let out = work.await;
                access.invoking.store(false, Ordering::SeqCst);

                schedule_autoresume(self.wire().clone(), access.clone());
                out.map(Some)
            }
        }
    }

    /// Drive a running thread to the service's synchronization entry
    /// point with a one-shot breakpoint, then run the work while it is
    /// stopped there.
    async fn handshake_and_run<T, F>(
        &self,
        access: &Arc<ThreadAccess>,
        svc: &ServiceHandle,
        work: F,
    ) -> EngineResult<Option<T>>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let location = Location::method_entry(svc.class, svc.access_loop_method);
        let request_id = match self
            .wire()
            .set_breakpoint(&location, Some(access.id), SuspendPolicy::EventThread)
            .await
        {
            Ok(id) => id,
            Err(e) if e.is_session_gone() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut waiter = self.register_breakpoint_waiter(request_id).await;

        // Open the gate: the target-side loop proceeds into the entry
        // point and trips the breakpoint.
        if let Err(e) = self
            .wire()
            .set_static_values(svc.class, &[(svc.access_granted_field, Value::boolean(true))])
            .await
        {
            self.remove_breakpoint_waiter(request_id).await;
            let _ = self.wire().clear_breakpoint(request_id).await;
            if e.is_session_gone() {
                return Ok(None);
            }
            return Err(e.into());
        }

        let mut closed = self.closed();
        let fired = tokio::select! {
            hit = &mut waiter => hit.is_ok(),
            _ = closed.wait_for(|c| *c) => false,
        };

        // Close the gate again and disarm either way; after a disconnect
        // these are no-ops that fail silently.
        let _ = self
            .wire()
            .set_static_values(svc.class, &[(svc.access_granted_field, Value::boolean(false))])
            .await;
        let _ = self.wire().clear_breakpoint(request_id).await;

        if !fired {
            self.remove_breakpoint_waiter(request_id).await;
            debug!("session ended before the synchronization breakpoint fired");
            return Ok(None);
        }

        access.invoking.store(true, Ordering::SeqCst);
        let out = work.await;
        access.invoking.store(false, Ordering::SeqCst);

        // The breakpoint parked the thread; give it straight back.
        match self.wire().thread_resume(access.id).await {
            Ok(()) => {}
            Err(e) => debug!("resume after protected region failed: {}", e),
        }

        out.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_thread_access_autoresume_slots() {
        let access = ThreadAccess::new(0x77);
        assert!(!access.has_pending_autoresume());

        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        access.store_autoresume(handle);
        assert!(access.has_pending_autoresume());

        access.cancel_autoresume();
        assert!(!access.has_pending_autoresume());
    }
}
