// Session-scoped context
//
// One Session owns every per-connection registry: uploaded service
// handles, per-thread access state, parked breakpoint handshakes, and
// logging-listener fan-out. Teardown is driven by an explicit close
// event (or the transport dying), never by GC timing.

use crate::listeners::{parse_event_batch, ListenerEvent};
use crate::service::{ServiceHandle, ServiceKind};
use crate::sync::ThreadAccess;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};
use uiscope_wire::events::{EventKind, EventSet};
use uiscope_wire::stackframe::VariableSlot;
use uiscope_wire::types::{tags, ObjectId, ThreadId};
use uiscope_wire::WireConnection;

type LogKey = (ObjectId, String);

#[derive(Default)]
struct SessionState {
    services: HashMap<ServiceKind, ServiceHandle>,
    threads: HashMap<ThreadId, Arc<ThreadAccess>>,
    breakpoint_waiters: HashMap<i32, oneshot::Sender<ThreadId>>,
    log_listeners: HashMap<LogKey, Vec<mpsc::UnboundedSender<ListenerEvent>>>,
    log_breakpoint: Option<i32>,
    add_sites: HashMap<ObjectId, String>,
}

pub struct Session {
    wire: Arc<WireConnection>,
    state: Mutex<SessionState>,
    closed_tx: watch::Sender<bool>,
    service_tx: broadcast::Sender<ServiceKind>,
}

impl Session {
    pub fn new(wire: Arc<WireConnection>) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        let (service_tx, _) = broadcast::channel(16);

        let session = Arc::new(Self {
            wire,
            state: Mutex::new(SessionState::default()),
            closed_tx,
            service_tx,
        });

        spawn_router(&session);
        session
    }

    pub fn wire(&self) -> &Arc<WireConnection> {
        &self.wire
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// A watch that flips to `true` when the session is torn down.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Notifications for service classes becoming available.
    pub fn on_service_available(&self) -> broadcast::Receiver<ServiceKind> {
        self.service_tx.subscribe()
    }

    /// The access state for one target thread, created on first use.
    pub async fn thread_access(&self, thread: ThreadId) -> Arc<ThreadAccess> {
        let mut state = self.state.lock().await;
        state
            .threads
            .entry(thread)
            .or_insert_with(|| Arc::new(ThreadAccess::new(thread)))
            .clone()
    }

    /// Find the toolkit dispatch thread by its well-known name.
    pub async fn dispatch_thread(
        &self,
        kind: ServiceKind,
    ) -> crate::error::EngineResult<Option<Arc<ThreadAccess>>> {
        let threads = self.wire.all_threads().await?;
        for thread in threads {
            let name = match self.wire.thread_name(thread).await {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with(kind.dispatch_thread_name()) {
                return Ok(Some(self.thread_access(thread).await));
            }
        }
        Ok(None)
    }

    pub async fn service(&self, kind: ServiceKind) -> Option<ServiceHandle> {
        self.state.lock().await.services.get(&kind).cloned()
    }

    pub(crate) async fn register_service(&self, handle: ServiceHandle) {
        let kind = handle.kind;
        self.state.lock().await.services.insert(kind, handle);
        self.service_tx.send(kind).ok();
        info!("service class available: {:?}", kind);
    }

    pub(crate) async fn register_breakpoint_waiter(
        &self,
        request_id: i32,
    ) -> oneshot::Receiver<ThreadId> {
        let (tx, rx) = oneshot::channel();
        self.state
            .lock()
            .await
            .breakpoint_waiters
            .insert(request_id, tx);
        rx
    }

    pub(crate) async fn remove_breakpoint_waiter(&self, request_id: i32) {
        self.state.lock().await.breakpoint_waiters.remove(&request_id);
    }

    pub(crate) async fn log_breakpoint(&self) -> Option<i32> {
        self.state.lock().await.log_breakpoint
    }

    pub(crate) async fn set_log_breakpoint(&self, request_id: i32) {
        self.state.lock().await.log_breakpoint = Some(request_id);
    }

    pub(crate) async fn add_log_listener(
        &self,
        component: ObjectId,
        listener_type: &str,
    ) -> mpsc::UnboundedReceiver<ListenerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .await
            .log_listeners
            .entry((component, listener_type.to_string()))
            .or_default()
            .push(tx);
        rx
    }

    pub(crate) async fn remove_log_listeners(&self, component: ObjectId, listener_type: &str) {
        self.state
            .lock()
            .await
            .log_listeners
            .remove(&(component, listener_type.to_string()));
    }

    /// Cache the "added at" call-site text for a component.
    pub(crate) async fn record_add_site(&self, component: ObjectId, site: String) {
        self.state.lock().await.add_sites.insert(component, site);
    }

    pub async fn add_site(&self, component: ObjectId) -> Option<String> {
        self.state.lock().await.add_sites.get(&component).cloned()
    }

    /// Drop cached add-site text; a component add/remove event upstream
    /// makes it stale.
    pub async fn invalidate_add_sites(&self, component: Option<ObjectId>) {
        let mut state = self.state.lock().await;
        match component {
            Some(component) => {
                state.add_sites.remove(&component);
            }
            None => state.add_sites.clear(),
        }
    }

    /// Tear the session down: wake parked handshakes, drop registries,
    /// cancel auto-resume tasks. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if *self.closed_tx.borrow() {
            return;
        }
        self.closed_tx.send_replace(true);

        state.services.clear();
        state.breakpoint_waiters.clear();
        state.log_listeners.clear();
        state.log_breakpoint = None;
        state.add_sites.clear();
        for (_, access) in state.threads.drain() {
            access.cancel_autoresume();
        }

        info!("session closed");
    }

    async fn dispatch_event_set(self: &Arc<Self>, set: EventSet) {
        for event in set.events {
            match event.details {
                EventKind::Breakpoint { thread, .. } => {
                    let waiter = {
                        let mut state = self.state.lock().await;
                        state.breakpoint_waiters.remove(&event.request_id)
                    };
                    if let Some(waiter) = waiter {
                        debug!("synchronization breakpoint hit on thread {:x}", thread);
                        waiter.send(thread).ok();
                        continue;
                    }

                    let is_log = self.log_breakpoint().await == Some(event.request_id);
                    if is_log {
                        let session = self.clone();
                        tokio::spawn(async move {
                            session.handle_log_event(thread).await;
                        });
                    } else {
                        // Nothing waits on this breakpoint anymore; do not
                        // leave the target parked.
                        warn!("unexpected breakpoint request_id={}", event.request_id);
                        let _ = self.wire.thread_resume(thread).await;
                    }
                }
                EventKind::VmDeath => {
                    self.close().await;
                }
                EventKind::ThreadDeath { thread } => {
                    let mut state = self.state.lock().await;
                    if let Some(access) = state.threads.remove(&thread) {
                        access.cancel_autoresume();
                    }
                }
                _ => {}
            }
        }
    }

    /// One event-firing delivery from the agent: the stopped frame's
    /// arguments carry (component, listener-type, encoded properties).
    async fn handle_log_event(&self, thread: ThreadId) {
        let result = self.read_log_event(thread).await;
        let _ = self.wire.thread_resume(thread).await;

        let Some(event) = result else {
            warn!("failed to read logging event data from the target");
            return;
        };

        let mut state = self.state.lock().await;
        let key = (event.component, event.listener_type.clone());
        if let Some(senders) = state.log_listeners.get_mut(&key) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() {
                state.log_listeners.remove(&key);
            }
        }
    }

    async fn read_log_event(&self, thread: ThreadId) -> Option<ListenerEvent> {
        let frames = self.wire.frames(thread, 0, 1).await.ok()?;
        let frame = frames.first()?;

        // deliverEvent(Object component, String listenerType, String data)
        let slots = [
            VariableSlot {
                slot: 0,
                sig_byte: tags::OBJECT,
            },
            VariableSlot {
                slot: 1,
                sig_byte: tags::OBJECT,
            },
            VariableSlot {
                slot: 2,
                sig_byte: tags::OBJECT,
            },
        ];
        let values = self
            .wire
            .frame_values(thread, frame.frame_id, &slots)
            .await
            .ok()?;
        if values.len() != 3 {
            return None;
        }

        let component = values[0].non_null_object()?;
        let listener_type = self
            .wire
            .string_value(values[1].non_null_object()?)
            .await
            .ok()?;
        let data = self
            .wire
            .string_value(values[2].non_null_object()?)
            .await
            .ok()?;

        Some(ListenerEvent {
            component,
            listener_type,
            properties: parse_event_batch(&data),
        })
    }
}

fn spawn_router(session: &Arc<Session>) {
    let weak = Arc::downgrade(session);
    let wire = session.wire.clone();
    let mut events = wire.subscribe_events();
    let mut alive = wire.liveness();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                dead = async { alive.wait_for(|a| !*a).await.map(|_| ()) } => {
                    let _ = dead;
                    if let Some(session) = weak.upgrade() {
                        session.close().await;
                    }
                    break;
                }
                event = events.recv() => match event {
                    Ok(set) => {
                        let Some(session) = weak.upgrade() else { break };
                        session.dispatch_event_set(set).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("event router lagged, {} event sets missed", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        if let Some(session) = weak.upgrade() {
                            session.close().await;
                        }
                        break;
                    }
                }
            }
        }
        debug!("session event router stopped");
    });
}
