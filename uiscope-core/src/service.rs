// Service uploader
//
// Injects the agent helper classes into the target's class loader so the
// target can do local, fast introspection (pixel capture, hierarchy
// walks) instead of round-tripping every primitive operation. One handle
// exists per (session, kind); teardown happens with the session.

use crate::error::{EngineError, EngineResult};
use crate::names;
use crate::payload::PayloadArchive;
use crate::session::Session;
use crate::sync::ThreadAccess;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uiscope_wire::commands::invoke_options;
use uiscope_wire::types::{tags, ClassId, ClassLoaderId, FieldId, MethodId, ThreadId, Value, NULL_OBJECT};

/// Delimiter used inside the agent's encoded strings (names, add sites,
/// event property batches). Part of the private payload contract.
pub(crate) const AGENT_DELIMITER: char = '\u{1f}';

/// Token the agent emits for an absent add-site entry.
pub(crate) const NO_ADD_SITE: &str = "null";

// Private agent contract: member names per payload version.
const AGENT_FIELD_ACCESS_GRANTED: &str = "accessGranted";
const AGENT_FIELD_PREFERRED_THREAD: &str = "preferredThread";
const AGENT_METHOD_VERSION: &str = "version";
const AGENT_METHOD_START_ACCESS_LOOP: &str = "startAccessLoop";
const AGENT_METHOD_STOP_ACCESS_LOOP: &str = "stopAccessLoop";
const AGENT_METHOD_DUMP_HIERARCHY: &str = "dumpHierarchy";
const AGENT_METHOD_CAPTURE_WINDOW: &str = "captureWindow";
const AGENT_METHOD_START_HIERARCHY_LISTENER: &str = "startHierarchyListener";
const AGENT_METHOD_STOP_HIERARCHY_LISTENER: &str = "stopHierarchyListener";
const AGENT_METHOD_ADD_LOGGING_LISTENER: &str = "addLoggingListener";
const AGENT_METHOD_REMOVE_LOGGING_LISTENER: &str = "removeLoggingListener";
const AGENT_METHOD_DELIVER_EVENT: &str = "deliverEvent";

const DEFINE_CLASS_SIG: &str = "(Ljava/lang/String;[BII)Ljava/lang/Class;";

/// The two visual toolkits a target may host. Tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Awt,
    Fx,
}

impl ServiceKind {
    /// Package prefix selecting this kind's classes in the payload.
    pub(crate) fn class_prefix(self) -> &'static str {
        match self {
            ServiceKind::Awt => "uiscope.agent.awt.",
            ServiceKind::Fx => "uiscope.agent.fx.",
        }
    }

    /// The basic marker class; when it is loaded, all sibling classes of
    /// this kind were uploaded together.
    pub(crate) fn marker_class(self) -> &'static str {
        match self {
            ServiceKind::Awt => "uiscope.agent.awt.AwtAgent",
            ServiceKind::Fx => "uiscope.agent.fx.FxAgent",
        }
    }

    pub(crate) fn marker_signature(self) -> String {
        names::dotted_to_signature(self.marker_class())
    }

    /// Synchronization entry point inside the agent; distinct per kind.
    pub(crate) fn access_loop_method(self) -> &'static str {
        match self {
            ServiceKind::Awt => "awtAccess",
            ServiceKind::Fx => "fxAccess",
        }
    }

    /// A class whose loader anchors this toolkit inside the target.
    pub(crate) fn anchor_signature(self) -> &'static str {
        match self {
            ServiceKind::Awt => "Ljava/awt/Component;",
            ServiceKind::Fx => "Ljavafx/scene/Node;",
        }
    }

    /// Well-known name prefix of the toolkit dispatch thread.
    pub fn dispatch_thread_name(self) -> &'static str {
        match self {
            ServiceKind::Awt => "AWT-EventQueue",
            ServiceKind::Fx => "JavaFX Application Thread",
        }
    }
}

/// Resolved members of one uploaded agent class.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub kind: ServiceKind,
    pub class: ClassId,
    pub access_loop_method: MethodId,
    pub access_granted_field: FieldId,
    pub preferred_thread_field: FieldId,
    pub version_method: MethodId,
    pub start_access_loop_method: MethodId,
    pub stop_access_loop_method: MethodId,
    pub dump_hierarchy_method: Option<MethodId>,
    pub capture_window_method: Option<MethodId>,
    pub start_hierarchy_listener_method: Option<MethodId>,
    pub stop_hierarchy_listener_method: Option<MethodId>,
    pub add_logging_listener_method: Option<MethodId>,
    pub remove_logging_listener_method: Option<MethodId>,
    pub deliver_event_method: Option<MethodId>,
}

impl Session {
    /// Ensure the agent classes for `kind` are present in the target,
    /// uploading them if needed. Absence (`Ok(None)`) means the fast path
    /// is unavailable and callers must fall back; debug-protocol failures
    /// during injection are non-fatal by design.
    pub async fn upload_service_classes(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
        payload: &PayloadArchive,
    ) -> EngineResult<Option<ServiceHandle>> {
        if let Some(handle) = self.service(kind).await {
            return Ok(Some(handle));
        }

        let uploaded = self
            .run_while_stopped(access, kind, async {
                self.upload_locked(access.id, kind, payload).await
            })
            .await?;

        Ok(uploaded.flatten())
    }

    async fn upload_locked(
        &self,
        thread: ThreadId,
        kind: ServiceKind,
        payload: &PayloadArchive,
    ) -> EngineResult<Option<ServiceHandle>> {
        match self.try_upload(thread, kind, payload).await {
            Ok(handle) => Ok(handle),
            Err(EngineError::SessionGone) => Ok(None),
            Err(EngineError::Wire(e)) => {
                warn!("service upload failed: {}", e);
                Ok(None)
            }
            // Retrieval and invocation failures name a real capability
            // problem; surface them.
            Err(other) => Err(other),
        }
    }

    async fn try_upload(
        &self,
        thread: ThreadId,
        kind: ServiceKind,
        payload: &PayloadArchive,
    ) -> EngineResult<Option<ServiceHandle>> {
        // A previous debugger session may have left the classes behind;
        // the marker class stands in for all of its siblings.
        let marker_signature = kind.marker_signature();
        let existing = self.wire().classes_by_signature(&marker_signature).await?;
        if let Some(class) = existing.first() {
            debug!("agent classes for {:?} already present, reusing", kind);
            let handle = self.resolve_service_handle(kind, class.type_id).await?;
            self.register_service(handle.clone()).await;
            return Ok(Some(handle));
        }

        let Some(loader) = self.resolve_agent_loader(thread, kind).await? else {
            warn!("no usable class loader for {:?} agent upload", kind);
            return Ok(None);
        };

        let Some(byte_array_type) = self.resolve_class("[B").await? else {
            warn!("target has no loaded byte[] type, cannot upload agent");
            return Ok(None);
        };

        let loader_class = self.wire().reference_type_of(loader).await?;
        let Some((define_class, define_method)) = self
            .find_method(loader_class, "defineClass", DEFINE_CLASS_SIG)
            .await?
        else {
            return Err(EngineError::Retrieval(
                "target class loader exposes no defineClass".to_string(),
            ));
        };

        // Defined class objects are protected from collection until the
        // handle is recorded.
        let mut defined = Vec::new();
        let mut count = 0usize;
        for class in payload.classes_for(kind) {
            count += 1;
            let length = class.bytes.len() as i32;

            let array = self.wire().new_array(byte_array_type, length).await?;
            self.wire().set_byte_array(array, 0, &class.bytes).await?;
            let name_id = self.wire().create_string(&class.name).await?;

            let args = [
                Value::object(tags::STRING, name_id),
                Value::object(tags::ARRAY, array),
                Value::int(0),
                Value::int(length),
            ];
            let res = self
                .wire()
                .invoke_method(
                    loader,
                    thread,
                    define_class,
                    define_method,
                    &args,
                    invoke_options::SINGLE_THREADED,
                )
                .await?;
            if res.exception != NULL_OBJECT {
                let err = self.translate_exception(thread, res.exception).await;
                for obj in defined {
                    let _ = self.wire().enable_collection(obj).await;
                }
                return Err(err);
            }
            if let Some(class_object) = res.value.non_null_object() {
                let _ = self.wire().disable_collection(class_object).await;
                defined.push(class_object);
            }
            debug!("defined agent class {}", class.name);
        }

        if count == 0 {
            warn!("payload archive has no classes for {:?}", kind);
            return Ok(None);
        }

        let classes = self.wire().classes_by_signature(&marker_signature).await?;
        let Some(marker) = classes.first() else {
            warn!("agent marker class did not appear after upload");
            for obj in defined {
                let _ = self.wire().enable_collection(obj).await;
            }
            return Ok(None);
        };

        let handle = self.resolve_service_handle(kind, marker.type_id).await?;

        // Force initialization with a safe static call, then start the
        // target-side access loop.
        let res = self
            .wire()
            .invoke_static(
                handle.class,
                thread,
                handle.version_method,
                &[],
                invoke_options::SINGLE_THREADED,
            )
            .await?;
        if res.exception != NULL_OBJECT {
            let err = self.translate_exception(thread, res.exception).await;
            for obj in defined {
                let _ = self.wire().enable_collection(obj).await;
            }
            return Err(err);
        }

        let res = self
            .wire()
            .invoke_static(
                handle.class,
                thread,
                handle.start_access_loop_method,
                &[],
                invoke_options::SINGLE_THREADED,
            )
            .await?;
        if res.exception != NULL_OBJECT {
            warn!("agent access loop failed to start");
        }

        self.register_service(handle.clone()).await;
        info!("uploaded {} agent class(es) for {:?}", count, kind);

        // Recorded: the registration keeps the classes reachable now.
        for obj in defined {
            let _ = self.wire().enable_collection(obj).await;
        }

        Ok(Some(handle))
    }

    /// The loader the agent classes are defined in: the toolkit's own
    /// loader when it has one, else the target thread's context loader.
    async fn resolve_agent_loader(
        &self,
        thread: ThreadId,
        kind: ServiceKind,
    ) -> EngineResult<Option<ClassLoaderId>> {
        if let Some(anchor) = self.resolve_class(kind.anchor_signature()).await? {
            match self.wire().class_loader_of(anchor).await {
                Ok(loader) if loader != NULL_OBJECT => return Ok(Some(loader)),
                Ok(_) => {}
                Err(e) if e.is_session_gone() => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        // Bootstrap-loaded toolkit (or no toolkit at all): fall back to
        // the dispatch thread's context loader.
        let value = self
            .try_invoke_by_name(
                thread,
                thread,
                "getContextClassLoader",
                "()Ljava/lang/ClassLoader;",
            )
            .await?;
        Ok(value.and_then(|v| v.non_null_object()))
    }

    pub(crate) async fn resolve_service_handle(
        &self,
        kind: ServiceKind,
        class: ClassId,
    ) -> EngineResult<ServiceHandle> {
        let methods = self.wire().methods_of(class).await?;
        let fields = self.wire().fields_of(class).await?;

        let method = |name: &str| methods.iter().find(|m| m.name == name).map(|m| m.method_id);
        let field = |name: &str| fields.iter().find(|f| f.name == name).map(|f| f.field_id);

        let required_method = |name: &str| {
            method(name).ok_or_else(|| {
                EngineError::Retrieval(format!("agent class is missing method {}", name))
            })
        };
        let required_field = |name: &str| {
            field(name).ok_or_else(|| {
                EngineError::Retrieval(format!("agent class is missing field {}", name))
            })
        };

        Ok(ServiceHandle {
            kind,
            class,
            access_loop_method: required_method(kind.access_loop_method())?,
            access_granted_field: required_field(AGENT_FIELD_ACCESS_GRANTED)?,
            preferred_thread_field: required_field(AGENT_FIELD_PREFERRED_THREAD)?,
            version_method: required_method(AGENT_METHOD_VERSION)?,
            start_access_loop_method: required_method(AGENT_METHOD_START_ACCESS_LOOP)?,
            stop_access_loop_method: required_method(AGENT_METHOD_STOP_ACCESS_LOOP)?,
            dump_hierarchy_method: method(AGENT_METHOD_DUMP_HIERARCHY),
            capture_window_method: method(AGENT_METHOD_CAPTURE_WINDOW),
            start_hierarchy_listener_method: method(AGENT_METHOD_START_HIERARCHY_LISTENER),
            stop_hierarchy_listener_method: method(AGENT_METHOD_STOP_HIERARCHY_LISTENER),
            add_logging_listener_method: method(AGENT_METHOD_ADD_LOGGING_LISTENER),
            remove_logging_listener_method: method(AGENT_METHOD_REMOVE_LOGGING_LISTENER),
            deliver_event_method: method(AGENT_METHOD_DELIVER_EVENT),
        })
    }

    /// Ask the agent to start publishing hierarchy-change notifications.
    /// The agent answers with a human-readable failure reason, or null on
    /// success.
    pub async fn start_hierarchy_listener(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
    ) -> EngineResult<()> {
        let Some(svc) = self.service(kind).await else {
            return Err(EngineError::Retrieval(
                "agent service not uploaded".to_string(),
            ));
        };
        let Some(method) = svc.start_hierarchy_listener_method else {
            return Err(EngineError::Retrieval(
                "agent has no hierarchy listener support".to_string(),
            ));
        };

        let outcome = self
            .run_while_stopped(access, kind, async {
                let value = self
                    .invoke_static_on(access.id, svc.class, method, &[])
                    .await?;
                let Some(reason_id) = value.and_then(|v| v.non_null_object()) else {
                    return Ok(None);
                };
                let reason = self.wire().string_value(reason_id).await?;
                Ok(Some(reason))
            })
            .await?;

        match outcome.flatten() {
            Some(reason) => Err(EngineError::Retrieval(reason)),
            None => Ok(()),
        }
    }

    /// Stop the agent's hierarchy-change notifications. Best-effort.
    pub async fn stop_hierarchy_listener(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
    ) -> EngineResult<()> {
        let Some(svc) = self.service(kind).await else {
            return Ok(());
        };
        let Some(method) = svc.stop_hierarchy_listener_method else {
            return Ok(());
        };

        self.run_while_stopped(access, kind, async {
            self.invoke_static_on(access.id, svc.class, method, &[]).await
        })
        .await?;
        Ok(())
    }
}
