// Listener enumeration and logging listeners
//
// Three surfaces: reflecting over attached listeners (invoking
// getXListeners/getOnX accessors), a static scan for attachable listener
// types (no target calls), and remote logging listeners delivered through
// one shared hidden breakpoint per session.

use crate::error::{EngineError, EngineResult};
use crate::names;
use crate::service::{ServiceKind, AGENT_DELIMITER};
use crate::session::Session;
use crate::sync::ThreadAccess;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uiscope_wire::types::{tags, Location, ObjectId, Value};
use uiscope_wire::SuspendPolicy;

/// One listener instance attached to a remote component, with every
/// listener type it was registered under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerRef {
    pub object: ObjectId,
    pub types: Vec<String>,
}

/// One event-firing delivery from a remote logging listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerEvent {
    pub component: ObjectId,
    pub listener_type: String,
    pub properties: Vec<(String, String)>,
}

/// Packages whose interfaces count as listener types for the attachable
/// scan; a simple-name match alone is not enough.
const RECOGNIZED_LISTENER_PACKAGES: &[&str] =
    &["java.awt.event", "java.beans", "javax.swing.event", "javafx.event"];

/// Static scan for `addXListener(XListener)` pairs: the single parameter's
/// simple name must match the method's `X`, and the parameter type must
/// live in a recognized toolkit event package. Never calls into the
/// target.
pub fn attachable_listener_types(methods: &[uiscope_wire::reftype::MethodInfo]) -> Vec<String> {
    let mut out = Vec::new();
    for method in methods {
        let Some(base) = method
            .name
            .strip_prefix("add")
            .and_then(|rest| rest.strip_suffix("Listener"))
        else {
            continue;
        };
        if base.is_empty() {
            continue;
        }

        let Some((params, _ret)) = names::parse_method_signature(&method.signature) else {
            continue;
        };
        if params.len() != 1 {
            continue;
        }
        let Some(dotted) = names::object_signature_to_dotted(&params[0]) else {
            continue;
        };

        if names::simple_name(&dotted) != format!("{}Listener", base) {
            continue;
        }
        if !RECOGNIZED_LISTENER_PACKAGES.contains(&names::package_of(&dotted)) {
            continue;
        }
        if !out.contains(&dotted) {
            out.push(dotted);
        }
    }
    out
}

/// Split a delimiter-encoded key/value batch from the agent.
pub(crate) fn parse_event_batch(data: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut parts = data.split(AGENT_DELIMITER);
    while let Some(key) = parts.next() {
        let Some(value) = parts.next() else { break };
        if key.is_empty() {
            continue;
        }
        out.push((key.to_string(), value.to_string()));
    }
    out
}

impl Session {
    /// Enumerate listeners currently attached to a remote component by
    /// invoking its listener accessors. With `combine`, registrations
    /// resolving to the same listener instance merge into one entry
    /// listing all matched types.
    pub async fn attached_listeners(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
        component: ObjectId,
        combine: bool,
    ) -> EngineResult<Vec<ListenerRef>> {
        let found = self
            .run_while_stopped(access, kind, async {
                self.attached_listeners_locked(access.id, kind, component).await
            })
            .await?;
        let found = found.unwrap_or_default();

        if !combine {
            return Ok(found
                .into_iter()
                .map(|(ty, object)| ListenerRef {
                    object,
                    types: vec![ty],
                })
                .collect());
        }

        let mut merged: Vec<ListenerRef> = Vec::new();
        for (ty, object) in found {
            if let Some(existing) = merged.iter_mut().find(|l| l.object == object) {
                if !existing.types.contains(&ty) {
                    existing.types.push(ty);
                }
            } else {
                merged.push(ListenerRef {
                    object,
                    types: vec![ty],
                });
            }
        }
        Ok(merged)
    }

    async fn attached_listeners_locked(
        &self,
        thread: uiscope_wire::types::ThreadId,
        kind: ServiceKind,
        component: ObjectId,
    ) -> EngineResult<Vec<(String, ObjectId)>> {
        let class = match self.wire().reference_type_of(component).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let methods = self.collect_methods(class).await?;

        let mut found = Vec::new();
        for (declaring, method) in methods {
            let Some((params, ret)) = names::parse_method_signature(&method.signature) else {
                continue;
            };
            if !params.is_empty() {
                continue;
            }

            match kind {
                ServiceKind::Awt => {
                    // getXListeners() returning an array of listeners
                    if !method.name.starts_with("get") || !method.name.ends_with("Listeners") {
                        continue;
                    }
                    if !ret.starts_with('[') {
                        continue;
                    }
                    let Some(element_type) = names::object_signature_to_dotted(&ret[1..]) else {
                        continue;
                    };

                    let value = self
                        .invoke_on(thread, component, declaring, method.method_id, &[])
                        .await?;
                    let Some(array) = value.and_then(|v| v.non_null_object()) else {
                        continue;
                    };
                    for listener in self.wire().object_array_values(array).await? {
                        if listener != 0 {
                            found.push((element_type.clone(), listener));
                        }
                    }
                }
                ServiceKind::Fx => {
                    // getOnX() returning a single handler
                    let Some(event_name) = method.name.strip_prefix("getOn") else {
                        continue;
                    };
                    if event_name.is_empty() || !ret.starts_with('L') {
                        continue;
                    }

                    let value = self
                        .invoke_on(thread, component, declaring, method.method_id, &[])
                        .await?;
                    if let Some(handler) = value.and_then(|v| v.non_null_object()) {
                        found.push((format!("on{}", event_name), handler));
                    }
                }
            }
        }
        Ok(found)
    }

    /// The listener types a component's class could accept, for "attach a
    /// logging listener" affordances. Reflection only, no invocations.
    pub async fn attachable_listener_types(
        &self,
        component: ObjectId,
    ) -> EngineResult<Vec<String>> {
        let class = match self.wire().reference_type_of(component).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let methods: Vec<_> = self
            .collect_methods(class)
            .await?
            .into_iter()
            .map(|(_, m)| m)
            .collect();
        Ok(attachable_listener_types(&methods))
    }

    /// Install a remote logging listener for (component, listener-type).
    /// Event firings arrive on the returned channel; one shared hidden
    /// breakpoint, armed once per session, carries all deliveries.
    pub async fn attach_logging_listener(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
        component: ObjectId,
        listener_type: &str,
    ) -> EngineResult<Option<mpsc::UnboundedReceiver<ListenerEvent>>> {
        let Some(svc) = self.service(kind).await else {
            return Err(EngineError::Retrieval(
                "agent service not uploaded".to_string(),
            ));
        };
        let (Some(add_method), Some(deliver_method)) =
            (svc.add_logging_listener_method, svc.deliver_event_method)
        else {
            return Err(EngineError::Retrieval(
                "agent has no logging listener support".to_string(),
            ));
        };

        let installed = self
            .run_while_stopped(access, kind, async {
                if self.log_breakpoint().await.is_none() {
                    let location = Location::method_entry(svc.class, deliver_method);
                    let request_id = self
                        .wire()
                        .set_breakpoint(&location, None, SuspendPolicy::EventThread)
                        .await?;
                    self.set_log_breakpoint(request_id).await;
                    debug!("armed shared logging-listener breakpoint {}", request_id);
                }

                let type_string = self.wire().create_string(listener_type).await?;
                let args = [
                    Value::object(tags::OBJECT, component),
                    Value::object(tags::STRING, type_string),
                ];
                self.invoke_static_on(access.id, svc.class, add_method, &args)
                    .await?;
                Ok(())
            })
            .await?;

        if installed.is_none() {
            return Ok(None);
        }

        Ok(Some(self.add_log_listener(component, listener_type).await))
    }

    /// Remove the remote logging listener and drop local subscriptions.
    pub async fn detach_logging_listener(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
        component: ObjectId,
        listener_type: &str,
    ) -> EngineResult<()> {
        self.remove_log_listeners(component, listener_type).await;

        let Some(svc) = self.service(kind).await else {
            return Ok(());
        };
        let Some(remove_method) = svc.remove_logging_listener_method else {
            return Ok(());
        };

        self.run_while_stopped(access, kind, async {
            let type_string = self.wire().create_string(listener_type).await?;
            let args = [
                Value::object(tags::OBJECT, component),
                Value::object(tags::STRING, type_string),
            ];
            self.invoke_static_on(access.id, svc.class, remove_method, &args)
                .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uiscope_wire::reftype::MethodInfo;

    fn method(name: &str, signature: &str) -> MethodInfo {
        MethodInfo {
            method_id: 1,
            name: name.to_string(),
            signature: signature.to_string(),
            mod_bits: 1,
        }
    }

    #[test]
    fn test_attachable_types_recognizes_convention() {
        let methods = vec![
            method("addActionListener", "(Ljava/awt/event/ActionListener;)V"),
            method("addFooListener", "(Lcom/example/FooListener;)V"),
            method("removeActionListener", "(Ljava/awt/event/ActionListener;)V"),
        ];

        let types = attachable_listener_types(&methods);
        assert_eq!(types, vec!["java.awt.event.ActionListener"]);
    }

    #[test]
    fn test_attachable_types_requires_matching_simple_name() {
        let methods = vec![
            // Parameter simple name does not match the method's X
            method("addFocusListener", "(Ljava/awt/event/ActionListener;)V"),
            // Two parameters
            method(
                "addKeyListener",
                "(Ljava/awt/event/KeyListener;Ljava/awt/event/KeyListener;)V",
            ),
            // Primitive parameter
            method("addCountListener", "(I)V"),
        ];

        assert!(attachable_listener_types(&methods).is_empty());
    }

    #[test]
    fn test_attachable_types_deduplicates() {
        let methods = vec![
            method("addActionListener", "(Ljava/awt/event/ActionListener;)V"),
            method("addActionListener", "(Ljava/awt/event/ActionListener;)V"),
        ];

        assert_eq!(attachable_listener_types(&methods).len(), 1);
    }

    #[test]
    fn test_parse_event_batch() {
        let sep = AGENT_DELIMITER;
        let data = format!("source{0}button-1{0}actionCommand{0}submit", sep);
        assert_eq!(
            parse_event_batch(&data),
            vec![
                ("source".to_string(), "button-1".to_string()),
                ("actionCommand".to_string(), "submit".to_string()),
            ]
        );

        // Odd tail is ignored
        let data = format!("key{0}value{0}dangling", sep);
        assert_eq!(parse_event_batch(&data).len(), 1);

        assert!(parse_event_batch("").is_empty());
    }
}
