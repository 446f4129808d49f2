// Lazy property accessor
//
// Bean-style getter/setter pairs on a remote object become
// asynchronously-computed, editable values. The expensive remote getter
// runs on a background task on first read; until it lands the accessor
// answers with a sentinel and fires a change notification when done.

use crate::error::{EngineError, EngineResult};
use crate::names;
use crate::service::ServiceKind;
use crate::session::Session;
use crate::sync::ThreadAccess;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uiscope_wire::types::{tags, ClassId, MethodId, ObjectId, ThreadId, Value, ValueData};

/// Sentinel returned while the remote getter has not completed yet.
pub const CALCULATING: &str = "calculating...";

/// Boxed primitive wrappers editable through a valueOf mirror.
const BOXED_TYPES: &[(&str, &str)] = &[
    ("java.lang.Integer", "I"),
    ("java.lang.Long", "J"),
    ("java.lang.Short", "S"),
    ("java.lang.Byte", "B"),
    ("java.lang.Character", "C"),
    ("java.lang.Boolean", "Z"),
    ("java.lang.Float", "F"),
    ("java.lang.Double", "D"),
];

#[derive(Debug, Clone)]
pub struct BeanProperty {
    pub name: String,
    pub getter: (ClassId, MethodId),
    pub setter: Option<(ClassId, MethodId)>,
    /// JNI signature of the property value type.
    pub value_signature: String,
}

#[derive(Debug, Clone)]
pub enum PropertyState {
    Pending,
    Ready { text: String, editable: bool },
    Failed(String),
}

pub struct RemoteProperty {
    session: Arc<Session>,
    access: Arc<ThreadAccess>,
    kind: ServiceKind,
    object: ObjectId,
    prop: BeanProperty,
    state: Arc<watch::Sender<PropertyState>>,
    started: AtomicBool,
}

impl RemoteProperty {
    pub fn new(
        session: Arc<Session>,
        access: Arc<ThreadAccess>,
        kind: ServiceKind,
        object: ObjectId,
        prop: BeanProperty,
    ) -> Self {
        let (state, _) = watch::channel(PropertyState::Pending);
        Self {
            session,
            access,
            kind,
            object,
            prop,
            state: Arc::new(state),
            started: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.prop.name
    }

    /// The current value text. The first call kicks off the remote read
    /// and answers with the sentinel; subscribers get notified when the
    /// real value lands.
    pub fn value(&self) -> String {
        let state = self.state.borrow().clone();
        match state {
            PropertyState::Ready { text, .. } => text,
            PropertyState::Failed(reason) => format!("<{}>", reason),
            PropertyState::Pending => {
                self.ensure_computing();
                CALCULATING.to_string()
            }
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(
            &*self.state.borrow(),
            PropertyState::Ready { editable: true, .. }
        )
    }

    /// Change notifications for this property's state.
    pub fn subscribe(&self) -> watch::Receiver<PropertyState> {
        self.state.subscribe()
    }

    fn ensure_computing(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = self.session.clone();
        let access = self.access.clone();
        let kind = self.kind;
        let object = self.object;
        let prop = self.prop.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let computed = compute(&session, &access, kind, object, &prop).await;
            state.send_replace(computed);
        });
    }

    /// Apply a locally-edited value. A parse failure reports `BadEdit`
    /// and leaves the previous value in place.
    pub async fn set_value(&self, text: &str) -> EngineResult<()> {
        let Some((setter_class, setter_method)) = self.prop.setter else {
            return Err(EngineError::BadEdit("property is read-only".to_string()));
        };

        // Parse before touching the target: a failure rolls back to the
        // previous value by never leaving it.
        let parsed = parse_edit(&self.prop.value_signature, text)?;

        let applied = self
            .session
            .run_while_stopped(&self.access, self.kind, async {
                let arg = self.mirror_value(&parsed).await?;
                self.session
                    .invoke_on(
                        self.access.id,
                        self.object,
                        setter_class,
                        setter_method,
                        &[arg],
                    )
                    .await?;
                Ok(())
            })
            .await?;

        if applied.is_some() {
            self.started.store(true, Ordering::SeqCst);
            self.state.send_replace(PropertyState::Ready {
                text: text.to_string(),
                editable: true,
            });
        }
        Ok(())
    }

    /// Reconstruct a remote value of the property's type from the parsed
    /// edit. Must run inside a protected region.
    async fn mirror_value(&self, parsed: &EditValue) -> EngineResult<Value> {
        match parsed {
            EditValue::Primitive(value) => Ok(value.clone()),
            EditValue::Text(text) => {
                let id = self.session.wire().create_string(text).await?;
                Ok(Value::object(tags::STRING, id))
            }
            EditValue::Boxed {
                class_signature,
                primitive,
            } => {
                let Some(class) = self.session.resolve_class(class_signature).await? else {
                    return Err(EngineError::BadEdit(format!(
                        "wrapper type {} is not loaded in the target",
                        class_signature
                    )));
                };
                let value_of_sig = format!("({}){}", primitive_sig(primitive), class_signature);
                let Some((declaring, method)) = self
                    .session
                    .find_method(class, "valueOf", &value_of_sig)
                    .await?
                else {
                    return Err(EngineError::BadEdit(
                        "wrapper type has no valueOf mirror".to_string(),
                    ));
                };
                let mirrored = self
                    .session
                    .invoke_static_on(self.access.id, declaring, method, &[primitive.clone()])
                    .await?;
                mirrored
                    .and_then(|v| v.non_null_object())
                    .map(|id| Value::object(tags::OBJECT, id))
                    .ok_or(EngineError::SessionGone)
            }
        }
    }
}

async fn compute(
    session: &Arc<Session>,
    access: &Arc<ThreadAccess>,
    kind: ServiceKind,
    object: ObjectId,
    prop: &BeanProperty,
) -> PropertyState {
    let writable = prop.setter.is_some();
    let result = session
        .run_while_stopped(access, kind, async {
            let (getter_class, getter_method) = prop.getter;
            let value = session
                .invoke_on(access.id, object, getter_class, getter_method, &[])
                .await?;
            let Some(value) = value else {
                return Ok(PropertyState::Failed("target disconnected".to_string()));
            };
            classify(session, access.id, writable, value).await
        })
        .await;

    match result {
        Ok(Some(state)) => state,
        Ok(None) => PropertyState::Failed("target disconnected".to_string()),
        Err(EngineError::Invocation {
            class_name,
            message,
            ..
        }) => PropertyState::Failed(format!("{}: {}", class_name, message)),
        Err(e) => PropertyState::Failed(e.to_string()),
    }
}

/// String values are directly editable; boxed primitives are editable
/// through a remote mirror; arbitrary objects render via toString and
/// stay read-only.
async fn classify(
    session: &Session,
    thread: ThreadId,
    writable: bool,
    value: Value,
) -> EngineResult<PropertyState> {
    let tag = value.tag;
    match value.data {
        ValueData::Object(0) => Ok(PropertyState::Ready {
            text: "null".to_string(),
            editable: false,
        }),
        ValueData::Object(id) if tag == tags::STRING => {
            let text = session.wire().string_value(id).await?;
            Ok(PropertyState::Ready {
                text,
                editable: writable,
            })
        }
        ValueData::Object(id) => {
            let class_name = session
                .class_name_of(id)
                .await?
                .unwrap_or_else(|| "java.lang.Object".to_string());
            let boxed = BOXED_TYPES.iter().any(|(name, _)| *name == class_name);
            let text = session
                .invoke_string(thread, id, "toString")
                .await?
                .unwrap_or_else(|| format!("{}@{:x}", class_name, id));
            Ok(PropertyState::Ready {
                text,
                editable: writable && boxed,
            })
        }
        ValueData::Void => Ok(PropertyState::Ready {
            text: "void".to_string(),
            editable: false,
        }),
        _ => Ok(PropertyState::Ready {
            text: value.format(),
            editable: writable,
        }),
    }
}

enum EditValue {
    Primitive(Value),
    Text(String),
    Boxed {
        class_signature: String,
        primitive: Value,
    },
}

fn primitive_sig(value: &Value) -> &'static str {
    match value.data {
        ValueData::Int(_) => "I",
        ValueData::Long(_) => "J",
        ValueData::Short(_) => "S",
        ValueData::Byte(_) => "B",
        ValueData::Char(_) => "C",
        ValueData::Boolean(_) => "Z",
        ValueData::Float(_) => "F",
        ValueData::Double(_) => "D",
        _ => "V",
    }
}

fn parse_edit(signature: &str, text: &str) -> EngineResult<EditValue> {
    if signature == "Ljava/lang/String;" {
        return Ok(EditValue::Text(text.to_string()));
    }

    if let Some(dotted) = names::object_signature_to_dotted(signature) {
        let Some((_, prim_sig)) = BOXED_TYPES.iter().find(|(name, _)| *name == dotted) else {
            return Err(EngineError::BadEdit(format!(
                "values of type {} are not editable",
                dotted
            )));
        };
        let primitive = parse_primitive(prim_sig, text)?;
        return Ok(EditValue::Boxed {
            class_signature: signature.to_string(),
            primitive,
        });
    }

    Ok(EditValue::Primitive(parse_primitive(signature, text)?))
}

fn parse_primitive(signature: &str, text: &str) -> EngineResult<Value> {
    let text = text.trim();
    let bad = |what: &str| EngineError::BadEdit(format!("cannot parse '{}' as {}", text, what));

    match signature {
        "I" => text.parse::<i32>().map(Value::int).map_err(|_| bad("int")),
        "J" => text.parse::<i64>().map(Value::long).map_err(|_| bad("long")),
        "S" => text
            .parse::<i16>()
            .map(|v| Value {
                tag: tags::SHORT,
                data: ValueData::Short(v),
            })
            .map_err(|_| bad("short")),
        "B" => text
            .parse::<i8>()
            .map(|v| Value {
                tag: tags::BYTE,
                data: ValueData::Byte(v),
            })
            .map_err(|_| bad("byte")),
        "C" => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value {
                    tag: tags::CHAR,
                    data: ValueData::Char(c as u16),
                }),
                _ => Err(bad("char")),
            }
        }
        "Z" => match text {
            "true" => Ok(Value::boolean(true)),
            "false" => Ok(Value::boolean(false)),
            _ => Err(bad("boolean")),
        },
        "F" => text
            .parse::<f32>()
            .map(|v| Value {
                tag: tags::FLOAT,
                data: ValueData::Float(v),
            })
            .map_err(|_| bad("float")),
        "D" => text
            .parse::<f64>()
            .map(|v| Value {
                tag: tags::DOUBLE,
                data: ValueData::Double(v),
            })
            .map_err(|_| bad("double")),
        other => Err(EngineError::BadEdit(format!(
            "values of type {} are not editable",
            names::signature_to_dotted(other)
        ))),
    }
}

/// Wrap every discovered bean property of a remote object in a lazy
/// accessor bound to this session and thread.
pub async fn load_properties(
    session: &Arc<Session>,
    access: &Arc<ThreadAccess>,
    kind: ServiceKind,
    object: ObjectId,
) -> EngineResult<Vec<RemoteProperty>> {
    let props = session.bean_properties(access, kind, object).await?;
    Ok(props
        .into_iter()
        .map(|prop| RemoteProperty::new(session.clone(), access.clone(), kind, object, prop))
        .collect())
}

impl Session {
    /// Discover bean-style properties on a remote object's class:
    /// zero-argument getX/isX getters paired (when present) with setX
    /// setters taking the same type. Reflection only; values stay
    /// uncomputed until first read.
    pub async fn bean_properties(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
        object: ObjectId,
    ) -> EngineResult<Vec<BeanProperty>> {
        let discovered = self
            .run_while_stopped(access, kind, async {
                self.discover_bean_properties(object).await
            })
            .await?;
        Ok(discovered.unwrap_or_default())
    }

    async fn discover_bean_properties(
        &self,
        object: ObjectId,
    ) -> EngineResult<Vec<BeanProperty>> {
        let class = match self.wire().reference_type_of(object).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let methods = self.collect_methods(class).await?;

        let mut setters: Vec<(String, (ClassId, MethodId), String)> = Vec::new();
        for (declaring, method) in &methods {
            let Some((params, ret)) = names::parse_method_signature(&method.signature) else {
                continue;
            };
            if params.len() != 1 || ret != "V" {
                continue;
            }
            if let Some(rest) = method.name.strip_prefix("set") {
                if let Some(prop) = decapitalize(rest) {
                    setters.push((prop, (*declaring, method.method_id), params[0].clone()));
                }
            }
        }

        let mut out: Vec<BeanProperty> = Vec::new();
        for (declaring, method) in &methods {
            let Some((params, ret)) = names::parse_method_signature(&method.signature) else {
                continue;
            };
            if !params.is_empty() || ret == "V" {
                continue;
            }

            let rest = method
                .name
                .strip_prefix("get")
                .or_else(|| method.name.strip_prefix("is"));
            let Some(prop) = rest.and_then(decapitalize) else {
                continue;
            };
            if prop == "class" {
                continue;
            }
            if out.iter().any(|p| p.name == prop) {
                continue;
            }

            let setter = setters
                .iter()
                .find(|(name, _, sig)| *name == prop && *sig == ret)
                .map(|(_, ids, _)| *ids);

            out.push(BeanProperty {
                name: prop,
                getter: (*declaring, method.method_id),
                setter,
                value_signature: ret,
            });
        }

        debug!("discovered {} bean properties", out.len());
        Ok(out)
    }
}

fn decapitalize(rest: &str) -> Option<String> {
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    Some(first.to_ascii_lowercase().to_string() + chars.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitive_values() {
        assert!(matches!(
            parse_primitive("I", "42").unwrap().data,
            ValueData::Int(42)
        ));
        assert!(matches!(
            parse_primitive("Z", "true").unwrap().data,
            ValueData::Boolean(true)
        ));
        assert!(matches!(
            parse_primitive("D", "1.5").unwrap().data,
            ValueData::Double(_)
        ));
        assert!(parse_primitive("I", "not-a-number").is_err());
        assert!(parse_primitive("Z", "yes").is_err());
        assert!(parse_primitive("C", "ab").is_err());
    }

    #[test]
    fn test_parse_edit_classification() {
        assert!(matches!(
            parse_edit("Ljava/lang/String;", "hello").unwrap(),
            EditValue::Text(_)
        ));
        assert!(matches!(
            parse_edit("Ljava/lang/Integer;", "7").unwrap(),
            EditValue::Boxed { .. }
        ));
        assert!(matches!(
            parse_edit("I", "7").unwrap(),
            EditValue::Primitive(_)
        ));
        // Opaque object types are not editable
        assert!(parse_edit("Ljava/awt/Color;", "red").is_err());
        // Parse failures surface before any remote call happens
        assert!(parse_edit("Ljava/lang/Integer;", "x").is_err());
    }

    #[test]
    fn test_decapitalize() {
        assert_eq!(decapitalize("Name").as_deref(), Some("name"));
        assert_eq!(decapitalize("X").as_deref(), Some("x"));
        assert_eq!(decapitalize("name"), None);
        assert_eq!(decapitalize(""), None);
    }
}
