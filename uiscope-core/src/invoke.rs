// Remote invocation facade
//
// Uniform request/response wrapper for calling methods on remote objects
// and classes. Every call here must already be inside a protected region
// (run_while_stopped); the facade does not manage suspension itself.
// Invocation exceptions from target code are translated into a structured
// error carrying the remote message and a best-effort stack; disconnect
// and collected-object conditions become absent results.

use crate::error::{EngineError, EngineResult};
use crate::names;
use crate::session::Session;
use tracing::trace;
use uiscope_wire::classtype::InvokeResult;
use uiscope_wire::commands::invoke_options;
use uiscope_wire::reftype::MethodInfo;
use uiscope_wire::types::{ClassId, MethodId, ObjectId, ThreadId, Value, NULL_OBJECT};

/// Cap on how many remote stack frames the exception translator fetches.
const MAX_REMOTE_STACK: usize = 20;

impl Session {
    /// Find a method by name (and exact signature, unless empty) walking
    /// the superclass chain. Returns the declaring class and method id.
    pub async fn find_method(
        &self,
        class: ClassId,
        name: &str,
        signature: &str,
    ) -> EngineResult<Option<(ClassId, MethodId)>> {
        let mut current = class;
        loop {
            let methods = self.wire().methods_of(current).await?;
            if let Some(m) = methods
                .iter()
                .find(|m| m.name == name && (signature.is_empty() || m.signature == signature))
            {
                return Ok(Some((current, m.method_id)));
            }
            current = self.wire().superclass_of(current).await?;
            if current == NULL_OBJECT {
                return Ok(None);
            }
        }
    }

    /// Collect declared methods across the superclass chain, paired with
    /// their declaring class.
    pub async fn collect_methods(
        &self,
        class: ClassId,
    ) -> EngineResult<Vec<(ClassId, MethodInfo)>> {
        let mut out = Vec::new();
        let mut current = class;
        loop {
            for m in self.wire().methods_of(current).await? {
                out.push((current, m));
            }
            current = self.wire().superclass_of(current).await?;
            if current == NULL_OBJECT {
                return Ok(out);
            }
        }
    }

    /// Whether `class` extends the class named by `target_signature`.
    /// Walks the single-inheritance superclass chain only; interface-based
    /// containment is not detected.
    pub async fn extends_class(
        &self,
        class: ClassId,
        target_signature: &str,
    ) -> EngineResult<bool> {
        let Some(target) = self.resolve_class(target_signature).await? else {
            return Ok(false);
        };
        let mut current = class;
        loop {
            if current == target {
                return Ok(true);
            }
            current = self.wire().superclass_of(current).await?;
            if current == NULL_OBJECT {
                return Ok(false);
            }
        }
    }

    /// First prepared class matching a JNI signature.
    pub async fn resolve_class(&self, signature: &str) -> EngineResult<Option<ClassId>> {
        let classes = self.wire().classes_by_signature(signature).await?;
        Ok(classes.first().map(|c| c.type_id))
    }

    /// Invoke an instance method. `Ok(None)` means the remote state is no
    /// longer observable; target-thrown exceptions become
    /// `EngineError::Invocation`.
    pub async fn invoke_on(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        class: ClassId,
        method: MethodId,
        args: &[Value],
    ) -> EngineResult<Option<Value>> {
        let result = self
            .wire()
            .invoke_method(
                receiver,
                thread,
                class,
                method,
                args,
                invoke_options::SINGLE_THREADED,
            )
            .await;
        match result {
            Ok(res) => self.finish_invoke(thread, res).await,
            Err(e) if e.is_session_gone() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Invoke a static method.
    pub async fn invoke_static_on(
        &self,
        thread: ThreadId,
        class: ClassId,
        method: MethodId,
        args: &[Value],
    ) -> EngineResult<Option<Value>> {
        let result = self
            .wire()
            .invoke_static(class, thread, method, args, invoke_options::SINGLE_THREADED)
            .await;
        match result {
            Ok(res) => self.finish_invoke(thread, res).await,
            Err(e) if e.is_session_gone() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_invoke(
        &self,
        thread: ThreadId,
        res: InvokeResult,
    ) -> EngineResult<Option<Value>> {
        if res.exception != NULL_OBJECT {
            return Err(self.translate_exception(thread, res.exception).await);
        }
        Ok(Some(res.value))
    }

    /// Invoke a zero-argument method by name, resolving it first. A
    /// missing method is a retrieval failure (unsupported runtime).
    pub async fn invoke_by_name(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        name: &str,
        signature: &str,
    ) -> EngineResult<Option<Value>> {
        let class = match self.wire().reference_type_of(receiver).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some((declaring, method)) = self.find_method(class, name, signature).await? else {
            return Err(EngineError::Retrieval(format!("missing method {}", name)));
        };
        self.invoke_on(thread, receiver, declaring, method, &[]).await
    }

    /// Like `invoke_by_name`, but a missing method is simply absent.
    pub async fn try_invoke_by_name(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        name: &str,
        signature: &str,
    ) -> EngineResult<Option<Value>> {
        let class = match self.wire().reference_type_of(receiver).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match self.find_method(class, name, signature).await? {
            Some((declaring, method)) => {
                self.invoke_on(thread, receiver, declaring, method, &[]).await
            }
            None => Ok(None),
        }
    }

    /// Chain zero-argument calls (get-scene, get-root, ...), following the
    /// returned object at each step. Absent at the first null link.
    pub async fn call_chain(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        chain: &[&str],
    ) -> EngineResult<Option<ObjectId>> {
        let mut obj = receiver;
        for name in chain {
            let value = self.invoke_by_name(thread, obj, name, "").await?;
            match value.and_then(|v| v.non_null_object()) {
                Some(next) => obj = next,
                None => return Ok(None),
            }
        }
        Ok(Some(obj))
    }

    /// Invoke a zero-argument string-returning method and fetch the text.
    pub async fn invoke_string(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        name: &str,
    ) -> EngineResult<Option<String>> {
        let value = self
            .try_invoke_by_name(thread, receiver, name, "()Ljava/lang/String;")
            .await?;
        let Some(id) = value.and_then(|v| v.non_null_object()) else {
            return Ok(None);
        };
        match self.wire().string_value(id).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.is_session_gone() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Invoke a zero-argument boolean-returning method; absent methods and
    /// gone sessions read as `default`.
    pub async fn invoke_bool_or(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        name: &str,
        default: bool,
    ) -> EngineResult<bool> {
        let value = self.try_invoke_by_name(thread, receiver, name, "()Z").await?;
        Ok(match value.map(|v| v.data) {
            Some(uiscope_wire::ValueData::Boolean(b)) => b,
            _ => default,
        })
    }

    /// Invoke a zero-argument numeric method, accepting int and floating
    /// returns (scene-graph coordinates are doubles).
    pub async fn invoke_number(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        name: &str,
    ) -> EngineResult<Option<f64>> {
        let value = self.try_invoke_by_name(thread, receiver, name, "").await?;
        Ok(value.and_then(|v| match v.data {
            uiscope_wire::ValueData::Int(n) => Some(n as f64),
            uiscope_wire::ValueData::Long(n) => Some(n as f64),
            uiscope_wire::ValueData::Float(n) => Some(n as f64),
            uiscope_wire::ValueData::Double(n) => Some(n),
            _ => None,
        }))
    }

    /// The dotted class name of a remote object.
    pub async fn class_name_of(&self, object: ObjectId) -> EngineResult<Option<String>> {
        let class = match self.wire().reference_type_of(object).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match self.wire().type_signature(class).await {
            Ok(sig) => Ok(Some(names::signature_to_dotted(&sig))),
            Err(e) if e.is_session_gone() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Translate a target-thrown exception object into a structured,
    /// re-throwable error. Every remote read here is best-effort and goes
    /// straight to the wire: a secondary exception from the target must
    /// not re-enter this translation.
    pub(crate) async fn translate_exception(
        &self,
        thread: ThreadId,
        exception: ObjectId,
    ) -> EngineError {
        let mut class_name = String::from("java.lang.Throwable");
        let mut message = String::new();

        if let Ok(class) = self.wire().reference_type_of(exception).await {
            if let Ok(sig) = self.wire().type_signature(class).await {
                class_name = names::signature_to_dotted(&sig);
            }
        }

        if let Some(text) = self
            .raw_invoke_string(thread, exception, "getMessage", "()Ljava/lang/String;")
            .await
        {
            message = text;
        }

        let remote_stack = self.fetch_remote_stack(thread, exception).await;

        trace!(
            "translated invocation exception {}: {} ({} frames)",
            class_name,
            message,
            remote_stack.len()
        );

        EngineError::Invocation {
            class_name,
            message,
            remote_stack,
            preferred_thread: Some(thread),
        }
    }

    /// Invoke a string-returning method swallowing every failure,
    /// including exceptions thrown by the call itself.
    async fn raw_invoke_string(
        &self,
        thread: ThreadId,
        receiver: ObjectId,
        name: &str,
        signature: &str,
    ) -> Option<String> {
        let class = self.wire().reference_type_of(receiver).await.ok()?;
        let (declaring, method) = self.find_method(class, name, signature).await.ok()??;
        let res = self
            .wire()
            .invoke_method(
                receiver,
                thread,
                declaring,
                method,
                &[],
                invoke_options::SINGLE_THREADED,
            )
            .await
            .ok()?;
        if res.exception != NULL_OBJECT {
            return None;
        }
        let id = res.value.non_null_object()?;
        self.wire().string_value(id).await.ok()
    }

    async fn fetch_remote_stack(&self, thread: ThreadId, exception: ObjectId) -> Vec<String> {
        let class = match self.wire().reference_type_of(exception).await {
            Ok(class) => class,
            Err(_) => return Vec::new(),
        };
        let Ok(Some((declaring, method))) = self
            .find_method(class, "getStackTrace", "()[Ljava/lang/StackTraceElement;")
            .await
        else {
            return Vec::new();
        };
        let Ok(res) = self
            .wire()
            .invoke_method(
                exception,
                thread,
                declaring,
                method,
                &[],
                invoke_options::SINGLE_THREADED,
            )
            .await
        else {
            return Vec::new();
        };
        if res.exception != NULL_OBJECT {
            return Vec::new();
        }
        let Some(array) = res.value.non_null_object() else {
            return Vec::new();
        };
        let Ok(elements) = self.wire().object_array_values(array).await else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        for element in elements.into_iter().take(MAX_REMOTE_STACK) {
            if element == NULL_OBJECT {
                continue;
            }
            match self
                .raw_invoke_string(thread, element, "toString", "()Ljava/lang/String;")
                .await
            {
                Some(text) => frames.push(text),
                None => break,
            }
        }
        frames
    }
}
