// Scene-graph toolkit adapter (JavaFX)
//
// There is no fixed absolute coordinate system: window-relative bounds
// come from remote coordinate-transform calls (local to parent, local to
// scene) instead of ancestor-origin accumulation.

use crate::error::{EngineError, EngineResult};
use crate::service::ServiceHandle;
use crate::snapshot::{Bitmap, ToolkitAdapter, WalkCx};
use crate::tree::Rect;
use tracing::debug;
use uiscope_wire::types::{tags, ObjectId, Value};

const WINDOW_SIG: &str = "Ljavafx/stage/Window;";
const PARENT_SIG: &str = "Ljavafx/scene/Parent;";
const BOUNDS_SIG: &str = "Ljavafx/geometry/Bounds;";

pub(crate) struct FxAdapter;

impl FxAdapter {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Read (minX, minY, width, height) off a remote Bounds object.
    async fn read_bounds(&self, cx: &WalkCx<'_>, bounds: ObjectId) -> EngineResult<Rect> {
        let min_x = cx
            .session
            .invoke_number(cx.thread, bounds, "getMinX")
            .await?
            .unwrap_or(0.0);
        let min_y = cx
            .session
            .invoke_number(cx.thread, bounds, "getMinY")
            .await?
            .unwrap_or(0.0);
        let width = cx
            .session
            .invoke_number(cx.thread, bounds, "getWidth")
            .await?
            .unwrap_or(0.0);
        let height = cx
            .session
            .invoke_number(cx.thread, bounds, "getHeight")
            .await?
            .unwrap_or(0.0);

        Ok(Rect::new(
            min_x.round() as i32,
            min_y.round() as i32,
            width.round() as i32,
            height.round() as i32,
        ))
    }

    async fn is_window(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<bool> {
        let class = match cx.session.wire().reference_type_of(object).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        cx.session.extends_class(class, WINDOW_SIG).await
    }
}

impl ToolkitAdapter for FxAdapter {
    async fn top_level_windows(&self, cx: &WalkCx<'_>) -> EngineResult<Vec<ObjectId>> {
        let Some(window_class) = cx.session.resolve_class(WINDOW_SIG).await? else {
            return Err(EngineError::Retrieval(
                "target has no JavaFX runtime".to_string(),
            ));
        };
        let Some((declaring, method)) = cx
            .session
            .find_method(
                window_class,
                "getWindows",
                "()Ljavafx/collections/ObservableList;",
            )
            .await?
        else {
            return Err(EngineError::Retrieval(
                "javafx.stage.Window.getWindows is unavailable (runtime too old)".to_string(),
            ));
        };

        let value = cx
            .session
            .invoke_static_on(cx.thread, declaring, method, &[])
            .await?;
        let Some(list) = value.and_then(|v| v.non_null_object()) else {
            return Ok(Vec::new());
        };

        let array = cx
            .session
            .invoke_by_name(cx.thread, list, "toArray", "()[Ljava/lang/Object;")
            .await?
            .and_then(|v| v.non_null_object());
        let Some(array) = array else {
            return Ok(Vec::new());
        };

        let all = cx.session.wire().object_array_values(array).await?;
        let mut showing = Vec::new();
        for window in all {
            if window == 0 {
                continue;
            }
            if cx
                .session
                .invoke_bool_or(cx.thread, window, "isShowing", false)
                .await?
            {
                showing.push(window);
            }
        }
        Ok(showing)
    }

    async fn window_title(&self, cx: &WalkCx<'_>, window: ObjectId) -> EngineResult<String> {
        if let Some(title) = cx.session.invoke_string(cx.thread, window, "getTitle").await? {
            if !title.is_empty() {
                return Ok(title);
            }
        }
        Ok(cx
            .session
            .class_name_of(window)
            .await?
            .map(|name| crate::names::simple_name(&name).to_string())
            .unwrap_or_default())
    }

    async fn children_of(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<Vec<ObjectId>> {
        // A window node descends into its scene's root.
        if self.is_window(cx, object).await? {
            let root = cx
                .session
                .call_chain(cx.thread, object, &["getScene", "getRoot"])
                .await?;
            return Ok(root.into_iter().collect());
        }

        let class = match cx.session.wire().reference_type_of(object).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if !cx.session.extends_class(class, PARENT_SIG).await? {
            return Ok(Vec::new());
        }

        let list = cx
            .session
            .invoke_by_name(
                cx.thread,
                object,
                "getChildrenUnmodifiable",
                "()Ljavafx/collections/ObservableList;",
            )
            .await?
            .and_then(|v| v.non_null_object());
        let Some(list) = list else {
            return Ok(Vec::new());
        };

        let array = cx
            .session
            .invoke_by_name(cx.thread, list, "toArray", "()[Ljava/lang/Object;")
            .await?
            .and_then(|v| v.non_null_object());
        let Some(array) = array else {
            return Ok(Vec::new());
        };

        let children = cx.session.wire().object_array_values(array).await?;
        Ok(children.into_iter().filter(|c| *c != 0).collect())
    }

    async fn local_bounds(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<Rect> {
        if self.is_window(cx, object).await? {
            let x = cx
                .session
                .invoke_number(cx.thread, object, "getX")
                .await?
                .unwrap_or(0.0);
            let y = cx
                .session
                .invoke_number(cx.thread, object, "getY")
                .await?
                .unwrap_or(0.0);
            let width = cx
                .session
                .invoke_number(cx.thread, object, "getWidth")
                .await?
                .unwrap_or(0.0);
            let height = cx
                .session
                .invoke_number(cx.thread, object, "getHeight")
                .await?
                .unwrap_or(0.0);
            return Ok(Rect::new(
                x.round() as i32,
                y.round() as i32,
                width.round() as i32,
                height.round() as i32,
            ));
        }

        let bounds = cx
            .session
            .try_invoke_by_name(cx.thread, object, "getBoundsInParent", "()Ljavafx/geometry/Bounds;")
            .await?
            .and_then(|v| v.non_null_object());
        match bounds {
            Some(bounds) => self.read_bounds(cx, bounds).await,
            None => Ok(Rect::ZERO),
        }
    }

    async fn component_name(
        &self,
        cx: &WalkCx<'_>,
        object: ObjectId,
    ) -> EngineResult<Option<String>> {
        cx.session.invoke_string(cx.thread, object, "getId").await
    }

    async fn preview_text(
        &self,
        cx: &WalkCx<'_>,
        object: ObjectId,
    ) -> EngineResult<Option<String>> {
        let text = cx.session.invoke_string(cx.thread, object, "getText").await?;
        Ok(text.filter(|t| !t.is_empty()).map(|t| {
            let mut short: String = t.chars().take(40).collect();
            if short.len() < t.len() {
                short.push('…');
            }
            short
        }))
    }

    async fn is_visible(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<bool> {
        cx.session
            .invoke_bool_or(cx.thread, object, "isVisible", true)
            .await
    }

    async fn scene_bounds(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<Option<Rect>> {
        if self.is_window(cx, object).await? {
            return Ok(None);
        }

        let local = cx
            .session
            .try_invoke_by_name(cx.thread, object, "getBoundsInLocal", BOUNDS_SIG)
            .await?
            .and_then(|v| v.non_null_object());
        let Some(local) = local else {
            return Ok(None);
        };

        let class = match cx.session.wire().reference_type_of(object).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some((declaring, method)) = cx
            .session
            .find_method(
                class,
                "localToScene",
                "(Ljavafx/geometry/Bounds;)Ljavafx/geometry/Bounds;",
            )
            .await?
        else {
            return Ok(None);
        };
        let scene_bounds = cx
            .session
            .invoke_on(
                cx.thread,
                object,
                declaring,
                method,
                &[Value::object(tags::OBJECT, local)],
            )
            .await?
            .and_then(|v| v.non_null_object());

        match scene_bounds {
            Some(bounds) => Ok(Some(self.read_bounds(cx, bounds).await?)),
            None => Ok(None),
        }
    }

    async fn capture_image(
        &self,
        cx: &WalkCx<'_>,
        service: Option<&ServiceHandle>,
        window: ObjectId,
        _bounds: Rect,
    ) -> EngineResult<Option<Bitmap>> {
        // Snapshot-image conversion needs target-side cooperation: the
        // agent renders the scene into an int raster and hands back
        // [width, height, pixels...], exactly like the pixel toolkit.
        if let Some((class, method)) =
            service.and_then(|s| s.capture_window_method.map(|m| (s.class, m)))
        {
            return crate::awt::capture_via_service(cx, class, method, window).await;
        }

        debug!("scene-graph pixel capture requires the uploaded agent");
        Ok(None)
    }
}
