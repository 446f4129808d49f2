// Pixel-toolkit adapter (AWT/Swing)
//
// Containment is decided by walking the single-inheritance superclass
// chain against java.awt.Container; a type that only implements a
// container-like interface is not detected. That limitation is kept
// deliberately (see DESIGN.md).

use crate::error::{EngineError, EngineResult};
use crate::service::ServiceHandle;
use crate::snapshot::{Bitmap, ToolkitAdapter, WalkCx};
use crate::tree::Rect;
use tokio::sync::OnceCell;
use tracing::debug;
use uiscope_wire::types::{FieldId, ObjectId, Value, ValueData};

const WINDOW_SIG: &str = "Ljava/awt/Window;";
const CONTAINER_SIG: &str = "Ljava/awt/Container;";

pub(crate) struct AwtAdapter {
    /// Field ids of java.awt.Rectangle (x, y, width, height), resolved
    /// once per capture.
    rect_fields: OnceCell<[FieldId; 4]>,
}

impl AwtAdapter {
    pub(crate) fn new() -> Self {
        Self {
            rect_fields: OnceCell::new(),
        }
    }

    async fn rect_fields(
        &self,
        cx: &WalkCx<'_>,
        rectangle: ObjectId,
    ) -> EngineResult<&[FieldId; 4]> {
        self.rect_fields
            .get_or_try_init(|| async {
                let class = cx.session.wire().reference_type_of(rectangle).await?;
                let fields = cx.session.wire().fields_of(class).await?;
                let find = |name: &str| {
                    fields
                        .iter()
                        .find(|f| f.name == name)
                        .map(|f| f.field_id)
                        .ok_or_else(|| {
                            EngineError::Retrieval(format!(
                                "bounds rectangle has no field {}",
                                name
                            ))
                        })
                };
                Ok([find("x")?, find("y")?, find("width")?, find("height")?])
            })
            .await
    }
}

impl ToolkitAdapter for AwtAdapter {
    async fn top_level_windows(&self, cx: &WalkCx<'_>) -> EngineResult<Vec<ObjectId>> {
        let Some(window_class) = cx.session.resolve_class(WINDOW_SIG).await? else {
            return Err(EngineError::Retrieval(
                "target has no java.awt.Window (unsupported runtime)".to_string(),
            ));
        };
        let Some((declaring, method)) = cx
            .session
            .find_method(window_class, "getWindows", "()[Ljava/awt/Window;")
            .await?
        else {
            return Err(EngineError::Retrieval(
                "java.awt.Window.getWindows is unavailable".to_string(),
            ));
        };

        let value = cx
            .session
            .invoke_static_on(cx.thread, declaring, method, &[])
            .await?;
        let Some(array) = value.and_then(|v| v.non_null_object()) else {
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
        let class = match cx.session.wire().reference_type_of(object).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if !cx.session.extends_class(class, CONTAINER_SIG).await? {
            return Ok(Vec::new());
        }

        let value = cx
            .session
            .try_invoke_by_name(cx.thread, object, "getComponents", "()[Ljava/awt/Component;")
            .await?;
        let Some(array) = value.and_then(|v| v.non_null_object()) else {
            return Ok(Vec::new());
        };
        let children = cx.session.wire().object_array_values(array).await?;
        Ok(children.into_iter().filter(|c| *c != 0).collect())
    }

    async fn local_bounds(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<Rect> {
        let value = cx
            .session
            .invoke_by_name(cx.thread, object, "getBounds", "()Ljava/awt/Rectangle;")
            .await?;
        let Some(rectangle) = value.and_then(|v| v.non_null_object()) else {
            return Ok(Rect::ZERO);
        };

        let fields = self.rect_fields(cx, rectangle).await?;
        let values = cx.session.wire().field_values(rectangle, fields).await?;
        if values.len() != 4 {
            return Err(EngineError::Retrieval(
                "bounds rectangle read returned a bad shape".to_string(),
            ));
        }

        let int_at = |value: &Value| match value.data {
            ValueData::Int(n) => n,
            _ => 0,
        };
        Ok(Rect::new(
            int_at(&values[0]),
            int_at(&values[1]),
            int_at(&values[2]),
            int_at(&values[3]),
        ))
    }

    async fn component_name(
        &self,
        cx: &WalkCx<'_>,
        object: ObjectId,
    ) -> EngineResult<Option<String>> {
        cx.session.invoke_string(cx.thread, object, "getName").await
    }

    async fn preview_text(
        &self,
        cx: &WalkCx<'_>,
        object: ObjectId,
    ) -> EngineResult<Option<String>> {
        let text = cx.session.invoke_string(cx.thread, object, "getText").await?;
        Ok(text.map(|t| {
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

    async fn scene_bounds(&self, _cx: &WalkCx<'_>, _object: ObjectId) -> EngineResult<Option<Rect>> {
        // Fixed absolute coordinate system: ancestor accumulation applies.
        Ok(None)
    }

    async fn capture_image(
        &self,
        cx: &WalkCx<'_>,
        service: Option<&ServiceHandle>,
        window: ObjectId,
        bounds: Rect,
    ) -> EngineResult<Option<Bitmap>> {
        if let Some((class, method)) =
            service.and_then(|s| s.capture_window_method.map(|m| (s.class, m)))
        {
            return capture_via_service(cx, class, method, window).await;
        }
        self.capture_direct(cx, window, bounds).await
    }
}

impl AwtAdapter {
    /// Fallback pixel capture without the agent: paint the window into a
    /// remote offscreen image and pull the raster's int buffer in one
    /// bulk fetch.
    async fn capture_direct(
        &self,
        cx: &WalkCx<'_>,
        window: ObjectId,
        bounds: Rect,
    ) -> EngineResult<Option<Bitmap>> {
        let (width, height) = (bounds.width, bounds.height);
        if width <= 0 || height <= 0 {
            return Ok(None);
        }

        let session = cx.session;
        let window_class = match session.wire().reference_type_of(window).await {
            Ok(class) => class,
            Err(e) if e.is_session_gone() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some((create_class, create_method)) = session
            .find_method(window_class, "createImage", "(II)Ljava/awt/Image;")
            .await?
        else {
            debug!("window type cannot create offscreen images");
            return Ok(None);
        };
        let args = [Value::int(width), Value::int(height)];
        let image = session
            .invoke_on(cx.thread, window, create_class, create_method, &args)
            .await?
            .and_then(|v| v.non_null_object());
        let Some(image) = image else {
            return Ok(None);
        };

        let graphics = session
            .invoke_by_name(cx.thread, image, "getGraphics", "()Ljava/awt/Graphics;")
            .await?
            .and_then(|v| v.non_null_object());
        let Some(graphics) = graphics else {
            return Ok(None);
        };

        let Some((paint_class, paint_method)) = session
            .find_method(window_class, "paint", "(Ljava/awt/Graphics;)V")
            .await?
        else {
            return Ok(None);
        };
        session
            .invoke_on(
                cx.thread,
                window,
                paint_class,
                paint_method,
                &[Value::object(uiscope_wire::types::tags::OBJECT, graphics)],
            )
            .await?;

        let raster = session
            .invoke_by_name(cx.thread, image, "getData", "()Ljava/awt/image/Raster;")
            .await?
            .and_then(|v| v.non_null_object());
        let Some(raster) = raster else {
            return Ok(None);
        };
        let buffer = session
            .invoke_by_name(
                cx.thread,
                raster,
                "getDataBuffer",
                "()Ljava/awt/image/DataBuffer;",
            )
            .await?
            .and_then(|v| v.non_null_object());
        let Some(buffer) = buffer else {
            return Ok(None);
        };
        let data = session
            .try_invoke_by_name(cx.thread, buffer, "getData", "()[I")
            .await?
            .and_then(|v| v.non_null_object());
        let Some(data) = data else {
            debug!("offscreen raster is not int-backed");
            return Ok(None);
        };

        let length = session.wire().array_length(data).await?;
        let pixels = session.wire().int_array_values(data, 0, length).await?;
        if pixels.len() != (width as usize) * (height as usize) {
            debug!(
                "raster size {} does not match {}x{}",
                pixels.len(),
                width,
                height
            );
            return Ok(None);
        }

        Ok(Some(Bitmap {
            width: width as u32,
            height: height as u32,
            pixels: pixels.into_iter().map(|p| p as u32).collect(),
        }))
    }
}

/// Agent-side capture: one static call returns [width, height, pixels...].
pub(crate) async fn capture_via_service(
    cx: &WalkCx<'_>,
    class: uiscope_wire::types::ClassId,
    method: uiscope_wire::types::MethodId,
    window: ObjectId,
) -> EngineResult<Option<Bitmap>> {
    let value = cx
        .session
        .invoke_static_on(
            cx.thread,
            class,
            method,
            &[Value::object(uiscope_wire::types::tags::OBJECT, window)],
        )
        .await?;
    let Some(array) = value.and_then(|v| v.non_null_object()) else {
        return Ok(None);
    };

    let length = cx.session.wire().array_length(array).await?;
    if length < 2 {
        return Ok(None);
    }
    let data = cx.session.wire().int_array_values(array, 0, length).await?;

    let width = data[0];
    let height = data[1];
    if width <= 0 || height <= 0 {
        return Ok(None);
    }
    let expected = (width as usize) * (height as usize);
    if data.len() != expected + 2 {
        return Err(EngineError::Retrieval(
            "captured pixel buffer has a bad shape".to_string(),
        ));
    }

    Ok(Some(Bitmap {
        width: width as u32,
        height: height as u32,
        pixels: data[2..].iter().map(|p| *p as u32).collect(),
    }))
}
