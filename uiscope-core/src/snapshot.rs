// Component snapshot builder
//
// One snapshot per top-level window: a descriptor tree plus a captured
// bitmap. The fast path decodes a single self-describing bundle produced
// by the uploaded agent; the slow path walks the widget tree one remote
// call at a time through a per-toolkit adapter.

use crate::error::{EngineError, EngineResult};
use crate::names;
use crate::service::{ServiceHandle, ServiceKind, AGENT_DELIMITER, NO_ADD_SITE};
use crate::session::Session;
use crate::sync::ThreadAccess;
use crate::tree::{ComponentNode, ComponentTree, NodeId, Rect};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};
use uiscope_wire::types::{tags, ClassId, MethodId, ObjectId, ThreadId, Value, NULL_OBJECT};

/// Number of integers in one packed node record, before the child count.
const RECORD_INTS: usize = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Row-major ARGB pixels.
    pub pixels: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub title: String,
    pub tree: ComponentTree,
    pub image: Option<Bitmap>,
}

/// What the snapshot builder needs from a toolkit: windows, children,
/// bounds, names, pixels. One adapter per toolkit keeps the walk itself
/// toolkit-agnostic.
pub(crate) trait ToolkitAdapter {
    async fn top_level_windows(&self, cx: &WalkCx<'_>) -> EngineResult<Vec<ObjectId>>;
    async fn window_title(&self, cx: &WalkCx<'_>, window: ObjectId) -> EngineResult<String>;
    async fn children_of(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<Vec<ObjectId>>;
    async fn local_bounds(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<Rect>;
    async fn component_name(
        &self,
        cx: &WalkCx<'_>,
        object: ObjectId,
    ) -> EngineResult<Option<String>>;
    async fn preview_text(&self, cx: &WalkCx<'_>, object: ObjectId)
        -> EngineResult<Option<String>>;
    async fn is_visible(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<bool>;
    /// Window-relative bounds obtained by remote coordinate transforms,
    /// for toolkits with no fixed absolute coordinate system. None means
    /// "accumulate ancestor origins instead".
    async fn scene_bounds(&self, cx: &WalkCx<'_>, object: ObjectId) -> EngineResult<Option<Rect>>;
    async fn capture_image(
        &self,
        cx: &WalkCx<'_>,
        service: Option<&ServiceHandle>,
        window: ObjectId,
        bounds: Rect,
    ) -> EngineResult<Option<Bitmap>>;
}

pub(crate) struct WalkCx<'s> {
    pub session: &'s Session,
    pub thread: ThreadId,
}

impl Session {
    /// Capture one snapshot per top-level window of the toolkit.
    ///
    /// A retrieval failure aborts only the window it happened in; a
    /// thread-state change or a vanished session aborts the whole capture
    /// and reports no snapshots, since further calls are unsafe.
    pub async fn capture(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
    ) -> EngineResult<Vec<Snapshot>> {
        let service = self.service(kind).await;

        let result = self
            .run_while_stopped(access, kind, async {
                let cx = WalkCx {
                    session: self,
                    thread: access.id,
                };
                match kind {
                    ServiceKind::Awt => {
                        self.capture_windows(&cx, &crate::awt::AwtAdapter::new(), service.as_ref())
                            .await
                    }
                    ServiceKind::Fx => {
                        self.capture_windows(&cx, &crate::fx::FxAdapter::new(), service.as_ref())
                            .await
                    }
                }
            })
            .await;

        match result {
            Ok(Some(snapshots)) => Ok(snapshots),
            Ok(None) => Ok(Vec::new()),
            Err(EngineError::SessionGone) => Ok(Vec::new()),
            Err(EngineError::ThreadState) => {
                warn!("thread state became incompatible mid-capture, reporting no snapshots");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn capture_windows<A: ToolkitAdapter>(
        &self,
        cx: &WalkCx<'_>,
        adapter: &A,
        service: Option<&ServiceHandle>,
    ) -> EngineResult<Vec<Snapshot>> {
        let windows = adapter.top_level_windows(cx).await?;
        debug!("found {} top-level window(s)", windows.len());

        let mut snapshots = Vec::new();
        for window in windows {
            match self.capture_one(cx, adapter, service, window).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e @ (EngineError::SessionGone | EngineError::ThreadState)) => return Err(e),
                Err(e) => {
                    warn!("window capture failed, skipping window: {}", e);
                }
            }
        }
        Ok(snapshots)
    }

    async fn capture_one<A: ToolkitAdapter>(
        &self,
        cx: &WalkCx<'_>,
        adapter: &A,
        service: Option<&ServiceHandle>,
        window: ObjectId,
    ) -> EngineResult<Snapshot> {
        let fast = service.and_then(|s| s.dump_hierarchy_method.map(|m| (s.class, m)));

        let tree = match fast {
            Some((class, method)) => {
                match self.fast_dump(cx.thread, class, method, window).await {
                    Ok(Some(tree)) => tree,
                    Ok(None) => {
                        debug!("fast hierarchy dump unavailable, walking remotely");
                        self.slow_walk(cx, adapter, window).await?
                    }
                    Err(e @ (EngineError::SessionGone | EngineError::ThreadState)) => {
                        return Err(e)
                    }
                    Err(e) => {
                        debug!("fast hierarchy dump failed ({}), walking remotely", e);
                        self.slow_walk(cx, adapter, window).await?
                    }
                }
            }
            None => self.slow_walk(cx, adapter, window).await?,
        };

        if tree.is_empty() {
            return Err(EngineError::Retrieval(
                "window produced no descriptors".to_string(),
            ));
        }

        for (_, node) in tree.iter() {
            if let Some(site) = &node.added_at {
                self.record_add_site(node.object, site.clone()).await;
            }
        }

        let title = match adapter.window_title(cx, window).await {
            Ok(title) => title,
            Err(_) => String::new(),
        };
        let bounds = tree.node(tree.root()).bounds;
        let image = adapter.capture_image(cx, service, window, bounds).await?;

        Ok(Snapshot { title, tree, image })
    }

    /// Fast path: one remote call returns the whole hierarchy as a packed
    /// bundle of [int[] records, names string, handle array, add-site
    /// string], decoded in a single linear pass.
    async fn fast_dump(
        &self,
        thread: ThreadId,
        class: ClassId,
        method: MethodId,
        window: ObjectId,
    ) -> EngineResult<Option<ComponentTree>> {
        let value = self
            .invoke_static_on(thread, class, method, &[Value::object(tags::OBJECT, window)])
            .await?;
        let Some(bundle) = value.and_then(|v| v.non_null_object()) else {
            return Ok(None);
        };

        let parts = self.wire().object_array_values(bundle).await?;
        if parts.len() != 4 || parts.iter().any(|p| *p == NULL_OBJECT) {
            return Err(EngineError::Retrieval(
                "unexpected hierarchy bundle shape".to_string(),
            ));
        }

        let record_count = self.wire().array_length(parts[0]).await?;
        let records = self.wire().int_array_values(parts[0], 0, record_count).await?;
        let names_str = self.wire().string_value(parts[1]).await?;
        let handles = self.wire().object_array_values(parts[2]).await?;
        let sites_str = self.wire().string_value(parts[3]).await?;

        let tree = decode_packed_tree(&records, &names_str, &sites_str, &handles)?;
        Ok(Some(tree))
    }

    async fn slow_walk<A: ToolkitAdapter>(
        &self,
        cx: &WalkCx<'_>,
        adapter: &A,
        window: ObjectId,
    ) -> EngineResult<ComponentTree> {
        let mut tree = ComponentTree::new();
        walk_node(cx, adapter, &mut tree, None, window, (0, 0)).await?;
        Ok(tree)
    }
}

/// Slow path: one "children" call per container, one bounds/name call per
/// node, window-relative coordinates derived by ancestor-origin
/// accumulation (or remote transforms where the adapter provides them).
fn walk_node<'a, 's: 'a, A: ToolkitAdapter>(
    cx: &'a WalkCx<'s>,
    adapter: &'a A,
    tree: &'a mut ComponentTree,
    parent: Option<NodeId>,
    object: ObjectId,
    origin: (i32, i32),
) -> Pin<Box<dyn Future<Output = EngineResult<NodeId>> + 'a>> {
    Box::pin(async move {
        let bounds = adapter.local_bounds(cx, object).await?;
        let type_name = cx
            .session
            .class_name_of(object)
            .await?
            .unwrap_or_else(|| "unknown".to_string());
        let display = adapter
            .component_name(cx, object)
            .await?
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| names::simple_name(&type_name).to_string());
        let visible = adapter.is_visible(cx, object).await?;
        let text = adapter.preview_text(cx, object).await?;

        let wx = origin.0 + bounds.x;
        let wy = origin.1 + bounds.y;
        let window_bounds = match adapter.scene_bounds(cx, object).await? {
            Some(rect) => rect,
            None => Rect::new(wx, wy, bounds.width, bounds.height),
        };

        let added_at = cx.session.add_site(object).await;
        let id = tree.push(
            parent,
            ComponentNode {
                object,
                name: display,
                type_name,
                bounds,
                window_bounds,
                visible,
                text,
                added_at,
                parent: None,
                children: Vec::new(),
                field_owner: None,
            },
        );

        for child in adapter.children_of(cx, object).await? {
            walk_node(cx, adapter, &mut *tree, Some(id), child, (wx, wy)).await?;
        }

        Ok(id)
    })
}

/// Decode the packed hierarchy bundle: pre-order records of 7 ints
/// (x, y, w, h, shiftX, shiftY, visible) each followed by a child count,
/// with names and add sites as delimiter-separated strings and remote
/// handles in the same pre-order.
pub fn decode_packed_tree(
    records: &[i32],
    names_str: &str,
    sites_str: &str,
    handles: &[ObjectId],
) -> EngineResult<ComponentTree> {
    let mut names = names_str.split(AGENT_DELIMITER);
    let mut sites = sites_str.split(AGENT_DELIMITER);
    let mut tree = ComponentTree::new();
    let mut pos = 0usize;
    let mut next_handle = 0usize;

    decode_node(
        records,
        &mut pos,
        &mut names,
        &mut sites,
        handles,
        &mut next_handle,
        &mut tree,
        None,
        (0, 0),
    )?;

    // The record stream, the name segments, and the handle array must all
    // be consumed exactly by the recursive child-count structure.
    if pos != records.len() {
        return Err(malformed("trailing hierarchy records"));
    }
    if names.next().is_some() {
        return Err(malformed("leftover name segments"));
    }
    if next_handle != handles.len() {
        return Err(malformed("leftover component handles"));
    }

    Ok(tree)
}

#[allow(clippy::too_many_arguments)]
fn decode_node<'a>(
    records: &[i32],
    pos: &mut usize,
    names: &mut std::str::Split<'a, char>,
    sites: &mut std::str::Split<'a, char>,
    handles: &[ObjectId],
    next_handle: &mut usize,
    tree: &mut ComponentTree,
    parent: Option<NodeId>,
    origin: (i32, i32),
) -> EngineResult<NodeId> {
    if records.len() - *pos < RECORD_INTS + 1 {
        return Err(malformed("hierarchy record underflow"));
    }

    let x = records[*pos];
    let y = records[*pos + 1];
    let width = records[*pos + 2];
    let height = records[*pos + 3];
    let shift_x = records[*pos + 4];
    let shift_y = records[*pos + 5];
    let visible = records[*pos + 6] != 0;
    let child_count = records[*pos + 7];
    *pos += RECORD_INTS + 1;

    if child_count < 0 {
        return Err(malformed("negative child count"));
    }

    let type_name = names
        .next()
        .ok_or_else(|| malformed("name segment underflow"))?
        .to_string();
    let site = sites
        .next()
        .ok_or_else(|| malformed("add-site segment underflow"))?;
    let added_at = (site != NO_ADD_SITE && !site.is_empty()).then(|| site.to_string());

    let object = *handles
        .get(*next_handle)
        .ok_or_else(|| malformed("component handle underflow"))?;
    *next_handle += 1;

    let wx = origin.0 + x;
    let wy = origin.1 + y;

    let id = tree.push(
        parent,
        ComponentNode {
            object,
            name: names::simple_name(&type_name).to_string(),
            type_name,
            bounds: Rect::new(x, y, width, height),
            window_bounds: Rect::new(wx, wy, width, height),
            visible,
            text: None,
            added_at,
            parent: None,
            children: Vec::new(),
            field_owner: None,
        },
    );

    // Children live in a coordinate space shifted by this node's offsets.
    for _ in 0..child_count {
        decode_node(
            records,
            pos,
            names,
            sites,
            handles,
            next_handle,
            tree,
            Some(id),
            (wx + shift_x, wy + shift_y),
        )?;
    }

    Ok(id)
}

fn malformed(what: &str) -> EngineError {
    EngineError::Retrieval(format!("malformed hierarchy dump: {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::IdentityIndex;

    // One window holding a panel with an OK and a Cancel button.
    fn ok_cancel_bundle() -> (Vec<i32>, String, String, Vec<ObjectId>) {
        #[rustfmt::skip]
        let records = vec![
            // x, y, w, h, shiftX, shiftY, visible, child count
            0, 0, 400, 300, 0, 0, 1, 1,   // window
            10, 20, 380, 260, 0, 0, 1, 2, // panel
            30, 40, 80, 25, 0, 0, 1, 0,   // OK
            150, 40, 80, 25, 0, 0, 1, 0,  // Cancel
        ];
        let names = [
            "javax.swing.JFrame",
            "javax.swing.JPanel",
            "OK",
            "Cancel",
        ]
        .join(&AGENT_DELIMITER.to_string());
        let sites = ["null", "null", "MainPanel.build:42", "null"]
            .join(&AGENT_DELIMITER.to_string());
        let handles = vec![0x10, 0x20, 0x30, 0x40];
        (records, names, sites, handles)
    }

    #[test]
    fn test_decode_ok_cancel_scenario() {
        let (records, names, sites, handles) = ok_cancel_bundle();
        let tree = decode_packed_tree(&records, &names, &sites, &handles).unwrap();

        assert_eq!(tree.len(), 4);
        let root = tree.node(tree.root());
        assert_eq!(root.children.len(), 1);

        let panel = tree.node(root.children[0]);
        assert_eq!(panel.children.len(), 2);
        assert_eq!(tree.node(panel.children[0]).name, "OK");
        assert_eq!(tree.node(panel.children[1]).name, "Cancel");

        // Both buttons fit inside the panel's local bounds.
        let panel_extent = Rect::new(0, 0, panel.bounds.width, panel.bounds.height);
        assert!(panel_extent.contains(&tree.node(panel.children[0]).bounds));
        assert!(panel_extent.contains(&tree.node(panel.children[1]).bounds));

        assert_eq!(
            tree.node(panel.children[0]).added_at.as_deref(),
            Some("MainPanel.build:42")
        );
        assert_eq!(tree.node(panel.children[1]).added_at, None);
    }

    #[test]
    fn test_decode_window_relative_accumulation() {
        let (records, names, sites, handles) = ok_cancel_bundle();
        let tree = decode_packed_tree(&records, &names, &sites, &handles).unwrap();

        for (_, node) in tree.iter() {
            let Some(parent) = node.parent else { continue };
            let parent = tree.node(parent);
            assert_eq!(
                node.window_bounds.x,
                parent.window_bounds.x + node.bounds.x
            );
            assert_eq!(
                node.window_bounds.y,
                parent.window_bounds.y + node.bounds.y
            );
        }

        // Spot check: Cancel sits at window (10+150, 20+40).
        let panel = tree.node(0).children[0];
        let cancel = tree.node(panel).children[1];
        assert_eq!(tree.node(cancel).window_bounds, Rect::new(160, 60, 80, 25));
    }

    #[test]
    fn test_decode_is_idempotent_and_order_preserving() {
        let (records, names, sites, handles) = ok_cancel_bundle();
        let first = decode_packed_tree(&records, &names, &sites, &handles).unwrap();
        let second = decode_packed_tree(&records, &names, &sites, &handles).unwrap();

        assert_eq!(first.len(), second.len());
        for ((_, a), (_, b)) in first.iter().zip(second.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.type_name, b.type_name);
            assert_eq!(a.bounds, b.bounds);
            assert_eq!(a.window_bounds, b.window_bounds);
            assert_eq!(a.children, b.children);
            assert_eq!(a.object, b.object);
        }

        // Node count equals the number of name segments consumed.
        assert_eq!(first.len(), names.split(AGENT_DELIMITER).count());
    }

    #[test]
    fn test_decode_identity_uniqueness() {
        let (records, names, sites, handles) = ok_cancel_bundle();
        let tree = decode_packed_tree(&records, &names, &sites, &handles).unwrap();

        let index = IdentityIndex::build(&tree);
        assert!(index.is_unique());
        for (id, node) in tree.iter() {
            assert_eq!(index.find(node.object), Some(id));
        }
    }

    #[test]
    fn test_decode_shift_offsets() {
        // A window whose content area is shifted by insets (5, 25).
        #[rustfmt::skip]
        let records = vec![
            0, 0, 100, 100, 5, 25, 1, 1,
            0, 0, 90, 70, 0, 0, 1, 0,
        ];
        let names = format!("java.awt.Frame{}java.awt.Panel", AGENT_DELIMITER);
        let sites = format!("null{}null", AGENT_DELIMITER);
        let tree = decode_packed_tree(&records, &names, &sites, &[1, 2]).unwrap();

        let child = tree.node(tree.node(tree.root()).children[0]);
        assert_eq!(child.window_bounds, Rect::new(5, 25, 90, 70));
    }

    #[test]
    fn test_decode_rejects_malformed_bundles() {
        let (records, names, sites, handles) = ok_cancel_bundle();

        // Truncated record stream
        assert!(decode_packed_tree(&records[..records.len() - 2], &names, &sites, &handles).is_err());

        // Too few names
        let short_names = format!("a{}b", AGENT_DELIMITER);
        assert!(decode_packed_tree(&records, &short_names, &sites, &handles).is_err());

        // Too many names
        let long_names = format!("{0}{1}extra", names, AGENT_DELIMITER);
        assert!(decode_packed_tree(&records, &long_names, &sites, &handles).is_err());

        // Handle count mismatch
        assert!(decode_packed_tree(&records, &names, &sites, &handles[..3]).is_err());
    }
}
