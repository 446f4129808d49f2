// Field ownership resolution
//
// For custom components, discover which declaring field of which other
// component holds a reference to each child, by matching remote object
// identities against the values of reflected instance fields.

use crate::error::EngineResult;
use crate::service::ServiceKind;
use crate::session::Session;
use crate::sync::ThreadAccess;
use crate::tree::{ComponentTree, FieldOwner, IdentityIndex};
use std::sync::Arc;
use tracing::debug;
use uiscope_wire::reftype::FieldInfo;
use uiscope_wire::types::NULL_OBJECT;

/// Framework packages whose components never carry user-declared fields
/// worth reporting.
const FRAMEWORK_PACKAGES: &[&str] = &["java.", "javax.", "javafx.", "sun.", "com.sun."];

/// Whether a type is application code rather than toolkit framework code.
pub fn is_custom_type(type_name: &str) -> bool {
    !FRAMEWORK_PACKAGES
        .iter()
        .any(|prefix| type_name.starts_with(prefix))
}

fn is_reference_field(field: &FieldInfo) -> bool {
    !field.is_static() && (field.signature.starts_with('L') || field.signature.starts_with('['))
}

impl Session {
    /// Fill in `field_owner` for every descriptor whose remote object is
    /// directly referenced by an instance field of a custom component in
    /// the same snapshot.
    pub async fn resolve_field_owners(
        &self,
        access: &Arc<ThreadAccess>,
        kind: ServiceKind,
        tree: &mut ComponentTree,
    ) -> EngineResult<()> {
        self.run_while_stopped(access, kind, async {
            self.resolve_owners_locked(access.id, tree).await
        })
        .await?;
        Ok(())
    }

    async fn resolve_owners_locked(
        &self,
        _thread: uiscope_wire::types::ThreadId,
        tree: &mut ComponentTree,
    ) -> EngineResult<()> {
        // Sorted once over the whole snapshot for O(log n) lookups.
        let index = IdentityIndex::build(tree);

        let candidates: Vec<usize> = tree
            .iter()
            .filter(|(_, node)| !node.children.is_empty() && is_custom_type(&node.type_name))
            .map(|(id, _)| id)
            .collect();

        for owner_id in candidates {
            let object = tree.node(owner_id).object;

            let class = match self.wire().reference_type_of(object).await {
                Ok(class) => class,
                Err(e) if e.is_session_gone() => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            // Instance reference fields across the superclass chain.
            let mut fields = Vec::new();
            let mut current = class;
            loop {
                for field in self.wire().fields_of(current).await? {
                    if is_reference_field(&field) {
                        fields.push(field);
                    }
                }
                current = self.wire().superclass_of(current).await?;
                if current == NULL_OBJECT {
                    break;
                }
            }
            if fields.is_empty() {
                continue;
            }

            let field_ids: Vec<_> = fields.iter().map(|f| f.field_id).collect();
            let values = match self.wire().field_values(object, &field_ids).await {
                Ok(values) => values,
                Err(e) if e.is_session_gone() => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            for (field, value) in fields.iter().zip(values) {
                let Some(target) = value.non_null_object() else {
                    continue;
                };
                let Some(component) = index.find(target) else {
                    continue;
                };
                if component == owner_id || tree.node(component).field_owner.is_some() {
                    continue;
                }
                debug!(
                    "component {:x} is held by {}.{}",
                    target,
                    tree.node(owner_id).type_name,
                    field.name
                );
                tree.set_field_owner(
                    component,
                    FieldOwner {
                        field: field.name.clone(),
                        owner: owner_id,
                    },
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_custom_type() {
        assert!(is_custom_type("com.example.app.LoginPanel"));
        assert!(is_custom_type("LoginPanel"));
        assert!(!is_custom_type("javax.swing.JPanel"));
        assert!(!is_custom_type("java.awt.Button"));
        assert!(!is_custom_type("javafx.scene.layout.VBox"));
        assert!(!is_custom_type("com.sun.javafx.scene.SceneHelper"));
    }
}
