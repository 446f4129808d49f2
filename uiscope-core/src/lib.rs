// Remote GUI introspection engine
//
// Reconstructs component trees and pixel captures from a live JVM target
// over the debug wire protocol:
// - Service uploader: injects agent helper classes for fast introspection
// - Thread coordinator: protected regions over provably-stopped threads
// - Invocation facade: remote calls with a small failure taxonomy
// - Snapshot builder: fast packed-bundle decode or per-node remote walk
// - Field/listener resolver and lazy bean properties

pub mod awt;
pub mod error;
pub mod fields;
pub mod fx;
pub mod invoke;
pub mod listeners;
pub mod names;
pub mod payload;
pub mod properties;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod sync;
pub mod tree;

pub use error::{EngineError, EngineResult};
pub use uiscope_wire::WireConnection;
pub use listeners::{attachable_listener_types, ListenerEvent, ListenerRef};
pub use payload::{PayloadArchive, PayloadClass};
pub use properties::{load_properties, BeanProperty, PropertyState, RemoteProperty, CALCULATING};
pub use service::{ServiceHandle, ServiceKind};
pub use session::Session;
pub use snapshot::{decode_packed_tree, Bitmap, Snapshot};
pub use sync::{ThreadAccess, AUTORESUME_GRACE};
pub use tree::{ComponentNode, ComponentTree, FieldOwner, IdentityIndex, NodeId, Rect};
