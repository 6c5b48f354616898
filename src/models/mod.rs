pub mod node_info;
pub mod request;

pub use node_info::{EntryKind, NodeInfo, Permissions};
pub use request::{DavResponse, PropertyMap, RequestContext};
