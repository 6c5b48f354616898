//! Nodes of the DAV tree and the operations performed on them.

pub mod chunking;
pub mod file;
pub mod node;
pub mod tree;

pub use chunking::{ChunkInfo, ChunkStore};
pub use file::FileNode;
pub use node::{DirectoryNode, Node, NodeContext};
pub use tree::Tree;
