pub mod filename;
pub mod mime;
pub mod path;
