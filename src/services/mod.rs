pub mod dav;
pub mod properties;
