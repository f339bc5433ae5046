//! Panel configuration: file schema, service specs and environment overlay

mod env;
mod link;
mod panel_file;
mod store;

pub use env::*;
pub use link::*;
pub use panel_file::*;
pub use store::*;
