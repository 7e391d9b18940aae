mod handler;
pub(crate) mod model;

pub use handler::{add_image, borrowed, get_one, remove, remove_image, shared, update};
pub(crate) use handler::owned_tool;
