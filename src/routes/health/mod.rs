mod handler;

pub use handler::{health, ready};
