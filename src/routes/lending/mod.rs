mod handler;
mod model;

pub use handler::{create_request, history, incoming, mark_returned, outgoing, respond};
