mod handler;
mod model;

pub use handler::{list_requests, respond, send_request};
