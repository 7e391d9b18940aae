mod handler;
mod model;

pub use handler::{attach, detach, list_mine, location, location_history, report_location};
