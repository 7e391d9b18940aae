mod handler;
pub(crate) mod model;

pub use handler::{
    create, create_tool, get_one, grant_permission, list_mine, list_permissions, list_tools,
    remove, revoke_permission, update,
};
