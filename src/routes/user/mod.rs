mod handler;
mod model;

pub use handler::{
    check_username, follow, me, my_buddies, my_followers, my_following, profile, remove_buddy,
    search, sync, unfollow, update_me, user_toolboxes,
};
