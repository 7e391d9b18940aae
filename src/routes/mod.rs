use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::AppState;

pub mod buddy;
pub mod health;
pub mod lending;
pub mod tool;
pub mod toolbox;
pub mod tracker;
pub mod user;


/// Every API route, relative to the configured base URI. Auth requirements
/// are expressed by each handler's extractors.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // health
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        // users
        .route("/users/check-username", get(user::check_username))
        .route("/users/sync", post(user::sync))
        .route("/users/search", get(user::search))
        .route("/users/me", get(user::me).put(user::update_me))
        .route("/users/me/buddies", get(user::my_buddies))
        .route("/users/me/buddies/{id}", delete(user::remove_buddy))
        .route("/users/me/followers", get(user::my_followers))
        .route("/users/me/following", get(user::my_following))
        .route("/users/{id}", get(user::profile))
        .route("/users/{id}/follow", post(user::follow).delete(user::unfollow))
        .route("/users/{id}/buddy-request", post(buddy::send_request))
        .route("/users/{id}/toolboxes", get(user::user_toolboxes))
        // buddy requests
        .route("/buddy-requests", get(buddy::list_requests))
        .route("/buddy-requests/{id}", put(buddy::respond))
        .route("/buddy-requests/send/{id}", post(buddy::send_request))
        // toolboxes
        .route(
            "/toolboxes",
            get(toolbox::list_mine).post(toolbox::create),
        )
        .route(
            "/toolboxes/{id}",
            get(toolbox::get_one)
                .put(toolbox::update)
                .delete(toolbox::remove),
        )
        .route(
            "/toolboxes/{id}/permissions",
            get(toolbox::list_permissions).post(toolbox::grant_permission),
        )
        .route(
            "/toolboxes/{id}/permissions/{user_id}",
            delete(toolbox::revoke_permission),
        )
        .route(
            "/toolboxes/{id}/tools",
            get(toolbox::list_tools).post(toolbox::create_tool),
        )
        // tools
        .route("/tools/shared", get(tool::shared))
        .route("/tools/borrowed", get(tool::borrowed))
        .route(
            "/tools/{id}",
            get(tool::get_one).put(tool::update).delete(tool::remove),
        )
        .route("/tools/{id}/images", post(tool::add_image))
        .route("/tools/{id}/images/{image_id}", delete(tool::remove_image))
        .route("/tools/{id}/lend-request", post(lending::create_request))
        // lending
        .route("/lending/incoming", get(lending::incoming))
        .route("/lending/outgoing", get(lending::outgoing))
        .route("/lending/history", get(lending::history))
        .route("/lending/{id}/respond", put(lending::respond))
        .route("/lending/{id}/return", post(lending::mark_returned))
        // trackers
        .route("/trackers", get(tracker::list_mine))
        .route(
            "/trackers/tools/{id}/tracker",
            post(tracker::attach)
                .put(tracker::report_location)
                .delete(tracker::detach),
        )
        .route("/trackers/tools/{id}/location", get(tracker::location))
        .route(
            "/trackers/tools/{id}/location/history",
            get(tracker::location_history),
        )
}
