pub mod conversations;
pub mod error;
pub mod live;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod mutes;
pub mod reactions;
pub mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};

use crate::state::AppState;

/// All HTTP routes. Everything except `GET /media/{name}` needs a token.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/conversations/{id}/messages", get(messages::get_messages))
        .route("/conversations/{id}/read", post(conversations::mark_read))
        .route("/conversations/{id}/live", get(live::live))
        .route("/messages", post(messages::send_message))
        .route("/messages/{id}", delete(messages::delete_message))
        .route("/messages/{id}/reactions", get(reactions::get_reactions))
        .route("/reactions/toggle", post(reactions::toggle_reaction))
        .route("/mute", post(mutes::mute))
        .route("/unmute", post(mutes::unmute))
        .route(
            "/media",
            post(media::upload_media).layer(DefaultBodyLimit::max(media::MAX_MEDIA_SIZE)),
        )
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(protected)
        .route("/media/{name}", get(media::download_media))
        .with_state(state)
}
