use std::path::PathBuf;
use std::sync::Arc;

use courier_core::Messaging;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub messaging: Messaging,
    pub jwt_secret: String,
    /// Where uploaded media is written.
    pub media_dir: PathBuf,
    /// Base URL clients use to reach this server, without a trailing slash.
    pub public_url: String,
}

impl AppStateInner {
    pub fn media_url(&self, name: &str) -> String {
        format!("{}/media/{}", self.public_url.trim_end_matches('/'), name)
    }
}
