use crate::{api::ApiContext, config::Settings};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) body_limit: usize,
}

impl AppState {
    pub(crate) fn new(api: ApiContext) -> Self {
        // Slack above the media cap so the handler reports the typed error.
        let body_limit = usize::try_from(api.max_media_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(64 * 1024);
        Self { api, body_limit }
    }

    pub(crate) fn from_settings(api: ApiContext, settings: &Settings) -> Self {
        Self::new(ApiContext {
            max_media_bytes: settings.max_media_bytes,
            media_public_base: settings.media_public_base.clone(),
            watcher: triggers::WatcherOptions {
                announce_removals: settings.announce_removals,
            },
            ..api
        })
    }
}
