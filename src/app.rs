use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::board;
use crate::config;
use crate::data::{
    BoardAdminService, BoardFeedService, BoardModerationService, BoardSessionService,
    BoardSubmissionService,
};
use crate::logging;
use crate::media;
use crate::model::Page;
use crate::session;
use crate::storage;
use crate::ui;

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub server: Option<String>,
    pub config_file: Option<PathBuf>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(server) = options.server {
        cfg.server.base_url = server;
    }

    let log_path = logging::install(&cfg.logging)?;
    info!(
        version = crate::VERSION,
        server = %cfg.server.base_url,
        log = %log_path.display(),
        "starting board-tui"
    );

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);

    let client = Arc::new(
        board::Client::new(board::ClientConfig {
            base_url: cfg.server.base_url.clone(),
            user_agent: cfg.server.user_agent.clone(),
            timeout: cfg.server.timeout,
        })
        .context("create board client")?,
    );
    let server = client.base_url().to_string();

    let session = Arc::new(session::Manager::new(
        store.clone(),
        &server,
        Arc::new(BoardSessionService::new(client.clone())),
    ));
    if let Err(err) = session.restore() {
        warn!(error = ?err, "could not restore saved session");
    }

    let media_cfg = media::Config {
        cache_dir: cfg.media.cache_dir.clone(),
        max_size_bytes: cfg.media.max_size_bytes,
        default_ttl: cfg.media.default_ttl,
        workers: cfg.media.workers,
    };
    let media_manager = match media::Manager::new(store.clone(), media_cfg, client.clone()) {
        Ok(manager) => Some(manager),
        Err(err) => {
            warn!(error = ?err, "image previews disabled");
            None
        }
    };
    let media_handle = media_manager.as_ref().map(|manager| manager.handle());

    let services = ui::Services {
        feed: Arc::new(BoardFeedService::new(client.clone())),
        submissions: Arc::new(BoardSubmissionService::new(client.clone())),
        moderation: Arc::new(BoardModerationService::new(client.clone())),
        admin: Arc::new(BoardAdminService::new(client)),
    };

    let mut model = ui::Model::new(ui::Options {
        services,
        session,
        media: media_handle,
        page: Page {
            start: cfg.server.page_start,
            count: cfg.server.page_size,
        },
        thumbnail_cols: cfg.ui.thumbnail_cols,
    });
    let result = model.run();

    drop(media_manager);
    info!("board-tui exited");
    result
}
