use std::sync::Arc;

use crate::auth::SessionManager;
use crate::config::Config;
use crate::repository::UserRepository;
use crate::transport::Transport;

/// Shared application state handed to every handler.
pub struct AppContext {
    pub config: Config,
    pub repository: Arc<dyn UserRepository>,
    pub sessions: SessionManager,
    pub transport: Arc<dyn Transport>,
}
