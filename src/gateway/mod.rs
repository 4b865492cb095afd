use crate::config::Config;
use crate::groq::GroqClient;
use crate::key_pool::KeyManager;
use std::sync::Arc;

pub mod common;
pub mod email;
pub mod keys;

/// 各路由共享的应用状态。
pub struct AppState {
    pub cfg: Config,
    pub keys: Arc<KeyManager>,
    pub groq: Arc<GroqClient>,
}
