pub mod config;
pub mod error;
pub mod gateway;
pub mod groq;
pub mod key_pool;
pub mod logging;
pub mod util;

use anyhow::Context;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load();

    init_tracing(&cfg);

    if cfg.groq_keys.is_empty() {
        tracing::warn!("未配置 GROQ_API_KEYS / GROQ_API_KEY，邮件改写将直接退回原文");
    }

    let now = chrono::Utc::now();
    let store = if cfg.key_usage_persist {
        let store = key_pool::KeyStore::persistent(&cfg.groq_keys, now, &cfg.data_dir);
        match store.load().await {
            Ok(restored) => tracing::info!("已从 key_usage.json 恢复 {restored} 个 key 的用量"),
            // 快照损坏不阻塞启动：按全新计数继续。
            Err(e) => tracing::warn!("加载 key_usage.json 失败: {e:#}"),
        }
        store
    } else {
        key_pool::KeyStore::in_memory(&cfg.groq_keys, now)
    };

    let keys = Arc::new(key_pool::KeyManager::new(store, cfg.policy));
    tracing::info!(
        "Groq key 池已就绪：共 {} 个 key，可用 {} 个",
        keys.key_count().await,
        keys.available_count().await
    );

    let groq = Arc::new(groq::GroqClient::new(&cfg).context("初始化 GroqClient 失败")?);

    let state = Arc::new(gateway::AppState {
        cfg: cfg.clone(),
        keys,
        groq,
    });

    // === 公开路由（不需要认证）===
    let public_routes = Router::new().route("/health", get(handle_health));

    // === API 路由（配置了 API_KEY 时需要认证）===
    let api_routes = Router::new()
        .route("/api/email/enhance", post(gateway::email::handle_enhance))
        .route("/api/ai/key-stats", get(gateway::keys::handle_key_stats))
        .route(
            "/api/ai/policy",
            get(gateway::keys::handle_policy_get).post(gateway::keys::handle_policy_post),
        )
        .route("/api/ai/keys/reset", post(gateway::keys::handle_key_reset))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gateway::common::auth::api_key_middleware,
        ))
        .with_state(state);

    let app = Router::new().merge(public_routes).merge(api_routes);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

async fn handle_health() -> &'static str {
    "ok"
}

fn init_tracing(cfg: &config::Config) {
    // DEBUG=off 关闭全部输出；否则依赖库默认 warn，本项目自身日志至少为 info，
    // 以免环境中预设的 RUST_LOG=warn 把配额相关日志过滤掉。
    let debug = cfg.debug.trim().to_lowercase();
    let filter = if debug == "off" {
        EnvFilter::new("off")
    } else {
        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let env = env.trim();
        if env.is_empty() {
            EnvFilter::new("warn,outreach_ai=info")
        } else if env.contains("outreach_ai") {
            EnvFilter::new(env)
        } else {
            EnvFilter::new(format!("{env},outreach_ai=info"))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}
