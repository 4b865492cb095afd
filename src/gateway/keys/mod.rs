//! Key 池运维接口：用量统计、冷却策略、人工重置。

mod handler;

pub use handler::*;
