//! # 排队Web模块
//!
//! 提供排队操作的HTTP接口和WebSocket实时订阅

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod ws;

pub use error::{ApiError, ApiResult};
pub use server::{create_app, WebServer};
pub use state::AppState;
