// ==========================================
// 模压质量拒收分析 - 应用层
// ==========================================
// 职责: 组装共享连接、Repository 与 API 实例
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState, DB_PATH_ENV};
