// ==========================================
// 模压质量拒收分析 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换Repository / 引擎 / 导入错误为用户友好的错误消息
// 所有错误信息必须包含显式原因
// ==========================================

use crate::engine::car_draft::CarRuleError;
use crate::engine::threshold::ThresholdError;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 配置 / 导入错误
    // ==========================================
    #[error("配置读取失败: {0}")]
    ConfigError(String),

    #[error("文件导入失败: {0}")]
    ImportError(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从引擎规则错误转换
// ==========================================
impl From<CarRuleError> for ApiError {
    fn from(err: CarRuleError) -> Self {
        let from = match &err {
            CarRuleError::AlreadySubmitted { .. } => "SUBMITTED",
            CarRuleError::AlreadyCancelled { .. } => "CANCELLED",
            _ => return ApiError::ValidationError(err.to_string()),
        };
        ApiError::InvalidStateTransition {
            from: from.to_string(),
            to: err.to_string(),
        }
    }
}

impl From<ThresholdError> for ApiError {
    fn from(err: ThresholdError) -> Self {
        match err {
            ThresholdError::DuplicateScope { .. } => ApiError::BusinessRuleViolation(err.to_string()),
            other => ApiError::ValidationError(other.to_string()),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        ApiError::ImportError(err.to_string())
    }
}

/// 配置读取错误（Box<dyn Error>）转换
pub(crate) fn config_error(err: Box<dyn std::error::Error>) -> ApiError {
    ApiError::ConfigError(err.to_string())
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
