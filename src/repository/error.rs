// ==========================================
// 模压质量拒收分析 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 数据库错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    // ===== 数据质量错误 =====
    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => {
                if msg.contains("UNIQUE") {
                    RepositoryError::UniqueConstraintViolation(msg)
                } else if msg.contains("FOREIGN KEY") {
                    RepositoryError::ForeignKeyViolation(msg)
                } else {
                    RepositoryError::DatabaseQueryError(msg)
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                id: "Unknown".to_string(),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::InternalError(format!("JSON 序列化失败: {}", err))
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 解析 TEXT 日期列（YYYY-MM-DD，兼容带时间部分的写法）
pub(crate) fn parse_date_column(
    field: &str,
    raw: Option<String>,
) -> RepositoryResult<Option<chrono::NaiveDate>> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    let date_part = raw.trim().get(..10).unwrap_or(raw.trim());
    chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: format!("{} ({})", e, raw),
        })
}

/// 解析 TEXT 时间戳列
pub(crate) fn parse_datetime_column(
    field: &str,
    raw: &str,
) -> RepositoryResult<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: format!("{} ({})", e, raw),
        })
}

/// 时间戳写入格式
pub(crate) fn format_datetime(ts: &chrono::NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_mapping() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(2067),
            Some("UNIQUE constraint failed: daily_rejection_report.report_date".to_string()),
        );
        assert!(matches!(
            RepositoryError::from(err),
            RepositoryError::UniqueConstraintViolation(_)
        ));
    }

    #[test]
    fn test_parse_date_column() {
        assert_eq!(parse_date_column("d", None).unwrap(), None);
        assert_eq!(
            parse_date_column("d", Some("2025-11-26 08:00:00".to_string())).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 11, 26)
        );
        assert!(parse_date_column("d", Some("26/11/2025".to_string())).is_err());
    }
}
