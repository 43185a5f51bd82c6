//! 通用输入校验工具

use chrono::{DateTime, NaiveDate};
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// 解析标识符，`field` 用于错误信息
pub fn parse_id(field: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| QueueError::Validation(format!("{} is not a valid identifier: {}", field, value)))
}

/// 解析排队日期，接受 `YYYY-MM-DD` 或 RFC 3339 时间戳（去掉时间部分）
pub fn parse_queue_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.date_naive())
        .map_err(|_| QueueError::Validation(format!("queueDate is not a valid date: {}", value)))
}

/// 排队号必须为正整数
pub fn validate_queue_number(number: i32) -> Result<i32> {
    if number > 0 {
        Ok(number)
    } else {
        Err(QueueError::Validation(format!("queueNumber must be positive, got {}", number)))
    }
}
