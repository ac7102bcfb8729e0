use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// 每个账号的总额度
pub const USAGE_TOTAL: i64 = 150;

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageProgress {
    pub used: i64,
    pub total: i64,
    pub remaining: i64,
    pub percent: u32,
    pub battery_level: u32, // 按 10% 取整的电池格数
}

/// `usage_limit` 是剩余额度
pub fn usage_progress(usage_limit: i64) -> UsageProgress {
    let remaining = usage_limit.clamp(0, USAGE_TOTAL);
    let used = USAGE_TOTAL - remaining;
    let percent = (used as f64 / USAGE_TOTAL as f64 * 100.0).round() as u32;
    let battery_level = ((percent as f64 / 10.0).round() * 10.0) as u32;
    UsageProgress {
        used,
        total: USAGE_TOTAL,
        remaining,
        percent,
        battery_level,
    }
}

pub fn mask_text(text: &str, show_chars: usize) -> String {
    if text.chars().count() <= show_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(show_chars).collect();
    format!("{}...", head)
}

/// 用户名只显示前三分之一
pub fn mask_username(text: &str) -> String {
    let len = text.chars().count();
    let show = (len + 2) / 3;
    if len <= show {
        return text.to_string();
    }
    mask_text(text, show)
}

pub fn mask_password(password: &str) -> String {
    "•".repeat(password.chars().count())
}

/// 统一成 `YYYY-MM-DD HH:MM:SS`，无法解析时原样返回
pub fn format_datetime(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return "-".to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt.with_timezone(&Local).format(DISPLAY_FORMAT).to_string();
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, pattern) {
            return naive.format(DISPLAY_FORMAT).to_string();
        }
    }
    value.to_string()
}

pub fn format_unix(seconds: f64) -> String {
    match Local.timestamp_opt(seconds.trunc() as i64, 0).single() {
        Some(dt) => dt.format(DISPLAY_FORMAT).to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_progress_bounds() {
        let full = usage_progress(150);
        assert_eq!((full.used, full.remaining, full.percent), (0, 150, 0));
        assert_eq!(full.battery_level, 0);

        let empty = usage_progress(0);
        assert_eq!((empty.used, empty.remaining, empty.percent), (150, 0, 100));
        assert_eq!(empty.battery_level, 100);

        let partial = usage_progress(100);
        assert_eq!(partial.used, 50);
        assert_eq!(partial.percent, 33);
        assert_eq!(partial.battery_level, 30);

        // 越界值按边界处理
        assert_eq!(usage_progress(-5), empty);
        assert_eq!(usage_progress(900), full);
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("  user.name+tag@mail.example.org "));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.d"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_masking() {
        assert_eq!(mask_text("eyJhbGciOi", 6), "eyJhbG...");
        assert_eq!(mask_text("short", 6), "short");
        assert_eq!(mask_username("abcdefghi"), "abc...");
        assert_eq!(mask_username("ab"), "a...");
        assert_eq!(mask_password("pw12"), "••••");
    }

    #[test]
    fn test_format_datetime() {
        assert_eq!(format_datetime(""), "-");
        assert_eq!(
            format_datetime("2025-03-01T10:04:05.123456"),
            "2025-03-01 10:04:05"
        );
        assert_eq!(format_datetime("2025-03-01 10:04:05"), "2025-03-01 10:04:05");
        assert_eq!(format_datetime("yesterday"), "yesterday");
    }
}
