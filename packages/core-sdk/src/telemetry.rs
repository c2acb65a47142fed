use std::{fs::OpenOptions, io::Write, path::PathBuf, sync::RwLock};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const LOG_FILE: &str = "council.log";

static TELEMETRY_ENABLED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));
static LOG_DIR: Lazy<RwLock<PathBuf>> = Lazy::new(|| RwLock::new(PathBuf::from("logs")));

/**
 * \brief 更新遥测开关状态。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

/**
 * \brief 查询当前遥测开关状态。
 */
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 修改日志目录（默认 logs/）。
 */
pub fn set_log_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = LOG_DIR.write() {
        *guard = dir.into();
    }
}

/**
 * \brief 记录常规事件：总是发出 tracing 事件，开关打开时追加写入日志文件。
 */
pub fn log_event(category: &str, message: &str) {
    tracing::info!(category = %category, "{}", message);
    persist("INFO", category, message);
}

/**
 * \brief 记录告警事件。
 */
pub fn log_warn(category: &str, message: &str) {
    tracing::warn!(category = %category, "{}", message);
    persist("WARN", category, message);
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    tracing::error!(category = %category, "{}", message);
    persist("ERROR", category, message);
}

/**
 * \brief 将 API Key 处理为可展示的形式，避免明文出现在日志或界面中。
 */
pub fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    match chars.len() {
        0 => "<none>".to_string(),
        n if n <= 8 => "*".repeat(n),
        n => {
            let head: String = chars[..3].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{}…{}", head, tail)
        }
    }
}

fn persist(level: &str, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line(level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn format_line(timestamp: &str, level: &str, category: &str, message: &str) -> String {
    format!("{} [{}] {} - {}", timestamp, level, category, message)
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let log_dir = LOG_DIR
        .read()
        .map(|g| g.clone())
        .unwrap_or_else(|_| PathBuf::from("logs"));
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE))?;
    writeln!(file, "{}", format_line(&timestamp, level, category, message))?;
    Ok(())
}
