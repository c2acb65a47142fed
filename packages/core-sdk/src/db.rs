use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::models::EndpointSettings;

/** \brief 默认数据库文件（当前目录下） */
pub const DEFAULT_DB_FILE: &str = "council.db";

const KEY_NAME: &str = "custom_endpoint_name";
const KEY_URL: &str = "custom_endpoint_url";
const KEY_API_KEY: &str = "custom_endpoint_api_key";
const KEY_TELEMETRY: &str = "telemetry_enabled";

/**
 * \brief 端点设置来源。适配器在每次调用时读取一次，不做缓存。
 */
pub trait SettingsSource: Send + Sync {
    fn endpoint_settings(&self) -> Result<EndpointSettings>;
}

/**
 * \brief 固定的内存设置，用于测试与一次性命令。
 */
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub EndpointSettings);

impl StaticSettings {
    pub fn new(name: Option<&str>, url: Option<&str>, api_key: Option<&str>) -> Self {
        Self(EndpointSettings {
            custom_endpoint_name: name.map(str::to_string),
            custom_endpoint_url: url.map(str::to_string),
            custom_endpoint_api_key: api_key.map(str::to_string),
        })
    }
}

impl SettingsSource for StaticSettings {
    fn endpoint_settings(&self) -> Result<EndpointSettings> {
        Ok(self.0.clone())
    }
}

/**
 * \brief 基于 SQLite 的设置存储，每次读取都会重新打开数据库。
 */
#[derive(Debug, Clone)]
pub struct DbSettings {
    path: PathBuf,
}

impl DbSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /**
     * \brief 打开并迁移数据库。
     */
    pub fn open(&self) -> Result<Connection> {
        let conn = open_db(&self.path)
            .with_context(|| format!("open settings db {}", self.path.display()))?;
        migrate(&conn)?;
        Ok(conn)
    }
}

impl SettingsSource for DbSettings {
    fn endpoint_settings(&self) -> Result<EndpointSettings> {
        let conn = self.open()?;
        load_endpoint_settings(&conn)
    }
}

/**
 * \brief 打开指定路径的数据库文件。
 */
pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建配置表。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief 读取自定义端点设置，缺失的键返回 None。
 */
pub fn load_endpoint_settings(conn: &Connection) -> Result<EndpointSettings> {
    Ok(EndpointSettings {
        custom_endpoint_name: get_config_value(conn, KEY_NAME)?,
        custom_endpoint_url: get_config_value(conn, KEY_URL)?,
        custom_endpoint_api_key: get_config_value(conn, KEY_API_KEY)?,
    })
}

/**
 * \brief 保存自定义端点设置。
 * \details 值为 None 的字段保持原样；值为空字符串时删除该键。
 */
pub fn save_endpoint_settings(conn: &Connection, settings: &EndpointSettings) -> Result<()> {
    let pairs = [
        (KEY_NAME, settings.custom_endpoint_name.as_deref()),
        (KEY_URL, settings.custom_endpoint_url.as_deref()),
        (KEY_API_KEY, settings.custom_endpoint_api_key.as_deref()),
    ];
    for (key, value) in pairs {
        match value {
            Some("") => delete_config_value(conn, key)?,
            Some(v) => set_config_value(conn, key, v)?,
            None => {}
        }
    }
    Ok(())
}

/**
 * \brief 清除全部自定义端点设置。
 */
pub fn clear_endpoint_settings(conn: &Connection) -> Result<()> {
    for key in [KEY_NAME, KEY_URL, KEY_API_KEY] {
        delete_config_value(conn, key)?;
    }
    Ok(())
}

pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    Ok(get_config_value(conn, KEY_TELEMETRY)?
        .map(|v| v == "1")
        .unwrap_or(false))
}

pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_config_value(conn, KEY_TELEMETRY, if enabled { "1" } else { "0" })
}

fn get_config_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM app_config WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

fn set_config_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn delete_config_value(conn: &Connection, key: &str) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key = ?1", params![key]))?;
    Ok(())
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
