use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use council_core_sdk::{
    db::{self, DbSettings, DEFAULT_DB_FILE},
    models::{EndpointSettings, Message},
    prelude::{ChatResult, CustomOpenAiProvider, DEFAULT_TEMPERATURE},
    server, telemetry,
};

/**
 * \brief 自定义 OpenAI 兼容端点的命令行入口。
 */
#[derive(Parser, Debug)]
#[command(name = "council", version, about = "Council custom endpoint tools")]
struct Cli {
    /** \brief 设置数据库路径 */
    #[arg(long, env = "COUNCIL_DB", default_value = DEFAULT_DB_FILE, global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 保存自定义端点配置。
     */
    Configure {
        #[arg(long)]
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        /** \brief 遥测开关，未给出时保持原值 */
        #[arg(long)]
        telemetry: Option<bool>,
    },

    /**
     * \brief 清除已保存的端点配置。
     */
    Clear,

    /**
     * \brief 显示当前配置（密钥脱敏）。
     */
    Show,

    /**
     * \brief 列出可用的对话模型。
     */
    Models,

    /**
     * \brief 发送一条消息并打印完整回复。
     */
    Chat {
        #[arg(long)]
        model: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        system: Option<String>,
        /** \brief 超时秒数 */
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f64,
    },

    /**
     * \brief 校验连接；未给出 --url 时针对已保存地址校验密钥。
     */
    Validate {
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value = "")]
        api_key: String,
    },

    /**
     * \brief 启动本地 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let store = DbSettings::new(cli.db.clone());
    let conn = store.open().context("open settings database failed")?;
    tracing::debug!(db = %cli.db.display(), "settings store opened");
    telemetry::set_enabled(db::get_telemetry_enabled(&conn).unwrap_or(false));

    match cli.command {
        Commands::Configure {
            url,
            name,
            api_key,
            telemetry: enable_telemetry,
        } => {
            if url.trim().is_empty() {
                bail!("--url must not be empty");
            }
            db::save_endpoint_settings(
                &conn,
                &EndpointSettings {
                    custom_endpoint_name: name,
                    custom_endpoint_url: Some(url),
                    custom_endpoint_api_key: api_key,
                },
            )
            .context("save endpoint settings failed")?;
            if let Some(enabled) = enable_telemetry {
                db::set_telemetry_enabled(&conn, enabled).context("save telemetry failed")?;
                telemetry::set_enabled(enabled);
            }
            let cfg = CustomOpenAiProvider::new(store).get_config();
            println!(
                "Saved endpoint {} ({}) key={}",
                cfg.name,
                cfg.base_url,
                telemetry::redact_key(&cfg.api_key)
            );
        }
        Commands::Clear => {
            db::clear_endpoint_settings(&conn).context("clear endpoint settings failed")?;
            println!("Cleared custom endpoint settings");
        }
        Commands::Show => {
            let cfg = CustomOpenAiProvider::new(store).get_config();
            println!("name: {}", cfg.name);
            println!(
                "url:  {}",
                if cfg.base_url.is_empty() {
                    "<not configured>"
                } else {
                    cfg.base_url.as_str()
                }
            );
            println!("key:  {}", telemetry::redact_key(&cfg.api_key));
        }
        Commands::Models => {
            let models = CustomOpenAiProvider::new(store).list_models().await;
            if models.is_empty() {
                eprintln!("no chat models available");
            }
            for m in models {
                println!("{}\t{}", m.id, m.display_name);
            }
        }
        Commands::Chat {
            model,
            prompt,
            system,
            timeout,
            temperature,
        } => {
            let mut messages = Vec::new();
            if let Some(sys) = system {
                messages.push(Message::new("system", sys));
            }
            messages.push(Message::new("user", prompt));

            let provider = CustomOpenAiProvider::new(store);
            match provider
                .send_chat_completion(
                    &model,
                    &messages,
                    Duration::from_secs(timeout),
                    temperature,
                )
                .await
            {
                ChatResult::Success { content } => println!("{}", content),
                ChatResult::Failure { error_message } => {
                    eprintln!("{}", error_message);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Validate { url, api_key } => {
            let provider = CustomOpenAiProvider::new(store);
            let result = match url {
                Some(url) => provider.validate_connection(&url, &api_key).await,
                None => provider.validate_key(&api_key).await,
            };
            println!("{}", result.message);
            if !result.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Serve { addr } => {
            drop(conn);
            server::run(&addr, cli.db).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_without_telemetry_flag_leaves_it_unset() {
        let cli = Cli::try_parse_from(["council", "configure", "--url", "http://localhost:8000"])
            .expect("parse");
        match cli.command {
            Commands::Configure { telemetry, .. } => assert_eq!(telemetry, None),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_configure_with_telemetry_flag() {
        let cli = Cli::try_parse_from([
            "council",
            "configure",
            "--url",
            "http://localhost:8000",
            "--telemetry",
            "true",
        ])
        .expect("parse");
        match cli.command {
            Commands::Configure { telemetry, .. } => assert_eq!(telemetry, Some(true)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_clear_command_parses() {
        let cli = Cli::try_parse_from(["council", "--db", "x.db", "clear"]).expect("parse");
        assert!(matches!(cli.command, Commands::Clear));
        assert_eq!(cli.db, PathBuf::from("x.db"));
    }
}
