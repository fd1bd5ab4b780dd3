use crate::config::RunConfig;
use crate::error::{AppError, AppResult, ConfigError};
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载运行配置并校验
pub async fn load_run_config(toml_file_path: &Path) -> AppResult<RunConfig> {
    let path_str = toml_file_path.display().to_string();

    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|e| AppError::file_read_failed(&path_str, e))?;

    let cfg: RunConfig = toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
        path: path_str.clone(),
        source,
    })?;

    cfg.validate()?;

    tracing::info!("已加载运行配置: {}", path_str);
    Ok(cfg)
}
