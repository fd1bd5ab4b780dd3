use crate::error::{AppError, AppResult};
use crate::infrastructure::CacheIdentityMode;
use crate::services::ConversionLib;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 程序配置（环境变量）
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时进行的 LLM 调用数量
    pub llm_workers: usize,
    /// 失败重试次数（总尝试次数 = 重试次数 + 1）
    pub llm_retries: u32,
    /// 单次调用超时（秒）
    pub llm_timeout_secs: u64,
    /// 运行配置文件路径
    pub run_config_path: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_workers: 4,
            llm_retries: 5,
            llm_timeout_secs: 300,
            run_config_path: "config.toml".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            llm_api_key: "local".to_string(),
            llm_api_base_url: "http://0.0.0.0:4000".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            llm_workers: std::env::var("LLM_WORKERS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_workers),
            llm_retries: std::env::var("LLM_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_retries),
            llm_timeout_secs: std::env::var("LLM_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_timeout_secs),
            run_config_path: std::env::var("RUN_CONFIG").unwrap_or(default.run_config_path),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
        }
    }
}

/// 实验运行配置（TOML 文件）
#[derive(Clone, Debug, Deserialize)]
pub struct RunConfig {
    pub paths: PathsConfig,
    pub steps: StepsConfig,
    pub convert: ConversionConfig,
    pub answer: AnswerConfig,
    pub judge: JudgeConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PathsConfig {
    pub reports_dir: PathBuf,
    pub questions_file: PathBuf,
    pub markdown_dir: PathBuf,
    pub answers_file: PathBuf,
    pub evaluated_answers_file: PathBuf,
    pub cache_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StepsConfig {
    pub convert: bool,
    pub answer: bool,
    pub judge: bool,
}

/// 文档转换配置
#[derive(Clone, Debug, Deserialize)]
pub struct ConversionConfig {
    /// 转换时用于图片描述的模型，None 表示不使用模型
    pub model: Option<String>,
    pub lib: ConversionLib,
    pub img_prompt: String,
    pub temperature: f32,
    pub suffix: Option<String>,
    pub sample_first_n: Option<usize>,
    pub target_files: Option<Vec<String>>,
    #[serde(default)]
    pub read_cache: bool,
    #[serde(default)]
    pub write_cache: bool,
    #[serde(default)]
    pub retry_cached_failures: bool,
    #[serde(default)]
    pub cache_identity: CacheIdentityMode,
    /// 同时进行的转换数量
    #[serde(default = "default_convert_workers")]
    pub workers: usize,
    /// 转换失败的重试次数
    #[serde(default = "default_convert_retries")]
    pub retries: u32,
    /// 单个文件的转换超时（秒）
    #[serde(default = "default_convert_timeout_secs")]
    pub timeout_secs: u64,
    /// 各转换库的命令模板，覆盖内置默认值
    #[serde(default)]
    pub commands: BTreeMap<ConversionLib, Vec<String>>,
}

fn default_convert_workers() -> usize {
    10
}

fn default_convert_retries() -> u32 {
    2
}

fn default_convert_timeout_secs() -> u64 {
    1800
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnswerConfig {
    pub model: String,
    pub temperature: f32,
    pub prompt: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JudgeConfig {
    pub model: String,
    pub prompt: String,
    /// 通过强制函数调用取得评判结果；关闭时要求模型直接输出 JSON
    #[serde(default = "default_judge_tool_call")]
    pub tool_call: bool,
}

fn default_judge_tool_call() -> bool {
    true
}

impl RunConfig {
    /// 校验配置
    pub fn validate(&self) -> AppResult<()> {
        validate_temperature("convert.temperature", self.convert.temperature)?;
        validate_temperature("answer.temperature", self.answer.temperature)?;

        if self.convert.img_prompt.is_empty() {
            return Err(AppError::validation_failed("convert.img_prompt", "不能为空"));
        }

        if self.convert.workers == 0 {
            return Err(AppError::validation_failed("convert.workers", "必须大于 0"));
        }

        if self.convert.timeout_secs == 0 {
            return Err(AppError::validation_failed("convert.timeout_secs", "必须大于 0"));
        }

        if self.convert.command_template().is_none() {
            return Err(AppError::validation_failed(
                "convert.commands",
                format!("转换库 {} 没有配置命令模板", self.convert.lib),
            ));
        }

        if !self.answer.prompt.contains("{report_content}") || !self.answer.prompt.contains("{question}") {
            return Err(AppError::validation_failed(
                "answer.prompt",
                "必须包含 {report_content} 和 {question}",
            ));
        }

        if !self.judge.prompt.contains("{answer}") || !self.judge.prompt.contains("{ground_truth}") {
            return Err(AppError::validation_failed(
                "judge.prompt",
                "必须包含 {answer} 和 {ground_truth}",
            ));
        }

        Ok(())
    }
}

impl ConversionConfig {
    /// 当前转换库的命令模板：配置优先，其次内置默认值
    pub fn command_template(&self) -> Option<Vec<String>> {
        self.commands
            .get(&self.lib)
            .cloned()
            .or_else(|| self.lib.default_command())
    }
}

fn validate_temperature(field: &str, value: f32) -> AppResult<()> {
    if !(0.0..=2.0).contains(&value) {
        return Err(AppError::validation_failed(field, format!("温度 {} 不在 [0, 2] 范围内", value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[paths]
reports_dir = "data/reports"
questions_file = "data/questions.json"
markdown_dir = "out/markdown"
answers_file = "out/answers.json"
evaluated_answers_file = "out/evaluated.json"
cache_dir = "cache"

[steps]
convert = true
answer = true
judge = false

[convert]
lib = "markitdown"
img_prompt = "Describe the image."
temperature = 0.0
read_cache = true

[answer]
model = "gpt-4o-mini"
temperature = 0.0
prompt = "Q: {question}\n\n{report_content}"

[judge]
model = "gpt-4o"
prompt = "{question} {answer} {ground_truth}"
"#;

    #[test]
    fn test_sample_config_parses_and_validates() {
        let cfg: RunConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.convert.lib, ConversionLib::Markitdown);
        assert!(cfg.convert.model.is_none());
        assert_eq!(cfg.convert.workers, 10);
        assert_eq!(cfg.convert.retries, 2);
        assert_eq!(cfg.convert.cache_identity, CacheIdentityMode::Mtime);
        assert!(cfg.judge.tool_call);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_temperature_out_of_range() {
        let mut cfg: RunConfig = toml::from_str(SAMPLE).unwrap();
        cfg.answer.temperature = 2.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_answer_prompt_requires_placeholders() {
        let mut cfg: RunConfig = toml::from_str(SAMPLE).unwrap();
        cfg.answer.prompt = "Answer: {question}".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("answer.prompt"));
    }

    #[test]
    fn test_lib_without_command_is_rejected() {
        let mut cfg: RunConfig = toml::from_str(SAMPLE).unwrap();
        cfg.convert.lib = ConversionLib::Zerox;
        assert!(cfg.validate().is_err());

        cfg.convert.commands.insert(
            ConversionLib::Zerox,
            vec!["zerox-cli".to_string(), "{file}".to_string()],
        );
        assert!(cfg.validate().is_ok());
    }
}
