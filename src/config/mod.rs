use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 日志配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "crossquery".to_string(),
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_files: 5,
        }
    }
}

/// 管道执行参数
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// 每页最多返回的条目数，同时作为向后端请求的页大小提示
    pub max_item_count: usize,
    /// 同时在途的分区请求上限
    pub max_concurrency: usize,
    pub enable_prefetch: bool,
    /// 单次 `move_next` 内允许的拆分替换次数
    pub max_split_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_item_count: 100,
            max_concurrency: 4,
            enable_prefetch: true,
            max_split_retries: 8,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.pipeline.max_item_count == 0 {
            return Err("pipeline.max_item_count 必须大于 0".into());
        }
        if self.pipeline.max_concurrency == 0 {
            return Err("pipeline.max_concurrency 必须大于 0".into());
        }
        Ok(())
    }
}
