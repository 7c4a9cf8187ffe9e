//! 日志系统集成测试
//!
//! 测试范围:
//! - 日志配置默认值与序列化
//! - 日志配置从文件加载
//! - 日志系统初始化、写入与关闭
//! - 查询执行过程中的日志输出

mod common;

use std::fs;
use std::time::Duration;

use crossquery::config::{Config, LogConfig};
use crossquery::query::plan::QueryInfo;
use crossquery::utils::logging;
use serial_test::serial;
use tempfile::TempDir;

/// 测试日志配置默认值
#[test]
fn test_log_config_defaults() {
    let config = Config::default();

    assert_eq!(config.log.level, "info");
    assert_eq!(config.log.dir, "logs");
    assert_eq!(config.log.file, "crossquery");
    assert_eq!(config.log.max_file_size, 100 * 1024 * 1024); // 100MB
    assert_eq!(config.log.max_files, 5);
}

/// 测试日志配置序列化和反序列化
#[test]
fn test_log_config_serialization() {
    let config = Config {
        log: LogConfig {
            level: "debug".to_string(),
            dir: "test_logs".to_string(),
            file: "test_crossquery".to_string(),
            max_file_size: 50 * 1024 * 1024, // 50MB
            max_files: 3,
        },
        ..Config::default()
    };

    let toml_str = toml::to_string_pretty(&config).expect("序列化配置失败");
    assert!(toml_str.contains("[log]"));
    assert!(toml_str.contains("level = \"debug\""));
    assert!(toml_str.contains("max_file_size = 52428800"));

    let loaded: Config = toml::from_str(&toml_str).expect("反序列化配置失败");
    assert_eq!(loaded, config);
}

/// 测试日志配置从文件加载
#[test]
fn test_log_config_from_file() {
    let temp_dir = TempDir::new().expect("创建测试目录失败");
    let config_content = r#"
[log]
level = "debug"
dir = "custom_logs"
file = "custom_crossquery"
max_file_size = 52428800
max_files = 3

[pipeline]
max_item_count = 25
"#;
    let config_path = temp_dir.path().join("test_config.toml");
    fs::write(&config_path, config_content).expect("写入配置文件失败");

    let config = Config::load(&config_path).expect("加载配置失败");
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.log.dir, "custom_logs");
    assert_eq!(config.log.file, "custom_crossquery");
    assert_eq!(config.log.max_files, 3);
    assert_eq!(config.pipeline.max_item_count, 25);
    assert_eq!(config.pipeline.max_concurrency, 4);
}

/// 集成测试：初始化日志系统并执行一次查询
/// 注意：flexi_logger 使用全局 logger，同一进程内只能初始化一次，所以全部在一个测试中验证
#[tokio::test]
#[serial]
async fn test_logging_init_and_query_output() {
    let temp_dir = TempDir::new().expect("创建测试目录失败");
    let config = Config {
        log: LogConfig {
            level: "debug".to_string(),
            dir: temp_dir.path().to_string_lossy().to_string(),
            file: "pipeline_test".to_string(),
            ..LogConfig::default()
        },
        ..Config::default()
    };

    assert!(!logging::is_initialized());
    logging::init(&config).expect("日志初始化失败");
    assert!(logging::is_initialized());

    // 一次跨分区查询会产生阶段创建的调试日志
    let container = common::test_container(2);
    common::place(&container, 0, vec![serde_json::json!({"id": 1})]);
    common::place(&container, 1, vec![serde_json::json!({"id": 2})]);
    let context = common::pipeline_context(&container, "SELECT * FROM c", QueryInfo::default(), 10);
    let drained = common::drain(context, None).await.expect("查询应该成功");
    assert_eq!(common::sorted_ids(&drained.documents), vec![1, 2]);

    logging::shutdown();
    assert!(!logging::is_initialized());
    // 关闭后的日志调用在 log 层被过滤，不会写入已关闭的写线程
    assert_eq!(log::max_level(), log::LevelFilter::Off);
    assert!(!log::log_enabled!(log::Level::Error));
    log::error!("关闭后不应写出");
    std::thread::sleep(Duration::from_millis(100));

    let log_files: Vec<_> = fs::read_dir(temp_dir.path())
        .expect("读取目录失败")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("pipeline_test"))
        .collect();
    assert!(!log_files.is_empty(), "应该至少有一个日志文件");

    let content = fs::read_to_string(log_files[0].path()).expect("读取日志文件失败");
    assert!(content.contains("日志系统初始化完成"), "日志应包含初始化信息");
    assert!(content.contains("query pipeline"), "日志应包含管道创建信息");
    assert!(!content.contains("关闭后不应写出"));
}
