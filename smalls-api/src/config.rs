//! API 层配置
//!
//! 包含执行配置 RunConfig 和全局单例（供 CLI 使用）

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use smalls_config::RuntimeConfig;

use crate::error::SmallsError;

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 运行时配置（限额、诊断、搜索路径）
    pub runtime: RuntimeConfig,
    /// 源码注册到的模块路径
    pub module: String,
    /// 入口函数名
    pub entry: String,
    /// 作为用户 prelude 的模块
    pub user_prelude: Option<String>,
    /// Whether to dump bytecode after compilation
    pub dump_bytecode: bool,
    /// 把 `print` 输出收集到 [`ExecuteOutput::stdout`](crate::ExecuteOutput)
    pub capture_output: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            module: "main".to_string(),
            entry: "main".to_string(),
            user_prelude: None,
            dump_bytecode: false,
            capture_output: false,
        }
    }
}

impl RunConfig {
    /// 从 JSON 文本读取；缺省字段取默认值
    pub fn from_json(text: &str) -> Result<Self, SmallsError> {
        smalls_config::from_json(text).map_err(|e| SmallsError::Config(e.to_string()))
    }

    /// 每次执行的指令额度，0 表示不限
    pub fn gas(&self) -> u64 {
        self.runtime.limits.gas_limit
    }
}

// Global config singleton for CLI convenience
static GLOBAL_CONFIG: OnceCell<RunConfig> = OnceCell::new();

/// 设置全局配置；只能设置一次
pub fn init(config: RunConfig) -> Result<(), SmallsError> {
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| SmallsError::Config("global config already initialized".to_string()))
}

/// 全局配置；未初始化时以默认配置初始化
pub fn config() -> &'static RunConfig {
    GLOBAL_CONFIG.get_or_init(RunConfig::default)
}

/// Check if config is initialized
pub fn is_initialized() -> bool {
    GLOBAL_CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_config() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.module, "main");
        assert_eq!(cfg.entry, "main");
        assert!(!cfg.dump_bytecode);
        assert!(!cfg.capture_output);
        assert_eq!(cfg.gas(), 100_000);
        assert_eq!(cfg.runtime.limits.max_call_depth, 1024);
    }

    #[test]
    fn test_run_config_from_json() {
        let cfg = RunConfig::from_json(
            r#"{ "entry": "start", "runtime": { "limits": { "gas_limit": 0 } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.entry, "start");
        assert_eq!(cfg.module, "main");
        assert_eq!(cfg.gas(), 0);
        assert_eq!(cfg.runtime.limits.max_call_depth, 1024);
    }

    #[test]
    fn test_run_config_from_bad_json() {
        let err = RunConfig::from_json("{ \"entry\": 3 }").unwrap_err();
        assert!(matches!(err, SmallsError::Config(_)));
    }

    #[test]
    fn test_global_config_init_and_get() {
        // 全局状态在同一进程的测试间共享
        if !is_initialized() {
            let cfg = RunConfig {
                module: "global".to_string(),
                ..RunConfig::default()
            };
            if init(cfg).is_ok() {
                assert_eq!(config().module, "global");
            }
        }
        assert!(is_initialized());
        assert!(init(RunConfig::default()).is_err());
    }
}
