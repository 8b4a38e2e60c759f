//! CLI 配置
//!
//! 日志级别：全局级别加各阶段的覆盖

use std::collections::HashMap;

use smalls_api::Phase;
use tracing::level_filters::LevelFilter;

/// CLI 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub global: LevelFilter,
    pub phases: HashMap<Phase, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global: LevelFilter::WARN,
            phases: HashMap::new(),
        }
    }
}

impl LogConfig {
    pub fn with_phase(mut self, phase: Phase, level: Option<LevelFilter>) -> Self {
        if let Some(level) = level {
            self.phases.insert(phase, level);
        }
        self
    }

    /// Get log level for a specific phase
    pub fn level_for(&self, phase: Phase) -> LevelFilter {
        self.phases.get(&phase).copied().unwrap_or(self.global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_override() {
        let cfg = LogConfig::default()
            .with_phase(Phase::Vm, Some(LevelFilter::TRACE))
            .with_phase(Phase::Gc, None);
        assert_eq!(cfg.level_for(Phase::Vm), LevelFilter::TRACE);
        assert_eq!(cfg.level_for(Phase::Gc), LevelFilter::WARN);
        assert_eq!(cfg.level_for(Phase::Lexer), LevelFilter::WARN);
    }
}
