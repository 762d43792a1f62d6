/// 系统配置类型与从配置构建核心组件的辅助函数。
pub mod config;

pub use config::SystemConfig;
