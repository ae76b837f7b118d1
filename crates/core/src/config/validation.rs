use crate::{ConductorError, ConductorResult};

/// 配置节的校验接口
///
/// 校验失败属于配置错误，应在进程启动期直接失败退出。
pub trait ConfigValidator {
    fn validate(&self) -> ConductorResult<()>;
}

/// 常用的字段校验工具
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> ConductorResult<()> {
        if value.trim().is_empty() {
            return Err(ConductorError::Configuration(format!("{field} 不能为空")));
        }
        Ok(())
    }

    pub fn validate_positive_u64(value: u64, field: &str) -> ConductorResult<()> {
        if value == 0 {
            return Err(ConductorError::Configuration(format!("{field} 必须大于0")));
        }
        Ok(())
    }

    pub fn validate_positive_i64(value: i64, field: &str) -> ConductorResult<()> {
        if value <= 0 {
            return Err(ConductorError::Configuration(format!("{field} 必须大于0")));
        }
        Ok(())
    }

    pub fn validate_bind_address(value: &str, field: &str) -> ConductorResult<()> {
        Self::validate_not_empty(value, field)?;
        if value.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConductorError::Configuration(format!(
                "{field} 不是合法的监听地址: {value}"
            )));
        }
        Ok(())
    }
}
