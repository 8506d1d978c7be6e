use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    #[error("操作失败: {0}")]
    Operation(String),
    #[error("熔断器已打开: {name}")]
    CircuitOpen { name: String },
    #[error("批量分发失败: {0}")]
    BatchDispatch(String),
    #[error("上游服务错误 ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("网络错误: {0}")]
    Network(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("{entity}未找到: {id}")]
    NotFound { entity: String, id: String },
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type PortalResult<T> = Result<T, PortalError>;

impl PortalError {
    pub fn operation<S: Into<String>>(msg: S) -> Self {
        Self::Operation(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
    pub fn circuit_open<S: Into<String>>(name: S) -> Self {
        Self::CircuitOpen { name: name.into() }
    }
    pub fn upstream<S: Into<String>>(status: u16, msg: S) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }
    pub fn not_found<E: Into<String>, I: Into<String>>(entity: E, id: I) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PortalError::CircuitOpen { .. })
    }
    pub fn is_retryable(&self) -> bool {
        match self {
            PortalError::Network(_) | PortalError::Timeout(_) | PortalError::CircuitOpen { .. } => {
                true
            }
            PortalError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
    /// 不带分类前缀的错误描述，供审计记录和提示消息使用
    pub fn message(&self) -> String {
        match self {
            PortalError::Operation(msg)
            | PortalError::BatchDispatch(msg)
            | PortalError::Network(msg)
            | PortalError::Timeout(msg)
            | PortalError::Validation(msg)
            | PortalError::Configuration(msg)
            | PortalError::Serialization(msg)
            | PortalError::Internal(msg) => msg.clone(),
            PortalError::Upstream { message, .. } => message.clone(),
            PortalError::CircuitOpen { .. } | PortalError::NotFound { .. } => self.to_string(),
        }
    }
    pub fn user_message(&self) -> &str {
        match self {
            PortalError::CircuitOpen { .. } => "服务暂时不可用，请稍后重试",
            PortalError::NotFound { .. } => "请求的资源不存在",
            PortalError::Validation(_) => "输入数据验证失败",
            PortalError::Timeout(_) => "操作超时，请稍后重试",
            PortalError::Upstream { status, .. } if *status < 500 => "请求被服务拒绝",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for PortalError {
    fn from(err: anyhow::Error) -> Self {
        PortalError::Internal(err.to_string())
    }
}
