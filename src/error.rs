use std::fmt;

#[derive(Debug)]
#[allow(dead_code)]
pub enum ShadowProxyError {
    Config(String),
    InvalidPattern(String),
    SinkInit(String),
    Upstream(String),
    Internal(String),
}

impl fmt::Display for ShadowProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShadowProxyError::Config(msg) => write!(f, "config error: {}", msg),
            ShadowProxyError::InvalidPattern(msg) => write!(f, "invalid route pattern: {}", msg),
            ShadowProxyError::SinkInit(msg) => write!(f, "sink init error: {}", msg),
            ShadowProxyError::Upstream(msg) => write!(f, "upstream error: {}", msg),
            ShadowProxyError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ShadowProxyError {}
