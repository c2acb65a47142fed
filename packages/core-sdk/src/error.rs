use std::error::Error as StdError;

use thiserror::Error;

/**
 * \brief 传输层故障分类，用于在校验接口中区分超时与连接失败。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed")]
    Connect,
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportFault {
    fn from(err: reqwest::Error) -> Self {
        // 连接阶段超时同时满足 is_connect，按超时处理
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else {
            Self::Other(error_chain(&err))
        }
    }
}

/**
 * \brief 拼接错误及其全部 source，形如 "outer: inner: root"。
 */
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("builder error")]
    struct Outer(#[source] Middle);

    #[derive(Debug, Error)]
    #[error("invalid url")]
    struct Middle(#[source] std::io::Error);

    #[test]
    fn test_error_chain_includes_every_cause() {
        let err = Outer(Middle(std::io::Error::new(
            std::io::ErrorKind::Other,
            "relative URL without a base",
        )));
        assert_eq!(
            error_chain(&err),
            "builder error: invalid url: relative URL without a base"
        );
    }

    #[test]
    fn test_error_chain_single_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(error_chain(&err), "boom");
    }
}
