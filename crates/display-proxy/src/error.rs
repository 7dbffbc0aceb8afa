#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("service returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("response is not JSON: {0}")]
    Decode(String),
    #[error("bad service url {url}: {reason}")]
    Config { url: String, reason: String },
}

impl ProxyError {
    pub(crate) fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ProxyError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}
