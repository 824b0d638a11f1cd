use thiserror::Error;

/// Coarse failure family; the HTTP layer maps each one to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientInput,
    Engine,
    Extraction,
    Internal,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("multipart parse error: {0}")]
    MultipartParse(String),

    #[error("multipart request is missing the screenshot_file attachment")]
    MissingAttachment,

    #[error("engine run failed after fallbacks: {0}")]
    EngineUnavailable(String),

    #[error("model output has no JSON object")]
    NoJsonObject,

    #[error("invalid JSON from model: {0}")]
    MalformedJson(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBody(_) => "invalid_request_body",
            Self::MultipartParse(_) => "multipart_parse_error",
            Self::MissingAttachment => "missing_screenshot_file",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::NoJsonObject => "no_json_object",
            Self::MalformedJson(_) => "malformed_json",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidBody(_) | Self::MultipartParse(_) | Self::MissingAttachment => {
                ErrorClass::ClientInput
            }
            Self::EngineUnavailable(_) => ErrorClass::Engine,
            Self::NoJsonObject | Self::MalformedJson(_) => ErrorClass::Extraction,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
