//! Concrete provider adapters
//!
//! Implementations of the core STT/LLM/TTS contracts against external
//! HTTP services. The dialog pipeline only sees the traits; these
//! adapters are wired in by the server binary.

mod llm;
mod stt;
mod tts;

pub use llm::SseLlm;
pub use stt::ChunkedHttpStt;
pub use tts::HttpTts;

use voiceline_core::Error;

/// Map an HTTP status to the error taxonomy.
///
/// Authentication and quota statuses are fatal for the session; anything
/// else is a transient provider failure.
pub(crate) fn classify_status(
    component: &'static str,
    status: reqwest::StatusCode,
    body: String,
) -> Error {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            Error::fatal(component, format!("HTTP {status}: {body}"))
        }
        _ => Error::transient(component, format!("HTTP {status}: {body}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceline_core::ErrorKind;

    #[test]
    fn auth_and_quota_statuses_are_fatal() {
        let fatal = classify_status("llm", reqwest::StatusCode::UNAUTHORIZED, String::new());
        assert_eq!(fatal.kind(), ErrorKind::ProviderFatal);

        let quota = classify_status("llm", reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert_eq!(quota.kind(), ErrorKind::ProviderFatal);

        let transient = classify_status("llm", reqwest::StatusCode::BAD_GATEWAY, String::new());
        assert_eq!(transient.kind(), ErrorKind::ProviderTransient);
    }
}
