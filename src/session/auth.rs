//! Default request headers for the session client, including optional HTTP
//! basic credentials.

use crate::session::options::SessionOptions;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};

pub(crate) fn build_default_headers(options: &SessionOptions) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    let agent =
        HeaderValue::from_str(options.user_agent.trim()).context("invalid User-Agent header")?;
    headers.insert(USER_AGENT, agent);

    if let Some(credentials) = &options.credentials {
        let encoded = BASE64_STANDARD.encode(format!(
            "{}:{}",
            credentials.user, credentials.password
        ));
        let value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .context("failed to build Authorization header")?;
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}
