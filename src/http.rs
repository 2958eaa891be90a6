//! Shared `ureq` plumbing for the HTTP collaborators (Spotify, Last.fm).

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use ureq::{Agent, AgentBuilder, Request};

const USER_AGENT: &str = concat!("kindred/", env!("CARGO_PKG_VERSION"));

/// Build the blocking agent used by one service client.
#[must_use]
pub fn agent(timeout: Duration) -> Agent {
    AgentBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Map a `ureq` failure onto the crate error taxonomy.
///
/// 404 becomes [`Error::NotFound`], 429 becomes [`Error::Throttled`] with the
/// `Retry-After` hint when the server sent one, 5xx and transport failures
/// become [`Error::Transient`]. Other 4xx answers are caller mistakes and are
/// reported as [`Error::Malformed`].
pub fn classify(service: &'static str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(404, response) => Error::NotFound(response.get_url().to_string()),
        ureq::Error::Status(429, response) => Error::Throttled {
            service,
            retry_after: response
                .header("Retry-After")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        ureq::Error::Status(code, _) if code >= 500 => {
            Error::Transient(format!("{service} answered HTTP {code}"))
        }
        ureq::Error::Status(code, response) => Error::Malformed {
            service,
            message: format!("HTTP {code} for {}", response.get_url()),
        },
        ureq::Error::Transport(transport) => Error::Transient(format!("{service}: {transport}")),
    }
}

/// Send a request without a body and decode the JSON answer.
pub fn call_json<T: DeserializeOwned>(service: &'static str, request: Request) -> Result<T> {
    let response = request.call().map_err(|e| classify(service, e))?;
    response.into_json::<T>().map_err(|e| Error::Malformed {
        service,
        message: e.to_string(),
    })
}

/// Send a JSON body, ignoring the answer's content.
pub fn send_json(service: &'static str, request: Request, body: &serde_json::Value) -> Result<()> {
    request
        .send_json(body)
        .map(|_| ())
        .map_err(|e| classify(service, e))
}
