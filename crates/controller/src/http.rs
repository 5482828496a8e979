//! Blocking HTTP calls moved off the scheduler thread.

use std::time::Duration;

use irrigation_core::LinkError;
use serde_json::Value;

pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn classify(e: ureq::Error) -> LinkError {
    match e {
        ureq::Error::Status(code, resp) => {
            LinkError::Rejected(format!("http {code} from {}", resp.get_url()))
        }
        ureq::Error::Transport(t) => LinkError::Transport(t.to_string()),
    }
}

/// GET `url` and return the body.
pub async fn get_text(agent: &ureq::Agent, url: String) -> Result<String, LinkError> {
    let agent = agent.clone();
    tokio::task::spawn_blocking(move || {
        agent
            .get(&url)
            .call()
            .map_err(classify)?
            .into_string()
            .map_err(|e| LinkError::Transport(format!("read body: {e}")))
    })
    .await
    .map_err(|e| LinkError::Transport(format!("http task: {e}")))?
}

/// POST `body` as JSON to `url` and return the response body.
pub async fn post_json(agent: &ureq::Agent, url: String, body: Value) -> Result<String, LinkError> {
    let agent = agent.clone();
    tokio::task::spawn_blocking(move || {
        agent
            .post(&url)
            .send_json(body)
            .map_err(classify)?
            .into_string()
            .map_err(|e| LinkError::Transport(format!("read body: {e}")))
    })
    .await
    .map_err(|e| LinkError::Transport(format!("http task: {e}")))?
}
