use reqwest::blocking::Client;
use std::error::Error;

use crate::config::NtfyConfig;

/// Sends a POST request to the specified API endpoint with a given body.
fn post_api(url: &str, body: &str, auth: Option<(&str, &str)>) -> Result<(), Box<dyn Error>> {
    let client = Client::new();
    let mut request = client.post(url).body(body.to_string());

    if let Some((username, password)) = auth {
        request = request.basic_auth(username, Some(password));
    }

    let response = request.send()?.error_for_status()?;

    log::info!("NTFY POST {} => {}", url, response.status());
    Ok(())
}

impl NtfyConfig {
    pub fn url(&self) -> String {
        format!("{}/{}", self.host.trim_end_matches('/'), self.topic)
    }

    /// Sends a message to the configured `ntfy.sh` topic.
    pub fn send_notification(&self, message: &str) -> Result<(), Box<dyn Error>> {
        let auth = match (&self.user, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            (Some(user), None) => Some((user.as_str(), "")),
            _ => None,
        };
        post_api(&self.url(), message, auth)
    }
}

/// Message announcing a failed pod backup.
pub fn failure_message(pod_id: &str) -> String {
    format!("🚨 Backup failed for {pod_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_url() {
        let conf = NtfyConfig {
            host: "https://ntfy.example.org/".to_string(),
            topic: "backups".to_string(),
            user: None,
            password: None,
        };
        assert_eq!(conf.url(), "https://ntfy.example.org/backups");
        assert_eq!(
            failure_message("paas-staging/custapi"),
            "🚨 Backup failed for paas-staging/custapi"
        );
    }
}
