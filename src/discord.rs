//! Discord webhook notifications for pipeline runs.

use serde::Serialize;
use tracing::{error, info};

use crate::error::ZonesError;
use crate::pipeline::{RunReport, RunStatus, SecondaryLeg};

const USERNAME: &str = "No-Swim Zones";
const COLOR_SUCCESS: u32 = 0x00FF00;
const COLOR_FAILURE: u32 = 0xFF0000;

#[derive(Serialize, Debug)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
}

#[derive(Serialize, Debug)]
struct DiscordPayload {
    username: String,
    embeds: Vec<DiscordEmbed>,
}

pub struct DiscordWebhook {
    url: String,
    client: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    /// Post the outcome of a run. Failures are logged, never propagated.
    pub async fn notify_run(&self, outcome: &Result<RunReport, ZonesError>) {
        let (title, description, success) = describe_outcome(outcome);
        if let Err(e) = self.send(&title, &description, success).await {
            error!("Failed to send Discord notification: {}", e);
        }
    }

    async fn send(&self, title: &str, description: &str, success: bool) -> anyhow::Result<()> {
        let payload = DiscordPayload {
            username: USERNAME.to_string(),
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: description.to_string(),
                color: if success { COLOR_SUCCESS } else { COLOR_FAILURE },
                timestamp: chrono::Utc::now().to_rfc3339(),
            }],
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Discord notification failed: {}", error_text);
        }

        info!("Sent Discord notification: {}", title);
        Ok(())
    }
}

fn describe_outcome(outcome: &Result<RunReport, ZonesError>) -> (String, String, bool) {
    match outcome {
        Ok(report) => {
            let title = match report.status {
                RunStatus::Updated => "No-swim zones updated",
                RunStatus::Unchanged => "No-swim zones unchanged",
                RunStatus::Empty => "No-swim zones empty",
            };

            let mut lines = vec![format!(
                "Facilities: {} seen, {} skipped, {} inland",
                report.facilities_seen, report.facilities_skipped, report.facilities_inland
            )];
            if let Some(count) = report.zone_count {
                lines.push(format!("Zones: {}", count));
            }
            lines.push(format!("KML: {}", secondary_summary(&report.secondary)));
            lines.push(format!("Digest: `{}`", report.source_digest));

            (title.to_string(), lines.join("\n"), true)
        }
        Err(e) => (
            format!("No-swim zone run failed ({})", e.label()),
            e.to_string(),
            false,
        ),
    }
}

fn secondary_summary(leg: &SecondaryLeg) -> String {
    match leg {
        SecondaryLeg::Published { receipt } => match &receipt.web_link {
            Some(link) => format!("published ({})", link),
            None => "published".to_string(),
        },
        SecondaryLeg::UpToDate => "up to date".to_string(),
        SecondaryLeg::Failed { error } => format!("failed: {}", error),
        SecondaryLeg::NotConfigured => "not configured".to_string(),
        SecondaryLeg::MissingPrimary => "no primary artifact".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;

    fn report(status: RunStatus) -> RunReport {
        RunReport {
            status,
            source_digest: "abc".to_string(),
            facilities_seen: 4,
            facilities_skipped: 1,
            facilities_inland: 1,
            zone_count: Some(2),
            primary: None,
            secondary: SecondaryLeg::NotConfigured,
            skipped: vec![],
        }
    }

    #[test]
    fn test_success_embed() {
        let (title, description, success) = describe_outcome(&Ok(report(RunStatus::Updated)));
        assert!(success);
        assert_eq!(title, "No-swim zones updated");
        assert!(description.contains("4 seen, 1 skipped"));
        assert!(description.contains("Zones: 2"));
    }

    #[test]
    fn test_failure_embed() {
        let outcome = Err(ZonesError::Fetch(FetchError::Status {
            url: "http://upstream".to_string(),
            status: 502,
        }));
        let (title, description, success) = describe_outcome(&outcome);
        assert!(!success);
        assert!(title.contains("fetch_failed"));
        assert!(description.contains("502"));
    }
}
