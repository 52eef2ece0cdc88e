// src/services/notifier.rs

//! Outbound notification channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, NotifyConfig};
use crate::utils::http::create_async_client;

/// One item line inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEntry {
    pub name: String,
    pub value: String,
}

impl NotificationEntry {
    pub fn char_len(&self) -> usize {
        grapheme_len(&self.name) + grapheme_len(&self.value)
    }
}

/// One delivery unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationBatch {
    pub title: String,
    pub description: String,
    pub entries: Vec<NotificationEntry>,
}

impl NotificationBatch {
    /// Serialized size in user-perceived characters.
    pub fn char_len(&self) -> usize {
        grapheme_len(&self.title)
            + grapheme_len(&self.description)
            + self.entries.iter().map(NotificationEntry::char_len).sum::<usize>()
    }

    /// Plain-text rendering.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n{}\n", self.title, self.description);
        for entry in &self.entries {
            out.push_str(&format!("\n{}\n{}\n", entry.name, entry.value));
        }
        out
    }
}

pub(crate) fn grapheme_len(text: &str) -> usize {
    text.graphemes(true).count()
}

/// Delivery target for matched results and the new-arrivals broadcast.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver_to_owner(&self, owner: &str, batches: &[NotificationBatch]) -> Result<()>;

    async fn deliver_to_broadcast(&self, batches: &[NotificationBatch]) -> Result<()>;
}

/// Writes batches to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver_to_owner(&self, owner: &str, batches: &[NotificationBatch]) -> Result<()> {
        for (i, batch) in batches.iter().enumerate() {
            log::info!(
                "[{owner}] batch {}/{}:\n{}",
                i + 1,
                batches.len(),
                batch.render()
            );
        }
        Ok(())
    }

    async fn deliver_to_broadcast(&self, batches: &[NotificationBatch]) -> Result<()> {
        for batch in batches {
            log::info!("[broadcast]\n{}", batch.render());
        }
        Ok(())
    }
}

/// POSTs each batch as JSON to configured webhooks.
pub struct WebhookNotifier {
    client: Client,
    owner_url: Option<String>,
    broadcast_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(crawler: &CrawlerConfig, notify: &NotifyConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(crawler)?,
            owner_url: notify.owner_webhook_url.clone(),
            broadcast_url: notify.broadcast_webhook_url.clone(),
        })
    }

    fn owner_url(&self, owner: &str) -> Option<String> {
        self.owner_url
            .as_ref()
            .map(|template| template.replace("{owner}", owner))
    }

    async fn post_all(&self, target: &str, url: &str, batches: &[NotificationBatch]) -> Result<()> {
        for batch in batches {
            let response = self
                .client
                .post(url)
                .json(batch)
                .send()
                .await
                .map_err(|e| AppError::delivery(target, e))?;
            if !response.status().is_success() {
                return Err(AppError::delivery(
                    target,
                    format!("webhook returned {}", response.status()),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver_to_owner(&self, owner: &str, batches: &[NotificationBatch]) -> Result<()> {
        let url = self
            .owner_url(owner)
            .ok_or_else(|| AppError::delivery(owner, "no owner webhook configured"))?;
        self.post_all(owner, &url, batches).await
    }

    async fn deliver_to_broadcast(&self, batches: &[NotificationBatch]) -> Result<()> {
        match &self.broadcast_url {
            Some(url) => self.post_all("broadcast", url, batches).await,
            None => {
                log::debug!("No broadcast webhook configured, skipping broadcast");
                Ok(())
            }
        }
    }
}

/// Webhook delivery when any webhook is configured, log output otherwise.
pub fn notifier_from_config(
    crawler: &CrawlerConfig,
    notify: &NotifyConfig,
) -> Result<Box<dyn Notifier>> {
    if notify.owner_webhook_url.is_some() || notify.broadcast_webhook_url.is_some() {
        Ok(Box::new(WebhookNotifier::new(crawler, notify)?))
    } else {
        Ok(Box::new(LogNotifier))
    }
}
