use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::Level;

use crate::cache::{EventCache, Loaded};
use crate::error::PipelineError;
use crate::formatter::format_event;
use crate::report::Reporter;
use crate::slack::Notifier;
use crate::tenable::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetching,
    LoadingCache,
    Dispatching,
    Persisting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::LoadingCache => "loading cache",
            Stage::Dispatching => "dispatching",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-run counters. A run succeeds whatever these say.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub not_allowed: usize,
    pub already_delivered: usize,
    pub unformatted: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Pipeline<'a, S, N, R> {
    pub source: &'a S,
    pub notifier: &'a N,
    pub cache: &'a EventCache,
    pub allow_list: &'a HashSet<String>,
    pub reporter: &'a R,
}

impl<'a, S, N, R> Pipeline<'a, S, N, R>
where
    S: EventSource + Sync,
    N: Notifier + Sync,
    R: Reporter,
{
    /// Runs fetch, filter, dispatch and persist once.
    ///
    /// `today` bounds the audit query, `now` stamps the cache. An id is
    /// recorded only after its notification was accepted by the webhook.
    pub async fn run(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<RunSummary, PipelineError> {
        self.enter(Stage::Fetching);
        let events = self.source.fetch(today).await?;

        self.enter(Stage::LoadingCache);
        let known = match self.cache.load(now).map_err(PipelineError::CacheLoad)? {
            Loaded::Missing => {
                self.reporter.report(Level::INFO, "No event cache found, starting a new one");
                HashSet::new()
            }
            Loaded::Stale { last_written, reset_error } => {
                self.reporter.report(
                    Level::INFO,
                    &format!("Event cache last written {} is stale, starting a new one", last_written),
                );
                if let Some(err) = reset_error {
                    self.reporter.report(
                        Level::WARN,
                        &format!("Unable to reset stale event cache {}: {}", self.cache.path().display(), err),
                    );
                }
                HashSet::new()
            }
            Loaded::Fresh { ids, last_written } => {
                self.reporter.report(
                    Level::INFO,
                    &format!("{} events already delivered, cache last written {}", ids.len(), last_written),
                );
                ids
            }
        };

        if self.allow_list.is_empty() {
            self.reporter.report(Level::WARN, "No event types are enabled, nothing will be delivered");
        }

        self.enter(Stage::Dispatching);
        let mut summary = RunSummary { fetched: events.len(), ..Default::default() };
        let mut delivered: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for event in &events {
            if !self.allow_list.contains(&event.action) {
                summary.not_allowed += 1;
                continue;
            }

            if known.contains(&event.id) || !seen.insert(event.id.as_str()) {
                summary.already_delivered += 1;
                continue;
            }

            let text = format_event(event);
            if text.is_empty() {
                summary.unformatted += 1;
                self.reporter.report(
                    Level::WARN,
                    &format!("No message defined for action {} (event {}), skipping", event.kind(), event.id),
                );
                continue;
            }

            self.reporter.report(Level::INFO, &format!("Message being sent to Slack: {}", text));
            match self.notifier.deliver(&text).await {
                Ok(()) => delivered.push(event.id.clone()),
                Err(err) => {
                    summary.failed += 1;
                    self.reporter.report(
                        Level::ERROR,
                        &format!("Unable to deliver event {}, it will be retried next run: {}", event.id, err),
                    );
                }
            }
        }
        summary.delivered = delivered.len();

        self.enter(Stage::Persisting);
        self.cache
            .append(&delivered, now)
            .map_err(|source| PipelineError::CacheWrite { delivered: delivered.len(), source })?;

        self.enter(Stage::Done);
        self.reporter.report(
            Level::INFO,
            &format!(
                "Run complete: {} fetched, {} delivered, {} failed, {} already delivered, {} not enabled, {} without message",
                summary.fetched,
                summary.delivered,
                summary.failed,
                summary.already_delivered,
                summary.not_allowed,
                summary.unformatted
            ),
        );

        Ok(summary)
    }

    fn enter(&self, stage: Stage) {
        self.reporter.report(Level::DEBUG, &format!("Pipeline stage: {}", stage));
    }
}
