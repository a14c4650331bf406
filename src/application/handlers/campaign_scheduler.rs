use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    application::{handlers::stop_requested, services::event_bus::MessageBus},
    domain::repositories::{CampaignRepository, OutboundMessageRepository},
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Pending messages fetched per page while queueing a campaign.
    pub page_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerTickReport {
    pub campaigns_claimed: usize,
    pub messages_queued: usize,
    pub publish_failures: usize,
}

/// Periodically claims due campaigns and queues their pending messages.
pub struct CampaignScheduler {
    campaigns: Arc<dyn CampaignRepository>,
    messages: Arc<dyn OutboundMessageRepository>,
    bus: Arc<dyn MessageBus>,
    config: SchedulerConfig,
    stop: watch::Sender<bool>,
}

impl CampaignScheduler {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        messages: Arc<dyn OutboundMessageRepository>,
        bus: Arc<dyn MessageBus>,
        config: SchedulerConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            campaigns,
            messages,
            bus,
            config,
            stop,
        }
    }

    pub async fn run(&self) {
        let mut stop = self.stop.subscribe();
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "starting scheduler"
        );

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = stop_requested(&mut stop) => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("stopping scheduler");
    }

    /// Runs until `shutdown` flips to `true`. A tick in progress completes.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        tokio::join!(self.run(), async {
            stop_requested(&mut shutdown).await;
            self.stop();
        });
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub async fn tick(&self) -> SchedulerTickReport {
        let mut report = SchedulerTickReport::default();

        let campaigns = match self.campaigns.claim_ready_campaigns().await {
            Ok(campaigns) => campaigns,
            Err(err) => {
                error!(error = %err, "failed to claim ready campaigns");
                return report;
            }
        };
        if campaigns.is_empty() {
            debug!("no campaigns ready to send");
            return report;
        }

        info!(count = campaigns.len(), "found campaigns ready to send");
        report.campaigns_claimed = campaigns.len();

        for campaign in campaigns {
            let (queued, failed) = self.queue_campaign(campaign.id).await;
            report.messages_queued += queued;
            report.publish_failures += failed;
        }

        report
    }

    async fn queue_campaign(&self, campaign_id: i64) -> (usize, usize) {
        info!(campaign_id, "processing scheduled campaign");

        let mut queued = 0;
        let mut failed = 0;
        let mut after_id = 0;

        loop {
            let page = match self
                .messages
                .get_pending_for_campaign(campaign_id, after_id, self.config.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    error!(campaign_id, error = %err, "failed to fetch pending messages");
                    if queued == 0 && failed == 0 {
                        self.release(campaign_id).await;
                    } else {
                        warn!(
                            campaign_id,
                            queued,
                            "campaign partly queued, remaining pending messages need a resend"
                        );
                    }
                    break;
                }
            };

            for message in &page {
                match self.bus.publish(message.id).await {
                    Ok(()) => queued += 1,
                    Err(err) => {
                        error!(outbound_message_id = message.id, error = %err, "failed to publish message");
                        failed += 1;
                    }
                }
            }

            match page.last() {
                Some(last) if (page.len() as i64) >= self.config.page_size => after_id = last.id,
                _ => break,
            }
        }

        info!(campaign_id, queued, failed, "campaign processing complete");
        (queued, failed)
    }

    /// Nothing was published for the campaign, so the next tick can claim it
    /// again without queueing any message twice.
    async fn release(&self, campaign_id: i64) {
        match self.campaigns.release_claim(campaign_id).await {
            Ok(()) => info!(campaign_id, "released campaign claim for a later tick"),
            Err(err) => error!(campaign_id, error = %err, "failed to release campaign claim"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::{
        domain::models::{
            Campaign, CampaignStatus, OutboundMessage, OutboundMessageDetails,
            OutboundMessageUpdate,
        },
        infrastructure::repositories::in_memory::InMemoryStore,
    };

    #[derive(Default)]
    struct RecordingBus {
        fail_ids: HashSet<i64>,
        published: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, outbound_message_id: i64) -> anyhow::Result<()> {
            if self.fail_ids.contains(&outbound_message_id) {
                anyhow::bail!("broker unavailable");
            }
            self.published.lock().unwrap().push(outbound_message_id);
            Ok(())
        }
    }

    /// Fails the first `failures` page fetches, then defers to the store.
    struct FlakyPages {
        store: InMemoryStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl OutboundMessageRepository for FlakyPages {
        async fn create_batch(
            &self,
            campaign_id: i64,
            customer_ids: &[i64],
            rendered_content: &str,
        ) -> anyhow::Result<Vec<OutboundMessage>> {
            self.store
                .create_batch(campaign_id, customer_ids, rendered_content)
                .await
        }

        async fn get_pending_for_campaign(
            &self,
            campaign_id: i64,
            after_id: i64,
            limit: i64,
        ) -> anyhow::Result<Vec<OutboundMessage>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("connection reset");
            }
            self.store
                .get_pending_for_campaign(campaign_id, after_id, limit)
                .await
        }

        async fn get_with_details(&self, id: i64) -> anyhow::Result<Option<OutboundMessageDetails>> {
            self.store.get_with_details(id).await
        }

        async fn update_with_retry(
            &self,
            update: OutboundMessageUpdate,
        ) -> anyhow::Result<OutboundMessage> {
            self.store.update_with_retry(update).await
        }
    }

    fn scheduled(id: i64, minutes_from_now: i64) -> Campaign {
        Campaign {
            id,
            name: format!("campaign {id}"),
            channel: "sms".to_string(),
            base_template: "Hi {first_name}".to_string(),
            scheduled_at: Some(Utc::now() + ChronoDuration::minutes(minutes_from_now)),
            status: CampaignStatus::Scheduled,
            created_at: Utc::now(),
        }
    }

    fn scheduler(store: &InMemoryStore, bus: Arc<RecordingBus>, page_size: i64) -> CampaignScheduler {
        CampaignScheduler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            bus,
            SchedulerConfig {
                interval: Duration::from_millis(10),
                page_size,
            },
        )
    }

    #[tokio::test]
    async fn queues_every_pending_message_across_pages() {
        let store = InMemoryStore::new();
        store.insert_campaign(scheduled(1, -1)).await;
        store.insert_campaign(scheduled(2, 60)).await;
        let customers: Vec<i64> = (1..=7).collect();
        let created = store.create_batch(1, &customers, "Hi").await.unwrap();
        store.create_batch(2, &[1], "Later").await.unwrap();
        let bus = Arc::new(RecordingBus::default());

        let report = scheduler(&store, bus.clone(), 3).tick().await;

        assert_eq!(
            report,
            SchedulerTickReport {
                campaigns_claimed: 1,
                messages_queued: 7,
                publish_failures: 0,
            }
        );
        let expected: Vec<i64> = created.iter().map(|m| m.id).collect();
        assert_eq!(*bus.published.lock().unwrap(), expected);
        let campaign = store.get(1).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Sending);
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_the_rest() {
        let store = InMemoryStore::new();
        store.insert_campaign(scheduled(1, -5)).await;
        store.insert_campaign(scheduled(2, -5)).await;
        let first = store.create_batch(1, &[1, 2, 3], "Hi").await.unwrap();
        let second = store.create_batch(2, &[4], "Hi").await.unwrap();
        let bus = Arc::new(RecordingBus {
            fail_ids: HashSet::from([first[1].id]),
            ..Default::default()
        });

        let report = scheduler(&store, bus.clone(), 100).tick().await;

        assert_eq!(report.campaigns_claimed, 2);
        assert_eq!(report.messages_queued, 3);
        assert_eq!(report.publish_failures, 1);
        assert_eq!(
            *bus.published.lock().unwrap(),
            vec![first[0].id, first[2].id, second[0].id]
        );
    }

    #[tokio::test]
    async fn concurrent_schedulers_claim_a_campaign_once() {
        let store = InMemoryStore::new();
        store.insert_campaign(scheduled(1, -1)).await;
        store.create_batch(1, &[1, 2], "Hi").await.unwrap();
        let bus = Arc::new(RecordingBus::default());
        let a = scheduler(&store, bus.clone(), 100);
        let b = scheduler(&store, bus.clone(), 100);

        let (ra, rb) = tokio::join!(a.tick(), b.tick());

        assert_eq!(ra.campaigns_claimed + rb.campaigns_claimed, 1);
        assert_eq!(bus.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_ticks_until_stopped() {
        let store = InMemoryStore::new();
        store.insert_campaign(scheduled(1, -1)).await;
        store.create_batch(1, &[1], "Hi").await.unwrap();
        let bus = Arc::new(RecordingBus::default());
        let scheduler = Arc::new(scheduler(&store, bus.clone(), 100));

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
        assert_eq!(bus.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_page_fetch_releases_the_claim_for_the_next_tick() {
        let store = InMemoryStore::new();
        store.insert_campaign(scheduled(1, -1)).await;
        let created = store.create_batch(1, &[1, 2, 3], "Hi").await.unwrap();
        let bus = Arc::new(RecordingBus::default());
        let scheduler = CampaignScheduler::new(
            Arc::new(store.clone()),
            Arc::new(FlakyPages {
                store: store.clone(),
                failures: AtomicUsize::new(1),
            }),
            bus.clone(),
            SchedulerConfig {
                interval: Duration::from_millis(10),
                page_size: 100,
            },
        );

        let first = scheduler.tick().await;
        assert_eq!(first.campaigns_claimed, 1);
        assert_eq!(first.messages_queued, 0);
        assert_eq!(
            store.get(1).await.unwrap().unwrap().status,
            CampaignStatus::Scheduled
        );

        let second = scheduler.tick().await;
        assert_eq!(second.campaigns_claimed, 1);
        assert_eq!(second.messages_queued, 3);
        let expected: Vec<i64> = created.iter().map(|m| m.id).collect();
        assert_eq!(*bus.published.lock().unwrap(), expected);
        assert_eq!(
            store.get(1).await.unwrap().unwrap().status,
            CampaignStatus::Sending
        );
    }

    #[tokio::test]
    async fn run_until_follows_the_shared_shutdown_signal() {
        let store = InMemoryStore::new();
        let bus = Arc::new(RecordingBus::default());
        let scheduler = scheduler(&store, bus, 100);
        let (tx, rx) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send_replace(true);
        };
        let (finished, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(5), scheduler.run_until(rx)),
            stopper
        );

        assert!(finished.is_ok());
    }
}
