// Ledger events and the notification relay.
//
// Events are published only after the unit of work that produced them has
// committed. The relay is a separate subscriber; storage never calls it.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::settlement::executor::SettleOutcome;

/// Event channel capacity
const EVENT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    PledgeAccepted {
        pledge_id: Uuid,
        campaign_id: Uuid,
        backer_account_id: Uuid,
        creator_account_id: Uuid,
        #[serde(with = "rust_decimal::serde::float")]
        amount: Decimal,
    },
    CampaignSettled {
        campaign_id: Uuid,
        outcome: SettleOutcome,
        #[serde(with = "rust_decimal::serde::float")]
        amount: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LedgerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    /// Publish to current subscribers; having none is not an error
    pub fn publish(&self, event: LedgerEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!("📣 Ledger event delivered to {} subscribers", receivers),
            Err(_) => debug!("📣 Ledger event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }
}

/// Consumes ledger events on behalf of the notification collaborator
pub struct NotificationRelay {
    rx: broadcast::Receiver<LedgerEvent>,
}

impl NotificationRelay {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            rx: bus.subscribe(),
        }
    }

    /// Run until the bus is dropped
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.rx.recv().await {
                    Ok(event) => Self::notify(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("⚠️ Notification relay lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Notification relay stopped");
                        break;
                    }
                }
            }
        })
    }

    fn notify(event: &LedgerEvent) {
        match event {
            LedgerEvent::PledgeAccepted {
                pledge_id,
                campaign_id,
                creator_account_id,
                amount,
                ..
            } => info!(
                "📧 Notify creator {}: pledge {} of {} on campaign {}",
                creator_account_id, pledge_id, amount, campaign_id
            ),
            LedgerEvent::CampaignSettled {
                campaign_id,
                outcome,
                amount,
            } => info!(
                "📧 Notify backers of campaign {}: {:?} ({})",
                campaign_id, outcome, amount
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(LedgerEvent::CampaignSettled {
            campaign_id: Uuid::new_v4(),
            outcome: SettleOutcome::Noop,
            amount: dec!(0),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let campaign_id = Uuid::new_v4();

        bus.publish(LedgerEvent::CampaignSettled {
            campaign_id,
            outcome: SettleOutcome::Released,
            amount: dec!(600),
        });

        match rx.recv().await.unwrap() {
            LedgerEvent::CampaignSettled {
                campaign_id: got,
                outcome,
                amount,
            } => {
                assert_eq!(got, campaign_id);
                assert_eq!(outcome, SettleOutcome::Released);
                assert_eq!(amount, dec!(600));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
