use crate::domain::ports::{SignalEvent, SignalPublisher};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub between signal producers (scanner, paper trader) and the
/// WebSocket fan-out. Publishing never blocks: if no consumer is attached
/// the event is dropped, which is the correct behavior for a live feed.
#[derive(Clone)]
pub struct SignalEventBus {
    tx: broadcast::Sender<SignalEvent>,
}

impl SignalEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SignalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalPublisher for SignalEventBus {
    fn publish(&self, event: SignalEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "signal event published"),
            Err(_) => debug!("signal event dropped, no subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{MarketType, Timeframe};
    use crate::domain::signal::{Direction, Signal};
    use rust_decimal_macros::dec;

    fn sample_signal() -> Signal {
        Signal::new(
            "BTCUSDT",
            Timeframe::FourHour,
            Direction::Long,
            dec!(50000),
            dec!(48500),
            dec!(53500),
            0.8,
            MarketType::CryptoSpot,
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = SignalEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SignalEvent::SignalCreated {
            signal: sample_signal(),
        });

        let event = rx.recv().await.unwrap();
        match event {
            SignalEvent::SignalCreated { signal } => assert_eq!(signal.symbol, "BTCUSDT"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = SignalEventBus::new();
        // Must not panic or block
        bus.publish(SignalEvent::SignalCreated {
            signal: sample_signal(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
