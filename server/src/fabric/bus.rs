use tokio::sync::{broadcast, mpsc};

use super::{FabricTransport, TransportEvent};
use crate::error::FabricError;

/// In-process transport over a tokio broadcast channel.
///
/// Standalone nodes use it as a loopback; tests clone one bus into several nodes
/// to run a fleet inside a single process.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Vec<u8>>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl FabricTransport for LocalBus {
    fn publish(&self, frame: Vec<u8>) -> Result<(), FabricError> {
        // No subscribers is fine: nobody else is listening yet.
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, FabricError> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if out_tx.send(TransportEvent::Frame(frame)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Local bus subscriber lagged, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out_rx)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_each_frame() {
        let bus = LocalBus::new(8);
        let mut a = bus.subscribe().unwrap();
        let mut b = bus.subscribe().unwrap();
        bus.publish(vec![1, 2, 3]).unwrap();

        for rx in [&mut a, &mut b] {
            match rx.recv().await {
                Some(TransportEvent::Frame(frame)) => assert_eq!(frame, vec![1, 2, 3]),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers_succeeds() {
        assert!(LocalBus::new(1).publish(vec![0]).is_ok());
    }
}
