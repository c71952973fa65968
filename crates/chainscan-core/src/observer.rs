//! Observer boundary and the notifier that fans scan events out.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::ScanError;
use crate::types::{BlockHeader, TxExtractData};

/// Implemented by consumers of scan results (the wallet layer, exporters,
/// balance trackers).
#[async_trait]
pub trait Observer: Send + Sync {
    /// Called once per scanned block. After a rollback the scanner delivers
    /// its new position with `header.fork == true` so previously applied
    /// effects above it can be reversed.
    async fn on_new_block(&self, header: &BlockHeader) -> Result<(), ScanError>;

    /// Called once per (source key, transaction) with the extracted slice.
    async fn on_extract_data(&self, source_key: &str, data: &TxExtractData)
        -> Result<(), ScanError>;
}

/// Fans events out to every registered observer.
///
/// Delivery is independent per observer: all deliveries run, failures are
/// collected and returned, and the caller decides what to do with them
/// (the scanner converts them into unscan records so nothing is silently
/// lost).
#[derive(Default)]
pub struct Notifier {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for all subsequent notifications.
    pub fn register(&self, observer: Arc<dyn Observer>) {
        self.observers.write().unwrap().push(observer);
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    /// Deliver a block header to every observer; returns the failures.
    pub async fn notify_new_block(&self, header: &BlockHeader) -> Vec<ScanError> {
        let observers: Vec<Arc<dyn Observer>> = self.observers.read().unwrap().clone();
        let deliveries = observers.iter().map(|o| o.on_new_block(header));
        join_all(deliveries)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    /// Deliver extracted data to every observer; returns the failures.
    pub async fn notify_extract_data(
        &self,
        source_key: &str,
        data: &TxExtractData,
    ) -> Vec<ScanError> {
        let observers: Vec<Arc<dyn Observer>> = self.observers.read().unwrap().clone();
        let deliveries = observers.iter().map(|o| o.on_extract_data(source_key, data));
        join_all(deliveries)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    #[async_trait]
    impl Observer for Counting {
        async fn on_new_block(&self, _header: &BlockHeader) -> Result<(), ScanError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn on_extract_data(
            &self,
            _source_key: &str,
            _data: &TxExtractData,
        ) -> Result<(), ScanError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Observer for Failing {
        async fn on_new_block(&self, _header: &BlockHeader) -> Result<(), ScanError> {
            Err(ScanError::Notify {
                reason: "sink unavailable".into(),
            })
        }
        async fn on_extract_data(
            &self,
            _source_key: &str,
            _data: &TxExtractData,
        ) -> Result<(), ScanError> {
            Err(ScanError::Notify {
                reason: "sink unavailable".into(),
            })
        }
    }

    fn header() -> BlockHeader {
        BlockHeader {
            height: 1,
            hash: "0xa".into(),
            previous_hash: "0x0".into(),
            timestamp: 0,
            fork: false,
        }
    }

    #[tokio::test]
    async fn failing_observer_does_not_block_others() {
        let notifier = Notifier::new();
        let counting = Arc::new(Counting(AtomicU32::new(0)));
        notifier.register(Arc::new(Failing));
        notifier.register(counting.clone());

        let failures = notifier.notify_new_block(&header()).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(counting.0.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn no_observers_no_failures() {
        let notifier = Notifier::new();
        assert!(notifier.notify_new_block(&header()).await.is_empty());
        assert_eq!(notifier.observer_count(), 0);
    }
}
