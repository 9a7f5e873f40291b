//! Hand-off point between the reader side and whatever forwards records.
//!
//! The reader supervisor only knows it has somewhere to put a parsed record;
//! the device agent implements this to push records to the broker, tests use
//! a plain channel.

use std::future::Future;

use tokio::sync::mpsc;

use crate::record::MrzRecord;

/// Destination for parsed records.
///
/// `submit` resolves to `true` when the record was accepted for delivery.
/// The supervisor keeps its in-flight guard held until the future resolves,
/// so a slow sink naturally suppresses duplicate scans.
pub trait RecordSink: Send + Sync + 'static {
    fn submit(&self, record: MrzRecord) -> impl Future<Output = bool> + Send;
}

impl RecordSink for mpsc::Sender<MrzRecord> {
    async fn submit(&self, record: MrzRecord) -> bool {
        self.send(record).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (tx, mut rx) = mpsc::channel(1);
        let record = MrzRecord {
            last_name: "DOE".to_string(),
            ..Default::default()
        };

        assert!(tx.submit(record).await);
        assert_eq!(rx.recv().await.unwrap().last_name, "DOE");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!tx.submit(MrzRecord::default()).await);
    }
}
