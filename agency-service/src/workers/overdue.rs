use crate::services::DocumentService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically moves pending invoices past their due date to overdue.
pub struct OverdueSweeper {
    service: Arc<DocumentService>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl OverdueSweeper {
    pub fn new(service: Arc<DocumentService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the sweep loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run one sweep per interval, the first one immediately.
    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting overdue sweeper"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Overdue sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.service.mark_overdue(None).await {
                            Ok(marked) => {
                                tracing::debug!(marked = marked, "Overdue sweep finished");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Overdue sweep failed");
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientSnapshot, CreateDocument, DocumentKind, InvoiceStatus};
    use crate::numbering::SequenceAllocator;
    use crate::services::{FixedClock, MemoryStore};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn sweeper_marks_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at_date(
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
        ));
        let service = Arc::new(DocumentService::new(
            store.clone(),
            Arc::new(SequenceAllocator::new(store)),
            clock,
        ));

        let invoice = service
            .create_document(
                DocumentKind::Invoice,
                CreateDocument {
                    client: Some(ClientSnapshot {
                        name: "Acme".to_string(),
                        email: None,
                        phone: None,
                        address: None,
                        tax_id: None,
                    }),
                    issue_date: NaiveDate::from_ymd_opt(2026, 3, 1),
                    due_date: NaiveDate::from_ymd_opt(2026, 3, 15),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let sweeper = OverdueSweeper::new(service.clone(), Duration::from_millis(10));
        let token = sweeper.shutdown_token();
        let handle = sweeper.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap();

        let invoice = service
            .get_document(DocumentKind::Invoice, invoice.document_id)
            .await
            .unwrap();
        assert_eq!(invoice.invoice_status(), Some(InvoiceStatus::Overdue));
    }
}
