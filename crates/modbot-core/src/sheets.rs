//! Quote spreadsheet mirror.
//!
//! Exports run on one supervised worker: requests are coalesced, retried
//! with a ceiling and reported on the task report channel. Imports run
//! inline for the moderator that asked for them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    retry::RetryPolicy,
    storage::{Quote, Store},
    tasks::{run_with_retry, ReportSender},
    Result,
};

/// Rows cleared after the last quote so deletions do not leave stale tails.
pub const EXPORT_PADDING_ROWS: usize = 10;
/// First data row; row 1 holds the header.
pub const FIRST_DATA_ROW: usize = 2;

/// Access to a spreadsheet service (Google Sheets today).
#[async_trait]
pub trait SpreadsheetPort: Send + Sync {
    /// Overwrite `rows` starting at column A of `start_row` (1-based).
    async fn write_rows(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        start_row: usize,
        rows: Vec<Vec<String>>,
    ) -> Result<()>;

    /// Read one column from `start_row` down to the end of the data.
    async fn read_column(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        column: char,
        start_row: usize,
    ) -> Result<Vec<String>>;
}

#[derive(Clone, Debug)]
pub struct QuoteSheet {
    pub spreadsheet_id: String,
    pub worksheet: String,
}

/// `[position, text]` rows for every quote, then blank padding rows.
pub fn quote_rows(quotes: &[Quote]) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = quotes
        .iter()
        .enumerate()
        .map(|(idx, q)| vec![(idx + 1).to_string(), q.text.clone()])
        .collect();
    rows.extend((0..EXPORT_PADDING_ROWS).map(|_| vec![String::new(), String::new()]));
    rows
}

/// Quote texts read from the sheet, up to the first empty cell.
pub fn leading_non_empty(cells: Vec<String>) -> Vec<String> {
    cells
        .into_iter()
        .map(|c| c.trim().to_string())
        .take_while(|c| !c.is_empty())
        .collect()
}

pub async fn export_quotes(
    port: &dyn SpreadsheetPort,
    sheet: &QuoteSheet,
    store: &Store,
) -> Result<usize> {
    let quotes = store.list_quotes()?;
    let count = quotes.len();
    port.write_rows(
        &sheet.spreadsheet_id,
        &sheet.worksheet,
        FIRST_DATA_ROW,
        quote_rows(&quotes),
    )
    .await?;
    tracing::info!(quotes = count, "exported quotes to spreadsheet");
    Ok(count)
}

/// Replace every stored quote with the sheet's column B.
pub async fn import_quotes(
    port: &dyn SpreadsheetPort,
    sheet: &QuoteSheet,
    store: &Store,
) -> Result<usize> {
    let cells = port
        .read_column(&sheet.spreadsheet_id, &sheet.worksheet, 'B', FIRST_DATA_ROW)
        .await?;
    let texts = leading_non_empty(cells);
    let count = store.replace_quotes(&texts)?;
    tracing::info!(quotes = count, "imported quotes from spreadsheet");
    Ok(count)
}

struct ExportRequest;

/// Handle for requesting spreadsheet exports.
#[derive(Clone)]
pub struct SheetSync {
    port: Arc<dyn SpreadsheetPort>,
    sheet: QuoteSheet,
    tx: mpsc::UnboundedSender<ExportRequest>,
}

impl SheetSync {
    /// Start the export worker. It stops when `cancel` fires or every handle is dropped.
    pub fn spawn(
        port: Arc<dyn SpreadsheetPort>,
        sheet: QuoteSheet,
        store: Store,
        policy: RetryPolicy,
        reports: ReportSender,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = export_worker(port.clone(), sheet.clone(), store, policy, reports, rx, cancel);
        let handle = tokio::spawn(worker);
        (Self { port, sheet, tx }, handle)
    }

    pub fn request_export(&self) {
        if self.tx.send(ExportRequest).is_err() {
            tracing::warn!("spreadsheet worker is gone; export request dropped");
        }
    }

    pub async fn import(&self, store: &Store) -> Result<usize> {
        import_quotes(self.port.as_ref(), &self.sheet, store).await
    }
}

async fn export_worker(
    port: Arc<dyn SpreadsheetPort>,
    sheet: QuoteSheet,
    store: Store,
    policy: RetryPolicy,
    reports: ReportSender,
    mut rx: mpsc::UnboundedReceiver<ExportRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            req = rx.recv() => {
                if req.is_none() {
                    break;
                }
            }
        }

        // One export covers every request queued so far.
        let mut coalesced = 0usize;
        while rx.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            tracing::debug!(coalesced, "coalesced spreadsheet export requests");
        }

        let report = run_with_retry("quote spreadsheet export", policy, &cancel, || {
            export_quotes(port.as_ref(), &sheet, &store)
        })
        .await;

        if reports.send(report).is_err() {
            tracing::debug!("task report receiver dropped");
        }
    }
    tracing::debug!("spreadsheet worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;
    use crate::{errors::Error, tasks::report_channel, tasks::TaskReport};

    #[derive(Default)]
    struct FakeSheet {
        writes: StdMutex<Vec<Vec<Vec<String>>>>,
        column: StdMutex<Vec<String>>,
        failures_left: StdMutex<u32>,
    }

    #[async_trait]
    impl SpreadsheetPort for FakeSheet {
        async fn write_rows(
            &self,
            _spreadsheet_id: &str,
            _worksheet: &str,
            start_row: usize,
            rows: Vec<Vec<String>>,
        ) -> Result<()> {
            assert_eq!(start_row, FIRST_DATA_ROW);
            {
                let mut left = self.failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::spreadsheet("503 backend error", true));
                }
            }
            self.writes.lock().unwrap().push(rows);
            Ok(())
        }

        async fn read_column(
            &self,
            _spreadsheet_id: &str,
            _worksheet: &str,
            column: char,
            _start_row: usize,
        ) -> Result<Vec<String>> {
            assert_eq!(column, 'B');
            Ok(self.column.lock().unwrap().clone())
        }
    }

    fn sheet() -> QuoteSheet {
        QuoteSheet {
            spreadsheet_id: "id".into(),
            worksheet: "Quotes".into(),
        }
    }

    #[test]
    fn rows_are_numbered_and_padded() {
        let quotes = vec![
            Quote {
                id: 10,
                text: "a".into(),
            },
            Quote {
                id: 12,
                text: "b".into(),
            },
        ];
        let rows = quote_rows(&quotes);
        assert_eq!(rows.len(), 2 + EXPORT_PADDING_ROWS);
        assert_eq!(rows[0], vec!["1", "a"]);
        assert_eq!(rows[1], vec!["2", "b"]);
        assert!(rows[2].iter().all(String::is_empty));
    }

    #[tokio::test]
    async fn import_stops_at_first_empty_cell() {
        let port = FakeSheet::default();
        *port.column.lock().unwrap() = vec![
            "one".into(),
            " two ".into(),
            "".into(),
            "ignored".into(),
        ];
        let store = Store::open_in_memory().unwrap();
        store.add_quote("old").unwrap();

        let n = import_quotes(&port, &sheet(), &store).await.unwrap();
        assert_eq!(n, 2);
        let texts: Vec<_> = store
            .list_quotes()
            .unwrap()
            .into_iter()
            .map(|q| q.text)
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn worker_retries_and_reports() {
        let port = Arc::new(FakeSheet {
            failures_left: StdMutex::new(1),
            ..Default::default()
        });
        let store = Store::open_in_memory().unwrap();
        store.add_quote("hello").unwrap();
        let (reports_tx, mut reports_rx) = report_channel();
        let cancel = CancellationToken::new();

        let (sync, handle) = SheetSync::spawn(
            port.clone(),
            sheet(),
            store,
            RetryPolicy::new(3, Duration::from_millis(1)),
            reports_tx,
            cancel.clone(),
        );
        sync.request_export();

        let report = tokio::time::timeout(Duration::from_secs(2), reports_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            report,
            TaskReport::Succeeded {
                task: "quote spreadsheet export".into(),
                attempts: 2
            }
        );
        assert_eq!(port.writes.lock().unwrap().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn queued_requests_share_one_export() {
        let port = Arc::new(FakeSheet::default());
        let (reports_tx, mut reports_rx) = report_channel();
        let cancel = CancellationToken::new();
        let (sync, handle) = SheetSync::spawn(
            port.clone(),
            sheet(),
            Store::open_in_memory().unwrap(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            reports_tx,
            cancel.clone(),
        );
        // The worker has not been polled yet, so all three are pending together.
        sync.request_export();
        sync.request_export();
        sync.request_export();

        let report = tokio::time::timeout(Duration::from_secs(2), reports_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!report.is_failure());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), reports_rx.recv())
                .await
                .is_err()
        );
        assert_eq!(port.writes.lock().unwrap().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn worker_reports_failure_at_ceiling() {
        let port = Arc::new(FakeSheet {
            failures_left: StdMutex::new(10),
            ..Default::default()
        });
        let (reports_tx, mut reports_rx) = report_channel();
        let cancel = CancellationToken::new();
        let (sync, _handle) = SheetSync::spawn(
            port.clone(),
            sheet(),
            Store::open_in_memory().unwrap(),
            RetryPolicy::new(2, Duration::from_millis(1)),
            reports_tx,
            cancel.clone(),
        );
        sync.request_export();

        let report = tokio::time::timeout(Duration::from_secs(2), reports_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report, TaskReport::Failed { attempts: 2, .. }));
        assert!(port.writes.lock().unwrap().is_empty());
        cancel.cancel();
    }
}
