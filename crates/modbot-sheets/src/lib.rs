//! Google Sheets adapter (quote spreadsheet).
//!
//! Uses the Sheets v4 `values` endpoints with a pre-issued OAuth bearer token.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use modbot_core::{errors::Error, sheets::SpreadsheetPort, Result};

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Clone, Debug)]
pub struct GoogleSheetsClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl GoogleSheetsClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, API_BASE)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Config(format!("sheets http client: {e}")))?;
        Ok(Self {
            token: token.into(),
            base_url: base_url.into(),
            http,
        })
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("bad sheets base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("sheets base url cannot be a base".to_string()))?
            .extend([spreadsheet_id, "values", range]);
        Ok(url)
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::spreadsheet(
            format!(
                "sheets {what} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            ),
            is_retryable_status(status.as_u16()),
        ))
    }
}

/// Rate limiting and server errors are worth another try; the rest are not.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn request_error(e: reqwest::Error) -> Error {
    let retryable = e.is_timeout() || e.is_connect() || e.is_request();
    Error::spreadsheet(format!("sheets request error: {e}"), retryable)
}

/// A1 column name for a 1-based column index (1 → A, 27 → AA).
pub fn column_name(mut index: usize) -> String {
    let mut out = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        out.push(b'A' + rem as u8);
        index = (index - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Sheet names are always quoted so spaces and punctuation survive.
fn sheet_prefix(worksheet: &str) -> String {
    format!("'{}'", worksheet.replace('\'', "''"))
}

/// The A1 range covered by `rows` written from column A of `start_row`.
pub fn write_range(worksheet: &str, start_row: usize, rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(1).max(1);
    let end_row = start_row + rows.len().max(1) - 1;
    format!(
        "{}!A{start_row}:{}{end_row}",
        sheet_prefix(worksheet),
        column_name(width)
    )
}

/// The open-ended A1 range of one column from `start_row` down.
pub fn column_range(worksheet: &str, column: char, start_row: usize) -> String {
    format!("{}!{column}{start_row}:{column}", sheet_prefix(worksheet))
}

/// First cell of every row; rows the API returns empty count as blank cells.
fn first_cells(range: ValueRange) -> Vec<String> {
    range
        .values
        .into_iter()
        .map(|row| row.into_iter().next().unwrap_or_default())
        .collect()
}

#[async_trait]
impl SpreadsheetPort for GoogleSheetsClient {
    async fn write_rows(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        start_row: usize,
        rows: Vec<Vec<String>>,
    ) -> Result<()> {
        let range = write_range(worksheet, start_row, &rows);
        let mut url = self.values_url(spreadsheet_id, &range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = ValueRangeBody {
            range: &range,
            major_dimension: "ROWS",
            values: &rows,
        };
        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(resp, "update").await?;

        tracing::debug!(range = %range, rows = rows.len(), "wrote spreadsheet rows");
        Ok(())
    }

    async fn read_column(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        column: char,
        start_row: usize,
    ) -> Result<Vec<String>> {
        let range = column_range(worksheet, column, start_row);
        let mut url = self.values_url(spreadsheet_id, &range)?;
        url.query_pairs_mut().append_pair("majorDimension", "ROWS");

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(request_error)?;
        let resp = Self::check(resp, "read").await?;
        let values: ValueRange = resp
            .json()
            .await
            .map_err(|e| Error::spreadsheet(format!("sheets json error: {e}"), false))?;
        Ok(first_cells(values))
    }
}
