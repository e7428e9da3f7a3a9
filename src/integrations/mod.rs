//! Outward-facing collaborators: the spreadsheet and the notification channel.

pub mod messages;
pub mod sheets;
pub mod telegram;

pub use sheets::GoogleSheetsClient;
pub use telegram::{LogNotifier, TelegramNotifier};

pub use futures_util::future::BoxFuture;

use crate::types::{AnalysisResult, SheetRow};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// The spreadsheet holding the tracked symbols and their analysis columns.
///
/// Failures are logged by the implementation; callers only see `false` or a stale list.
pub trait SheetStore: Send + Sync {
    /// Rows flagged for trading. `force_refresh` bypasses the short-lived row cache.
    fn list_active_rows(&self, force_refresh: bool) -> BoxFuture<'_, Vec<SheetRow>>;

    /// Write a full analysis. Returns true when the row is up to date afterwards,
    /// including when nothing changed enough to need a write.
    fn write_analysis<'a>(&'a self, row: &'a SheetRow, result: &'a AnalysisResult) -> BoxFuture<'a, bool>;

    /// Refresh only the "last updated" cell.
    fn write_timestamp_only<'a>(&'a self, row: &'a SheetRow, timestamp: DateTime<Utc>) -> BoxFuture<'a, bool>;
}

/// Fire-and-forget notification channel.
pub trait Notifier: Send + Sync {
    /// Queue a message. Never blocks; returns false when the message could not be queued.
    /// Urgent messages notify with sound, the rest arrive silently.
    fn send(&self, text: &str, urgent: bool) -> bool;

    /// Wait up to `timeout` for queued messages to go out.
    fn flush(&self, timeout: Duration) -> BoxFuture<'_, ()>;
}
