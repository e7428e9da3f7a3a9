use serde::{Deserialize, Serialize};

/// One active row of the signal sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRow {
    /// Canonical symbol (`BASE_QUOTE`).
    pub symbol: String,
    /// Label exactly as typed in the sheet.
    pub original_label: String,
    /// 1-based sheet row number.
    pub row_reference: u32,
}

impl SheetRow {
    pub fn new(symbol: impl Into<String>, original_label: impl Into<String>, row_reference: u32) -> Self {
        Self {
            symbol: symbol.into(),
            original_label: original_label.into(),
            row_reference,
        }
    }
}
