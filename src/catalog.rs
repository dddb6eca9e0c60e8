//! Fund name to ticker catalog.
//!
//! Built once at startup and shared by reference; nothing here is global.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core::TickerLookup;

const BUILTIN_FUNDS: [(&str, &str); 9] = [
    ("Nifty 50 Index", "^NSEI"),
    ("SBI Large Cap Reg Gr", "0P00005WF0.BO"),
    ("SBI Debt Fund", "0P0001DDNG.BO"),
    ("HDFC liquid fund", "0P0000XW89.BO"),
    ("HDFC Small Cap Growth", "0P0000AEKG.BO"),
    ("Apple", "AAPL"),
    ("NASDAQ", "^IXIC"),
    ("Treasury Bond", "TLT"),
    ("Nippon India Small Cap", "0P0000XVFY.BO"),
];

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FundEntry {
    pub name: String,
    pub ticker: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read fund catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid fund catalog {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fund '{0}' is listed more than once")]
    DuplicateName(String),
    #[error("fund '{0}' has an empty ticker")]
    EmptyTicker(String),
}

#[derive(Clone, Debug)]
pub struct FundCatalog {
    entries: Vec<FundEntry>,
    by_name: HashMap<String, usize>,
}

impl FundCatalog {
    pub fn new(entries: Vec<FundEntry>) -> Result<Self, CatalogError> {
        let mut by_name = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            if entry.ticker.trim().is_empty() {
                return Err(CatalogError::EmptyTicker(entry.name.clone()));
            }
            if by_name.insert(entry.name.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateName(entry.name.clone()));
            }
        }
        Ok(Self { entries, by_name })
    }

    pub fn builtin() -> Self {
        let entries = BUILTIN_FUNDS
            .iter()
            .map(|(name, ticker)| FundEntry {
                name: (*name).to_string(),
                ticker: (*ticker).to_string(),
            })
            .collect::<Vec<_>>();
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.name.clone(), idx))
            .collect();
        Self { entries, by_name }
    }

    /// Loads `[{"name": ..., "ticker": ...}]` from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let path_label = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path_label.clone(),
            source,
        })?;
        let entries: Vec<FundEntry> =
            serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path_label.clone(),
                source,
            })?;
        let catalog = Self::new(entries)?;
        info!(path = %path_label, funds = catalog.len(), "fund catalog loaded");
        Ok(catalog)
    }

    pub fn entries(&self) -> &[FundEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn ticker_for(&self, name: &str) -> Option<&str> {
        self.by_name
            .get(name)
            .map(|idx| self.entries[*idx].ticker.as_str())
    }
}

impl TickerLookup for FundCatalog {
    fn ticker_for(&self, fund_name: &str) -> Option<&str> {
        FundCatalog::ticker_for(self, fund_name)
    }
}
