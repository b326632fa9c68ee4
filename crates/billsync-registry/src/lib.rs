//! Upstream legislative registry contract + the WA Legislative Web Services client.

use async_trait::async_trait;
use billsync_core::{BillDetail, HearingRef, RosterEntry};
use billsync_storage::FetchError;
use chrono::NaiveDate;
use thiserror::Error;

pub mod soap;

pub use soap::{SoapRegistry, SERVICE_NAMESPACE};

pub const CRATE_NAME: &str = "billsync-registry";

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Network, timeout or non-success HTTP status on a single call.
    #[error("transport failure: {0}")]
    Transport(#[from] FetchError),
    /// Malformed response, or one missing a mandatory field.
    #[error("parse failure in {context}: {reason}")]
    Parse { context: String, reason: String },
}

impl RegistryError {
    pub fn parse(context: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::Parse {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RegistryError::Transport(_))
    }
}

/// One agenda item of a committee meeting, resolved to the bill it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HearingItem {
    pub bill_id: String,
    pub hearing: HearingRef,
}

#[async_trait]
pub trait LegislativeRegistry: Send + Sync {
    /// Human-readable endpoint recorded in dataset metadata.
    fn endpoint(&self) -> &str;

    async fn roster_by_year(&self, year: i32) -> Result<Vec<RosterEntry>, RegistryError>;

    async fn prefiled_roster(&self) -> Result<Vec<RosterEntry>, RegistryError>;

    async fn bill_detail(&self, biennium: &str, number: u32) -> Result<BillDetail, RegistryError>;

    async fn hearings(
        &self,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HearingItem>, RegistryError>;
}
