use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

use crate::models::event::{AccountId, Amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
    FailedTransaction,
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            NotificationKind::Deposit => write!(f, "DEPOSIT"),
            NotificationKind::Withdraw => write!(f, "WITHDRAW"),
            NotificationKind::TransferOut => write!(f, "TRANSFER_OUT"),
            NotificationKind::TransferIn => write!(f, "TRANSFER_IN"),
            NotificationKind::FailedTransaction => write!(f, "FAILED_TRANSACTION"),
        }
    }
}

/// One row of the append-only `notifications` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub event_type: NotificationKind,
    pub account_id: String,
    pub amount: String,
    pub message: String,
}

impl NotificationRecord {
    pub fn new(
        event_type: NotificationKind,
        account_id: &AccountId,
        amount: &Amount,
        message: String,
    ) -> Self {
        Self {
            event_type,
            account_id: account_id.to_string(),
            amount: amount.to_string(),
            message,
        }
    }
}
