//! Maps decoded transaction events to notification records.

use anyhow::{Error, Result};
use tracing::{debug, info, warn};

use crate::{
    models::{
        event::{Amount, FailedTransaction, Label, TransactionEvent, Txn},
        notification::{NotificationKind, NotificationRecord},
    },
    traits::NotificationStore,
};

/// Builds the records an event should produce, in write order. Events missing
/// a required sub-record produce nothing.
pub fn notifications_for(event: &TransactionEvent) -> Vec<NotificationRecord> {
    match event {
        TransactionEvent::Deposit { txn } => single(txn, NotificationKind::Deposit, |amount| {
            format!("Deposit of {} successful", amount)
        }),
        TransactionEvent::Withdraw { txn } => single(txn, NotificationKind::Withdraw, |amount| {
            format!("Withdrawal of {} successful", amount)
        }),
        TransactionEvent::Transfer {
            debit_txn,
            credit_txn,
        } => {
            let (Some((debit_account, debit_amount)), Some((credit_account, credit_amount))) = (
                debit_txn.as_ref().and_then(Txn::parts),
                credit_txn.as_ref().and_then(Txn::parts),
            ) else {
                return Vec::new();
            };

            vec![
                NotificationRecord::new(
                    NotificationKind::TransferOut,
                    debit_account,
                    debit_amount,
                    format!(
                        "Transferred {} to account {}",
                        debit_amount, credit_account
                    ),
                ),
                NotificationRecord::new(
                    NotificationKind::TransferIn,
                    credit_account,
                    credit_amount,
                    format!(
                        "Received {} from account {}",
                        credit_amount, debit_account
                    ),
                ),
            ]
        }
        TransactionEvent::Failed(failed) => failed_notification(failed).into_iter().collect(),
        TransactionEvent::Unknown { .. } => Vec::new(),
    }
}

fn single(
    txn: &Option<Txn>,
    kind: NotificationKind,
    message: impl FnOnce(&Amount) -> String,
) -> Vec<NotificationRecord> {
    match txn.as_ref().and_then(Txn::parts) {
        Some((account_id, amount)) => vec![NotificationRecord::new(
            kind,
            account_id,
            amount,
            message(amount),
        )],
        None => Vec::new(),
    }
}

fn failed_notification(failed: &FailedTransaction) -> Option<NotificationRecord> {
    let account_id = failed.account_id.as_ref().filter(|a| !a.is_empty())?;
    let amount = failed.amount.as_ref().filter(|a| !a.is_zero())?;
    let txn_type = failed.txn_type.as_ref().filter(|t| !t.is_blank())?;
    // An absent reason prints as `undefined`, a null one as `null`.
    let reason = failed
        .reason
        .as_ref()
        .map_or_else(|| "undefined".to_string(), Label::to_string);

    Some(NotificationRecord::new(
        NotificationKind::FailedTransaction,
        account_id,
        amount,
        format!("{} failed: {}", txn_type, reason),
    ))
}

/// Persists every record for `event`, one at a time, stopping at the first
/// failed write. Returns how many records were written.
///
/// A transfer whose second write fails leaves the `TRANSFER_OUT` row in
/// place; the whole event is then retried and that row may be written again.
pub async fn dispatch<S>(event: &TransactionEvent, store: &S) -> Result<usize, Error>
where
    S: NotificationStore + ?Sized,
{
    if let TransactionEvent::Unknown { event_type } = event {
        warn!(event_type = %event_type, "Unhandled transaction event type");
        return Ok(0);
    }

    let records = notifications_for(event);

    if records.is_empty() {
        debug!(
            event_type = event.event_type(),
            "Event is missing required fields, nothing to notify"
        );
        return Ok(0);
    }

    for record in &records {
        store.insert(record).await?;

        info!(
            account_id = %record.account_id,
            event_type = %record.event_type,
            amount = %record.amount,
            text = %record.message,
            "Notification recorded"
        );
    }

    Ok(records.len())
}
