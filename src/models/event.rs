use std::fmt::{self, Display, Formatter};

use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Number, Value};

pub const DEPOSIT: &str = "transaction.deposit";
pub const WITHDRAW: &str = "transaction.withdraw";
pub const TRANSFER: &str = "transaction.transfer";
pub const FAILED: &str = "transaction.failed";

/// Wire envelope as published by the ledger services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub payload: Value,
}

/// Account identifiers arrive as strings from most producers and as bare
/// integers from older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    Text(String),
    Number(Number),
}

impl AccountId {
    /// Blank text or a zero id.
    pub fn is_empty(&self) -> bool {
        match self {
            AccountId::Text(s) => s.is_empty(),
            AccountId::Number(n) => n.as_f64() == Some(0.0),
        }
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Text(s) => write!(f, "{}", s),
            AccountId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Monetary amount as a JSON number or a decimal string. Decimal strings
/// keep their text, so `"12.50"` renders as `12.50`; JSON numbers render in
/// their shortest form, so `12.50` renders as `12.5`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Amount {
    Number(Number),
    Text(String),
}

impl Amount {
    /// Only a numeric zero. A string such as `"0"` still counts as given.
    pub fn is_zero(&self) -> bool {
        matches!(self, Amount::Number(n) if n.as_f64() == Some(0.0))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => Ok(Amount::Number(n)),
            Value::String(s) if is_decimal(&s) => Ok(Amount::Text(s)),
            other => Err(de::Error::custom(format!(
                "amount must be a number or a decimal string, got {}",
                other
            ))),
        }
    }
}

/// Optional sign, digits, optional fraction. Anything else would be
/// rejected by the `NUMERIC` column on every attempt.
fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));

    !(whole.is_empty() && fraction.is_empty())
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Number(n) => write!(f, "{}", n),
            Amount::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Txn {
    #[serde(default)]
    pub account_id: Option<AccountId>,

    #[serde(default)]
    pub amount: Option<Amount>,
}

impl Txn {
    pub fn new(account_id: impl Into<String>, amount: i64) -> Self {
        Self {
            account_id: Some(AccountId::Text(account_id.into())),
            amount: Some(Amount::Number(amount.into())),
        }
    }

    /// Both fields, or nothing.
    pub fn parts(&self) -> Option<(&AccountId, &Amount)> {
        Some((self.account_id.as_ref()?, self.amount.as_ref()?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailedTransaction {
    #[serde(default)]
    pub account_id: Option<AccountId>,

    #[serde(default)]
    pub amount: Option<Amount>,

    #[serde(default)]
    pub txn_type: Option<Label>,

    /// `None` when the field is absent, `Some(Label::Null)` when it is `null`.
    #[serde(default, deserialize_with = "present")]
    pub reason: Option<Label>,
}

/// Free-text scalar printed the way the producing services print it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Label {
    Text(String),
    Number(Number),
    Bool(bool),
    Null,
}

impl Label {
    /// Empty text, zero, `false` or `null`.
    pub fn is_blank(&self) -> bool {
        match self {
            Label::Text(s) => s.is_empty(),
            Label::Number(n) => n.as_f64() == Some(0.0),
            Label::Bool(b) => !b,
            Label::Null => true,
        }
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label::Text(s.to_string())
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Label::Text(s) => write!(f, "{}", s),
            Label::Number(n) => write!(f, "{}", n),
            Label::Bool(b) => write!(f, "{}", b),
            Label::Null => write!(f, "null"),
        }
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(Label::Text(s)),
            Value::Number(n) => Ok(Label::Number(n)),
            Value::Bool(b) => Ok(Label::Bool(b)),
            Value::Null => Ok(Label::Null),
            other => Err(de::Error::custom(format!("expected a scalar, got {}", other))),
        }
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Label>, D::Error>
where
    D: Deserializer<'de>,
{
    Label::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct SinglePayload {
    #[serde(default)]
    txn: Option<Txn>,
}

#[derive(Debug, Deserialize)]
struct TransferPayload {
    #[serde(default, rename = "debitTxn")]
    debit_txn: Option<Txn>,

    #[serde(default, rename = "creditTxn")]
    credit_txn: Option<Txn>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEvent {
    Deposit { txn: Option<Txn> },
    Withdraw { txn: Option<Txn> },
    Transfer {
        debit_txn: Option<Txn>,
        credit_txn: Option<Txn>,
    },
    Failed(FailedTransaction),
    Unknown { event_type: String },
}

impl TransactionEvent {
    /// Parses a queue payload. Any error here is permanent for these bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let envelope = serde_json::from_slice::<Envelope>(bytes)
            .map_err(|e| anyhow!("Invalid event envelope: {}", e))?;

        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, Error> {
        let Envelope {
            event_type,
            payload,
        } = envelope;

        // A null payload is the same as an empty one: every sub-record absent.
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let event = match event_type.as_str() {
            DEPOSIT => TransactionEvent::Deposit {
                txn: parse_payload::<SinglePayload>(&event_type, payload)?.txn,
            },
            WITHDRAW => TransactionEvent::Withdraw {
                txn: parse_payload::<SinglePayload>(&event_type, payload)?.txn,
            },
            TRANSFER => {
                let transfer = parse_payload::<TransferPayload>(&event_type, payload)?;
                TransactionEvent::Transfer {
                    debit_txn: transfer.debit_txn,
                    credit_txn: transfer.credit_txn,
                }
            }
            FAILED => TransactionEvent::Failed(parse_payload(&event_type, payload)?),
            _ => TransactionEvent::Unknown {
                event_type: event_type.clone(),
            },
        };

        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            TransactionEvent::Deposit { .. } => DEPOSIT,
            TransactionEvent::Withdraw { .. } => WITHDRAW,
            TransactionEvent::Transfer { .. } => TRANSFER,
            TransactionEvent::Failed(_) => FAILED,
            TransactionEvent::Unknown { event_type } => event_type,
        }
    }
}

fn parse_payload<T>(event_type: &str, payload: Value) -> Result<T, Error>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(payload)
        .map_err(|e| anyhow!("Malformed payload for {}: {}", event_type, e))
}
