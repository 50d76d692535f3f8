use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::AmountError;
use crate::{AccountView, Amount};

/// Errors that can occur when reading operation rows or writing accounts
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open operations file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOperation { line: usize, op: String },

    #[error("line {line}: {op} missing amount")]
    MissingAmount { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },

    #[error("line {line}: invalid amount: {source}")]
    InvalidAmount { line: usize, source: AmountError },

    #[error("failed to write accounts: {0}")]
    Write(csv::Error),
}

/// One scenario step, keyed by account holder name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Open { name: String, pin: String },
    Deposit { name: String, amount: Amount },
    Withdraw { name: String, amount: Amount },
    Transfer {
        name: String,
        counterparty: String,
        amount: Amount,
        pin: String,
    },
    Credit { name: String, amount: Amount },
    Debit { name: String, amount: Amount },
    Restrict { name: String },
    /// Approve every pending entry.
    Settle,
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    name: Option<String>,
    counterparty: Option<String>,
    amount: Option<String>,
    pin: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    name: &'a str,
    balance: String,
    restricted: bool,
    account: &'a str,
}

impl InputRow {
    fn required(
        value: Option<String>,
        line: usize,
        op: &str,
        field: &'static str,
    ) -> Result<String, CsvError> {
        value.filter(|v| !v.is_empty()).ok_or_else(|| CsvError::MissingField {
            line,
            op: op.to_string(),
            field,
        })
    }

    fn amount(&self, line: usize) -> Result<Amount, CsvError> {
        let raw = self
            .amount
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsvError::MissingAmount {
                line,
                op: self.op.clone(),
            })?;
        raw.parse()
            .map_err(|source| CsvError::InvalidAmount { line, source })
    }

    fn into_operation(self, line: usize) -> Result<Operation, CsvError> {
        let op = self.op.to_ascii_lowercase();
        let operation = match op.as_str() {
            "open" => Operation::Open {
                name: Self::required(self.name, line, &op, "name")?,
                pin: Self::required(self.pin, line, &op, "pin")?,
            },
            "deposit" => Operation::Deposit {
                amount: self.amount(line)?,
                name: Self::required(self.name, line, &op, "name")?,
            },
            "withdraw" => Operation::Withdraw {
                amount: self.amount(line)?,
                name: Self::required(self.name, line, &op, "name")?,
            },
            "transfer" => Operation::Transfer {
                amount: self.amount(line)?,
                name: Self::required(self.name, line, &op, "name")?,
                counterparty: Self::required(self.counterparty, line, &op, "counterparty")?,
                pin: Self::required(self.pin, line, &op, "pin")?,
            },
            "credit" => Operation::Credit {
                amount: self.amount(line)?,
                name: Self::required(self.name, line, &op, "name")?,
            },
            "debit" => Operation::Debit {
                amount: self.amount(line)?,
                name: Self::required(self.name, line, &op, "name")?,
            },
            "restrict" => Operation::Restrict {
                name: Self::required(self.name, line, &op, "name")?,
            },
            "settle" => Operation::Settle,
            _ => {
                return Err(CsvError::UnrecognizedOperation {
                    line,
                    op: self.op,
                });
            }
        };
        Ok(operation)
    }
}

/// Read scenario operations from a csv file
pub fn read_operations(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Operation, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_operation(line)
        }))
}

/// Write `(holder name, account)` pairs in csv format
pub fn write_accounts<'a>(
    out: impl io::Write,
    accounts: impl IntoIterator<Item = (&'a str, &'a AccountView)>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for (name, account) in accounts {
        let row = OutputRow {
            name,
            balance: account.balance.to_string(),
            restricted: account.is_restricted,
            account: &account.account_number,
        };
        writer.serialize(&row).map_err(CsvError::Write)?;
    }

    writer
        .flush()
        .map_err(|e| CsvError::Write(csv::Error::from(e)))
}
