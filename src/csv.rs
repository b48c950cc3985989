use std::io;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Amount;
use crate::engine::Reply;
use crate::model::{Attempt, RiskLevel, UserId};
use crate::origin::Origin;

/// Errors that can occur when reading attempt rows or writing replies
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open attempts file: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized attempt type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing {field}")]
    MissingField {
        line: usize,
        kind: &'static str,
        field: &'static str,
    },

    #[error("line {line}: invalid amount {value}, must be a positive integer")]
    InvalidAmount { line: usize, value: i64 },

    #[error("line {line}: invalid ip address '{value}'")]
    InvalidIp { line: usize, value: String },

    #[error("failed to write reply: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    user: String,
    credential: Option<String>,
    amount: Option<i64>,
    country: Option<String>,
    verified: Option<bool>,
    ip: Option<String>,
    risk_level: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    r#type: &'static str,
    user: &'a str,
    outcome: String,
    message: String,
    amount: Option<u64>,
}

/// Read attempts from a csv file. The file is opened eagerly, rows are
/// parsed as the iterator is consumed.
pub fn read_attempts(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Attempt, CsvError>> + Send + use<>, CsvError> {
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
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<Attempt, CsvError> {
    let user = UserId::new(row.user);
    match row.r#type.to_ascii_lowercase().as_str() {
        "login" => {
            let credential = row.credential.ok_or(CsvError::MissingField {
                line,
                kind: "login",
                field: "credential",
            })?;
            let origin = origin(line, row.country, row.ip)?;
            Ok(Attempt::Login {
                user,
                credential,
                origin,
            })
        }
        "logout" => {
            let origin = origin(line, row.country, row.ip)?;
            Ok(Attempt::Logout { user, origin })
        }
        "transfer" => {
            let value = row.amount.ok_or(CsvError::MissingField {
                line,
                kind: "transfer",
                field: "amount",
            })?;
            let amount =
                Amount::from_signed(value).ok_or(CsvError::InvalidAmount { line, value })?;
            let origin = origin(line, row.country, row.ip)?;
            Ok(Attempt::Transfer {
                user,
                amount,
                verified: row.verified.unwrap_or(false),
                origin,
            })
        }
        "risk_report" => {
            let level = row.risk_level.ok_or(CsvError::MissingField {
                line,
                kind: "risk_report",
                field: "risk_level",
            })?;
            Ok(Attempt::RiskReport {
                user,
                level: RiskLevel::from_report(&level),
            })
        }
        _ => Err(CsvError::UnrecognizedType {
            line,
            kind: row.r#type,
        }),
    }
}

fn origin(line: usize, country: Option<String>, ip: Option<String>) -> Result<Origin, CsvError> {
    let peer = ip
        .map(|value| {
            value
                .parse::<IpAddr>()
                .map_err(|_| CsvError::InvalidIp { line, value })
        })
        .transpose()?;
    Ok(Origin {
        country,
        forwarded_for: None,
        peer,
    })
}

/// Writes one csv row per engine reply
pub struct ReplyWriter<W: io::Write> {
    writer: csv::Writer<W>,
}

impl<W: io::Write> ReplyWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }

    pub fn write(&mut self, attempt: &Attempt, reply: &Reply) -> Result<(), CsvError> {
        let (outcome, message, amount) = match reply {
            Reply::Decision(decision) => (
                decision.outcome.to_string(),
                decision.message.to_string(),
                decision.transfer.as_ref().map(|t| t.amount.get()),
            ),
            Reply::Status(Ok(change)) => (
                change.current.to_string(),
                format!("{} -> {}", change.previous, change.current),
                None,
            ),
            Reply::Status(Err(_)) => ("FAILURE".to_string(), "account not found".to_string(), None),
        };

        self.writer.serialize(OutputRow {
            r#type: attempt.kind(),
            user: attempt.user().as_str(),
            outcome,
            message,
            amount,
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use crate::engine::{Decision, Outcome, StatusChange, TransferEcho};
    use crate::model::AccountStatus;
    use crate::store::StoreError;

    const HEADER: &str = "type,user,credential,amount,country,verified,ip,risk_level\n";

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn read(content: &str) -> Vec<Result<Attempt, CsvError>> {
        let file = write_csv(content);
        read_attempts(file.path()).unwrap().collect()
    }

    #[test]
    fn read_login() {
        let results = read("login,user_01,12345678,,kr,,127.0.0.1,\n");
        assert_eq!(results.len(), 1);

        match results.into_iter().next().unwrap().unwrap() {
            Attempt::Login {
                user,
                credential,
                origin,
            } => {
                assert_eq!(user.as_str(), "user_01");
                assert_eq!(credential, "12345678");
                assert_eq!(origin.country.as_deref(), Some("kr"));
                assert!(origin.peer.unwrap().is_loopback());
            }
            other => panic!("expected login, got {other:?}"),
        }
    }

    #[test]
    fn read_transfer_defaults_verified_to_false() {
        let results = read("transfer,user_01,,5000,,,,\n");
        match results.into_iter().next().unwrap().unwrap() {
            Attempt::Transfer {
                amount,
                verified,
                origin,
                ..
            } => {
                assert_eq!(amount.get(), 5000);
                assert!(!verified);
                assert!(origin.country.is_none());
                assert!(origin.peer.is_none());
            }
            other => panic!("expected transfer, got {other:?}"),
        }
    }

    #[test]
    fn read_risk_report() {
        let results = read("risk_report,user_01,,,,,,high\n");
        assert!(matches!(
            results[0],
            Ok(Attempt::RiskReport {
                level: RiskLevel::High,
                ..
            })
        ));
    }

    #[test]
    fn read_with_whitespace() {
        let results = read("transfer , user_01 , , 10 , KR , true , 10.0.0.1 ,\n");
        assert!(matches!(
            results[0],
            Ok(Attempt::Transfer { verified: true, .. })
        ));
    }

    #[test]
    fn read_returns_error_for_unknown_type() {
        let results = read("withdraw,user_01,,10,,,,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedType { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_amount() {
        let results = read("transfer,user_01,,,,,,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(
            err,
            CsvError::MissingField {
                line: 2,
                field: "amount",
                ..
            }
        ));
    }

    #[test]
    fn read_returns_error_for_non_positive_amount() {
        let results = read("transfer,user_01,,0,,,,\ntransfer,user_01,,-5,,,,\n");
        assert!(matches!(
            results[0],
            Err(CsvError::InvalidAmount { line: 2, value: 0 })
        ));
        assert!(matches!(
            results[1],
            Err(CsvError::InvalidAmount { line: 3, value: -5 })
        ));
    }

    #[test]
    fn read_returns_error_for_bad_ip() {
        let results = read("logout,user_01,,,,,not-an-ip,\n");
        assert!(matches!(results[0], Err(CsvError::InvalidIp { line: 2, .. })));
    }

    #[test]
    fn open_missing_file_fails() {
        assert!(matches!(
            read_attempts(Path::new("/nonexistent/attempts.csv")),
            Err(CsvError::Open(_))
        ));
    }

    #[test]
    fn writes_replies() {
        let transfer = Attempt::Transfer {
            user: "user_01".into(),
            amount: Amount::new(5000).unwrap(),
            verified: false,
            origin: Origin::default(),
        };
        let report = Attempt::RiskReport {
            user: "user_01".into(),
            level: RiskLevel::High,
        };

        let mut out = Vec::new();
        {
            let mut writer = ReplyWriter::new(&mut out);
            let decision = Decision {
                outcome: Outcome::Allowed,
                message: "Transfer completed successfully.",
                transfer: Some(TransferEcho {
                    amount: Amount::new(5000).unwrap(),
                    destination: "Woori".into(),
                }),
            };
            writer.write(&transfer, &Reply::Decision(decision)).unwrap();
            let change = StatusChange {
                previous: AccountStatus::Normal,
                current: AccountStatus::Blocked,
            };
            writer.write(&report, &Reply::Status(Ok(change))).unwrap();
            writer
                .write(&report, &Reply::Status(Err(StoreError::NotFound("user_01".into()))))
                .unwrap();
            writer.flush().unwrap();
        }

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "type,user,outcome,message,amount");
        assert_eq!(lines[1], "transfer,user_01,ALLOWED,Transfer completed successfully.,5000");
        assert_eq!(lines[2], "risk_report,user_01,BLOCKED,NORMAL -> BLOCKED,");
        assert_eq!(lines[3], "risk_report,user_01,FAILURE,account not found,");
    }
}
