//! Queued operations.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Names of every operation kind the engine knows how to dispatch.
pub const KNOWN_KINDS: [&str; 7] = [
    "calculate-tax",
    "analyze-deductions",
    "save-form",
    "submit-form",
    "store-document",
    "verify-field",
    "generate-report",
];

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Currently being dispatched.
    InFlight,
    /// Last dispatch attempt failed.
    Failed,
}

/// Payload of a `calculate-tax` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateTax {
    /// Gross income for the period.
    pub income: f64,
    /// Deductions already claimed.
    #[serde(default)]
    pub deductions: f64,
    /// Tax year, if not the current one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_year: Option<u16>,
    /// Filing status as understood by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filing_status: Option<String>,
}

impl CalculateTax {
    /// Creates a calculation request for the given income.
    pub fn new(income: f64) -> Self {
        Self {
            income,
            deductions: 0.0,
            tax_year: None,
            filing_status: None,
        }
    }
}

/// Payload of an `analyze-deductions` operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeDeductions {
    /// Tax year to analyze.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_year: Option<u16>,
    /// Restrict the analysis to these expenses; empty means all.
    #[serde(default)]
    pub expense_ids: Vec<String>,
}

/// Payload of a `save-form` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveForm {
    /// Form identifier.
    pub form_id: String,
    /// Form type (e.g. "1040", "schedule-c").
    pub form_type: String,
    /// Field values.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Payload of a `submit-form` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitForm {
    /// Form identifier.
    pub form_id: String,
}

/// Payload of a `store-document` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    /// Document identifier.
    pub document_id: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size of the stored document in bytes.
    #[serde(default)]
    pub size_bytes: u64,
}

/// Payload of a `verify-field` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyField {
    /// Form the field belongs to.
    pub form_id: String,
    /// Field name.
    pub field: String,
    /// Value to verify.
    #[serde(default)]
    pub value: Value,
}

/// Payload of a `generate-report` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReport {
    /// Report type (e.g. "quarterly-summary").
    pub report_type: String,
    /// Reporting period label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

/// The kind of a queued operation together with its typed payload.
///
/// Serialized as two sibling fields, `kind` (the kebab-case name) and
/// `payload`. A kind name this build does not recognize decodes to
/// [`OperationKind::Unknown`] with its payload preserved untouched, so a log
/// written by a newer client still loads. A known name whose stored payload
/// no longer fits its struct decodes to [`OperationKind::Malformed`] rather
/// than failing the whole log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawKind", into = "RawKind")]
pub enum OperationKind {
    /// `calculate-tax`
    CalculateTax(CalculateTax),
    /// `analyze-deductions`
    AnalyzeDeductions(AnalyzeDeductions),
    /// `save-form`
    SaveForm(SaveForm),
    /// `submit-form`
    SubmitForm(SubmitForm),
    /// `store-document`
    StoreDocument(StoreDocument),
    /// `verify-field`
    VerifyField(VerifyField),
    /// `generate-report`
    GenerateReport(GenerateReport),
    /// Any kind name not listed in [`KNOWN_KINDS`].
    Unknown {
        /// The unrecognized kind name.
        name: String,
        /// The payload as stored.
        payload: Value,
    },
    /// A known kind name whose stored payload does not decode.
    Malformed {
        /// The kind name.
        name: String,
        /// The payload as stored.
        payload: Value,
        /// Why the payload was refused.
        error: String,
    },
}

#[derive(Serialize, Deserialize)]
struct RawKind {
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl From<RawKind> for OperationKind {
    fn from(raw: RawKind) -> Self {
        match OperationKind::from_parts(raw.kind.as_str(), raw.payload.clone()) {
            Ok(kind) => kind,
            Err(ProtocolError::Validation { message, .. }) => OperationKind::Malformed {
                name: raw.kind,
                payload: raw.payload,
                error: message,
            },
            Err(e) => OperationKind::Malformed {
                name: raw.kind,
                payload: raw.payload,
                error: e.to_string(),
            },
        }
    }
}

impl From<OperationKind> for RawKind {
    fn from(kind: OperationKind) -> Self {
        RawKind {
            kind: kind.name().to_string(),
            payload: kind.payload(),
        }
    }
}

fn decode<T: DeserializeOwned>(name: &str, payload: Value) -> ProtocolResult<T> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::validation(name, e.to_string()))
}

fn require_non_empty(kind: &str, field: &str, value: &str) -> ProtocolResult<()> {
    if value.trim().is_empty() {
        return Err(ProtocolError::validation(
            kind,
            format!("{field} must not be empty"),
        ));
    }
    Ok(())
}

fn require_amount(kind: &str, field: &str, value: f64) -> ProtocolResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ProtocolError::validation(
            kind,
            format!("{field} must be a non-negative number, got {value}"),
        ));
    }
    Ok(())
}

fn require_tax_year(kind: &str, year: Option<u16>) -> ProtocolResult<()> {
    match year {
        Some(y) if !(1900..=2200).contains(&y) => Err(ProtocolError::validation(
            kind,
            format!("taxYear {y} is out of range"),
        )),
        _ => Ok(()),
    }
}

impl OperationKind {
    /// Builds a kind from its name and JSON payload.
    ///
    /// Unrecognized names produce [`OperationKind::Unknown`]. A recognized
    /// name whose payload does not match the expected shape is a validation
    /// error.
    pub fn from_parts(name: impl Into<String>, payload: Value) -> ProtocolResult<Self> {
        let name = name.into();
        let kind = match name.as_str() {
            "calculate-tax" => OperationKind::CalculateTax(decode(&name, payload)?),
            "analyze-deductions" => OperationKind::AnalyzeDeductions(decode(&name, payload)?),
            "save-form" => OperationKind::SaveForm(decode(&name, payload)?),
            "submit-form" => OperationKind::SubmitForm(decode(&name, payload)?),
            "store-document" => OperationKind::StoreDocument(decode(&name, payload)?),
            "verify-field" => OperationKind::VerifyField(decode(&name, payload)?),
            "generate-report" => OperationKind::GenerateReport(decode(&name, payload)?),
            _ => OperationKind::Unknown { name, payload },
        };
        Ok(kind)
    }

    /// Returns the kebab-case kind name.
    pub fn name(&self) -> &str {
        match self {
            OperationKind::CalculateTax(_) => "calculate-tax",
            OperationKind::AnalyzeDeductions(_) => "analyze-deductions",
            OperationKind::SaveForm(_) => "save-form",
            OperationKind::SubmitForm(_) => "submit-form",
            OperationKind::StoreDocument(_) => "store-document",
            OperationKind::VerifyField(_) => "verify-field",
            OperationKind::GenerateReport(_) => "generate-report",
            OperationKind::Unknown { name, .. } | OperationKind::Malformed { name, .. } => name,
        }
    }

    /// Returns true if the kind name is one this build recognizes.
    ///
    /// Malformed kinds have a known name but cannot be dispatched.
    pub fn is_known(&self) -> bool {
        !matches!(self, OperationKind::Unknown { .. })
    }

    /// Returns true if the payload failed to decode when the log was loaded.
    pub fn is_malformed(&self) -> bool {
        matches!(self, OperationKind::Malformed { .. })
    }

    /// Returns the payload as JSON.
    pub fn payload(&self) -> Value {
        let encoded = match self {
            OperationKind::CalculateTax(p) => serde_json::to_value(p),
            OperationKind::AnalyzeDeductions(p) => serde_json::to_value(p),
            OperationKind::SaveForm(p) => serde_json::to_value(p),
            OperationKind::SubmitForm(p) => serde_json::to_value(p),
            OperationKind::StoreDocument(p) => serde_json::to_value(p),
            OperationKind::VerifyField(p) => serde_json::to_value(p),
            OperationKind::GenerateReport(p) => serde_json::to_value(p),
            OperationKind::Unknown { payload, .. } | OperationKind::Malformed { payload, .. } => {
                return payload.clone()
            }
        };
        // Payload structs only hold strings, numbers, maps and JSON values
        encoded.unwrap_or(Value::Null)
    }

    /// Checks the payload's business rules.
    ///
    /// Unknown kinds are not validated here; they are rejected by the
    /// orchestrator when a pass reaches them.
    pub fn validate(&self) -> ProtocolResult<()> {
        let kind = self.name();
        match self {
            OperationKind::CalculateTax(p) => {
                require_amount(kind, "income", p.income)?;
                require_amount(kind, "deductions", p.deductions)?;
                require_tax_year(kind, p.tax_year)
            }
            OperationKind::AnalyzeDeductions(p) => {
                require_tax_year(kind, p.tax_year)?;
                p.expense_ids
                    .iter()
                    .try_for_each(|id| require_non_empty(kind, "expenseIds[]", id))
            }
            OperationKind::SaveForm(p) => {
                require_non_empty(kind, "formId", &p.form_id)?;
                require_non_empty(kind, "formType", &p.form_type)
            }
            OperationKind::SubmitForm(p) => require_non_empty(kind, "formId", &p.form_id),
            OperationKind::StoreDocument(p) => {
                require_non_empty(kind, "documentId", &p.document_id)?;
                require_non_empty(kind, "fileName", &p.file_name)
            }
            OperationKind::VerifyField(p) => {
                require_non_empty(kind, "formId", &p.form_id)?;
                require_non_empty(kind, "field", &p.field)
            }
            OperationKind::GenerateReport(p) => {
                require_non_empty(kind, "reportType", &p.report_type)
            }
            OperationKind::Unknown { .. } => Ok(()),
            OperationKind::Malformed { name, error, .. } => {
                Err(ProtocolError::validation(name.as_str(), error.as_str()))
            }
        }
    }

    /// Returns the backend path this kind is dispatched to.
    ///
    /// `None` for unknown and malformed kinds.
    pub fn endpoint(&self) -> Option<&'static str> {
        match self {
            OperationKind::CalculateTax(_) => Some("/tax/calculate-tax"),
            OperationKind::AnalyzeDeductions(_) => Some("/tax/analyze-deductions"),
            OperationKind::SaveForm(_) => Some("/tax/save-form"),
            OperationKind::SubmitForm(_) => Some("/tax/submit-form"),
            OperationKind::StoreDocument(_) => Some("/documents"),
            OperationKind::VerifyField(_) => Some("/tax/verify-field"),
            OperationKind::GenerateReport(_) => Some("/reports/generate"),
            OperationKind::Unknown { .. } | OperationKind::Malformed { .. } => None,
        }
    }
}

/// A mutation queued while offline.
///
/// # Invariants
///
/// - `id` is unique and never changes once assigned
/// - `retry_count` never decreases
/// - An operation leaves the log only after its server call succeeded, or
///   when a caller explicitly discards it after it failed terminally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique operation ID (UUID v4).
    pub id: String,
    /// Kind and typed payload.
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Enqueue time in milliseconds since the Unix epoch.
    pub enqueued_at: u64,
    /// Number of failed dispatch attempts.
    #[serde(default)]
    pub retry_count: u32,
    /// Current status.
    pub status: OperationStatus,
    /// Time of the last dispatch attempt, in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<u64>,
    /// Error reported by the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Operation {
    /// Creates a pending operation with a fresh ID.
    pub fn new(kind: OperationKind, enqueued_at: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            enqueued_at,
            retry_count: 0,
            status: OperationStatus::Pending,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Marks the operation as being dispatched.
    pub fn mark_in_flight(&mut self, now: u64) {
        self.status = OperationStatus::InFlight;
        self.last_attempt_at = Some(now);
    }

    /// Records a failed dispatch attempt.
    pub fn record_failure(&mut self, now: u64, error: impl Into<String>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.status = OperationStatus::Failed;
        self.last_attempt_at = Some(now);
        self.last_error = Some(error.into());
    }

    /// Records a failure that no retry can fix.
    ///
    /// The retry count jumps to `max_retries` so the operation is exhausted
    /// from now on.
    pub fn record_rejection(&mut self, now: u64, error: impl Into<String>, max_retries: u32) {
        self.record_failure(now, error);
        self.retry_count = self.retry_count.max(max_retries);
    }

    /// Returns true if no further attempt will be made.
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.status == OperationStatus::Failed && self.retry_count >= max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_names_match_known_kinds() {
        let kinds = [
            OperationKind::CalculateTax(CalculateTax::new(1.0)),
            OperationKind::AnalyzeDeductions(AnalyzeDeductions::default()),
            OperationKind::SaveForm(SaveForm {
                form_id: "f".into(),
                form_type: "1040".into(),
                fields: Map::new(),
            }),
            OperationKind::SubmitForm(SubmitForm { form_id: "f".into() }),
            OperationKind::StoreDocument(StoreDocument {
                document_id: "d".into(),
                file_name: "r.pdf".into(),
                content_type: None,
                size_bytes: 0,
            }),
            OperationKind::VerifyField(VerifyField {
                form_id: "f".into(),
                field: "ssn".into(),
                value: Value::Null,
            }),
            OperationKind::GenerateReport(GenerateReport {
                report_type: "annual".into(),
                period: None,
            }),
        ];

        let names: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
        assert_eq!(names, KNOWN_KINDS);
        assert!(kinds.iter().all(|k| k.is_known() && k.endpoint().is_some()));
    }

    #[test]
    fn operation_json_layout() {
        let op = Operation::new(
            OperationKind::from_parts("calculate-tax", json!({"income": 1000})).unwrap(),
            42,
        );
        let value = serde_json::to_value(&op).unwrap();

        assert_eq!(value["kind"], "calculate-tax");
        assert_eq!(value["payload"]["income"], 1000.0);
        assert_eq!(value["enqueuedAt"], 42);
        assert_eq!(value["retryCount"], 0);
        assert_eq!(value["status"], "pending");
        assert!(value.get("lastError").is_none());

        let decoded: Operation = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let stored = json!({
            "id": "abc",
            "kind": "unknownOperation",
            "payload": {"x": [1, 2]},
            "enqueuedAt": 1,
            "retryCount": 2,
            "status": "failed"
        });

        let op: Operation = serde_json::from_value(stored.clone()).unwrap();
        assert!(!op.kind.is_known());
        assert_eq!(op.kind.name(), "unknownOperation");
        assert_eq!(op.kind.endpoint(), None);
        assert_eq!(serde_json::to_value(&op).unwrap(), stored);
    }

    #[test]
    fn stored_payload_of_wrong_shape_still_decodes() {
        let stored = json!({
            "id": "a",
            "kind": "calculate-tax",
            "payload": {},
            "enqueuedAt": 1,
            "retryCount": 0,
            "status": "pending"
        });

        let op: Operation = serde_json::from_value(stored.clone()).unwrap();
        assert!(op.kind.is_malformed());
        assert_eq!(op.kind.name(), "calculate-tax");
        assert_eq!(op.kind.endpoint(), None);
        assert!(op.kind.validate().unwrap_err().is_validation());
        assert_eq!(serde_json::to_value(&op).unwrap(), stored);
    }

    #[test]
    fn malformed_known_payload_is_validation_error() {
        let err = OperationKind::from_parts("calculate-tax", json!({"income": "lots"})).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("calculate-tax"));
    }

    #[test]
    fn validation_rules() {
        assert!(OperationKind::CalculateTax(CalculateTax::new(1000.0))
            .validate()
            .is_ok());
        assert!(OperationKind::CalculateTax(CalculateTax::new(-5.0))
            .validate()
            .is_err());
        assert!(OperationKind::CalculateTax(CalculateTax::new(f64::NAN))
            .validate()
            .is_err());
        assert!(OperationKind::SubmitForm(SubmitForm { form_id: " ".into() })
            .validate()
            .is_err());

        let analyze = AnalyzeDeductions {
            tax_year: Some(1066),
            ..Default::default()
        };
        assert!(OperationKind::AnalyzeDeductions(analyze).validate().is_err());
    }

    #[test]
    fn record_failure_counts_up() {
        let mut op = Operation::new(OperationKind::CalculateTax(CalculateTax::new(1.0)), 0);
        op.mark_in_flight(10);
        assert_eq!(op.status, OperationStatus::InFlight);

        op.record_failure(11, "connection reset");
        op.record_failure(12, "connection reset");
        assert_eq!(op.retry_count, 2);
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.last_attempt_at, Some(12));
        assert!(!op.is_exhausted(3));

        op.record_failure(13, "connection reset");
        assert!(op.is_exhausted(3));
    }

    #[test]
    fn fresh_ids_are_unique() {
        let a = Operation::new(OperationKind::SubmitForm(SubmitForm { form_id: "a".into() }), 0);
        let b = Operation::new(OperationKind::SubmitForm(SubmitForm { form_id: "a".into() }), 0);
        assert_ne!(a.id, b.id);
    }
}
