//! Generic card record envelope and query metadata.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError as FieldViolation, ValidationErrors, ValidationErrorsKind};

/// Payload type carried by a card record.
pub trait CardData: Validate + Serialize + DeserializeOwned + Send + 'static {
    /// Value of `kind` used when an incoming record omits it.
    const KIND: &'static str;
}

/// Generic query/card metadata. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    /// Query start time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Query end time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Query duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<i64>,
    /// Any other metadata keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A dashboard card record: identity, optional typed data and optional metadata.
///
/// Accepts `cardId` / `reportId` as aliases on input. A missing `kind` is filled
/// from [`CardData::KIND`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardRecord<D, M = QueryMetadata> {
    /// Card kind, e.g. `"number"`.
    pub kind: String,
    /// Owning report.
    pub report_id: String,
    /// Card id, unique within the report.
    pub card_id: String,
    /// Typed card payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<D>,
    /// Card metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<M>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "D: Deserialize<'de>, M: Deserialize<'de>"))]
struct IncomingRecord<D, M> {
    #[serde(default)]
    kind: Option<String>,
    #[serde(alias = "reportId")]
    report_id: String,
    #[serde(alias = "cardId")]
    card_id: String,
    #[serde(default)]
    data: Option<D>,
    #[serde(default)]
    meta: Option<M>,
}

impl<'de, D, M> Deserialize<'de> for CardRecord<D, M>
where
    D: CardData,
    M: Deserialize<'de>,
{
    fn deserialize<De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: Deserializer<'de>,
    {
        let incoming = IncomingRecord::<D, M>::deserialize(deserializer)?;
        Ok(Self {
            kind: incoming.kind.unwrap_or_else(|| D::KIND.to_string()),
            report_id: incoming.report_id,
            card_id: incoming.card_id,
            data: incoming.data,
            meta: incoming.meta,
        })
    }
}

impl<D: CardData, M> CardRecord<D, M> {
    /// Create a record of this card kind.
    pub fn new(report_id: impl Into<String>, card_id: impl Into<String>, data: D) -> Self {
        Self {
            kind: D::KIND.to_string(),
            report_id: report_id.into(),
            card_id: card_id.into(),
            data: Some(data),
            meta: None,
        }
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: M) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl<D: Serialize, M: Serialize> CardRecord<D, M> {
    /// Flatten into the dashboard wire record.
    ///
    /// `kind`, `cardId` and `reportId` at the top level, `meta` as a JSON string
    /// (or `null`), and the fields of `data` merged in when it is an object.
    /// Non-object data stays under `data`.
    pub fn to_record(&self) -> Result<Value, serde_json::Error> {
        let mut out = Map::new();
        out.insert("kind".into(), Value::String(self.kind.clone()));
        out.insert("cardId".into(), Value::String(self.card_id.clone()));
        out.insert("reportId".into(), Value::String(self.report_id.clone()));
        let meta = match &self.meta {
            Some(meta) => Value::String(serde_json::to_string(meta)?),
            None => Value::Null,
        };
        out.insert("meta".into(), meta);

        match serde_json::to_value(&self.data)? {
            Value::Object(fields) => out.extend(fields),
            other => {
                out.insert("data".into(), other);
            }
        }
        Ok(Value::Object(out))
    }
}

fn blank(code: &'static str) -> FieldViolation {
    let mut violation = FieldViolation::new(code);
    violation.message = Some("must not be blank".into());
    violation
}

impl<D: Validate, M: Validate> Validate for CardRecord<D, M> {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.kind.trim().is_empty() {
            errors.add("kind", blank("required"));
        }
        if self.report_id.trim().is_empty() {
            errors.add("report_id", blank("required"));
        }
        if self.card_id.trim().is_empty() {
            errors.add("card_id", blank("required"));
        }
        if let Some(Err(nested)) = self.data.as_ref().map(Validate::validate) {
            errors
                .errors_mut()
                .insert("data".into(), ValidationErrorsKind::Struct(Box::new(nested)));
        }
        if let Some(Err(nested)) = self.meta.as_ref().map(Validate::validate) {
            errors
                .errors_mut()
                .insert("meta".into(), ValidationErrorsKind::Struct(Box::new(nested)));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Neither type implements `Default`.
    #[derive(Debug, PartialEq, Serialize, Deserialize, Validate)]
    struct Gauge {
        level: u8,
    }

    impl CardData for Gauge {
        const KIND: &'static str = "gauge";
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize, Validate)]
    struct Source {
        system: String,
    }

    #[test]
    fn custom_card_data_needs_no_default() {
        let rec: CardRecord<Gauge, Source> = serde_json::from_value(json!({
            "cardId": "g", "reportId": "r",
            "data": {"level": 3},
            "meta": {"system": "plc"}
        }))
        .unwrap();
        assert_eq!(rec.kind, "gauge");
        assert_eq!(rec.data, Some(Gauge { level: 3 }));
        assert_eq!(rec.meta.map(|m| m.system).as_deref(), Some("plc"));

        let bare: CardRecord<Gauge, Source> =
            serde_json::from_value(json!({"card_id": "g", "report_id": "r"})).unwrap();
        assert!(bare.data.is_none());
        assert!(bare.meta.is_none());
    }
}
