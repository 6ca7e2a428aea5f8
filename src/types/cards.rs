//! Built-in card kinds.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError as FieldViolation, ValidationErrors};

use super::record::{CardData, CardRecord, QueryMetadata};

/// Chart card: a list of data points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ChartCardData {
    /// Data points, one object per point.
    pub data: Vec<Map<String, Value>>,
}

impl CardData for ChartCardData {
    const KIND: &'static str = "chart";
}

/// Table card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TableCardData {
    /// Row objects keyed by column name.
    pub rows: Vec<Map<String, Value>>,
    /// Column order for display.
    pub columns: Vec<String>,
    /// Total row count when `rows` is one page of a larger result.
    #[serde(default, alias = "total_count", skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
}

impl CardData for TableCardData {
    const KIND: &'static str = "table";
}

/// Direction of a KPI trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Value went up.
    Up,
    /// Value went down.
    Down,
    /// No meaningful change.
    Neutral,
}

/// Number / KPI card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberCardData {
    /// Current value. Must be finite.
    pub value: f64,
    /// Value of the previous period, for comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
    /// Trend direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    /// Relative change in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_percentage: Option<f64>,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CardData for NumberCardData {
    const KIND: &'static str = "number";
}

impl Validate for NumberCardData {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let numbers = [
            ("value", Some(self.value)),
            ("previousValue", self.previous_value),
            ("trendPercentage", self.trend_percentage),
        ];
        for (field, value) in numbers {
            if value.is_some_and(|v| !v.is_finite()) {
                let mut violation = FieldViolation::new("finite");
                violation.message = Some("must be a finite number".into());
                errors.add(field, violation);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Metadata for number cards: display unit and format on top of the query metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct NumberCardMetadata {
    /// Display unit, e.g. `"EUR"` or `"%"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Display format hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Query timing and extra keys.
    #[serde(flatten)]
    pub query: QueryMetadata,
}

/// HTML card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HtmlCardData {
    /// Rendered content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Unprocessed HTML source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    /// Inline CSS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<String>,
}

impl CardData for HtmlCardData {
    const KIND: &'static str = "html";
}

// Width and height arrive as numbers from some dashboards.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

/// Embedded page card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct IframeCardData {
    /// Embedded page URL. Must not be empty.
    #[validate(length(min = 1))]
    pub url: String,
    /// Frame title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Frame width (CSS length or pixels).
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub width: Option<String>,
    /// Frame height (CSS length or pixels).
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub height: Option<String>,
}

impl CardData for IframeCardData {
    const KIND: &'static str = "iframe";
}

/// Markdown card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownCardData {
    /// Rendered content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Markdown source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_markdown: Option<String>,
    /// Inline CSS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<String>,
}

impl CardData for MarkdownCardData {
    const KIND: &'static str = "markdown";
}

/// Chart card record.
pub type ChartCardRecord = CardRecord<ChartCardData>;
/// Table card record.
pub type TableCardRecord = CardRecord<TableCardData>;
/// Number card record with display metadata.
pub type NumberCardRecord = CardRecord<NumberCardData, NumberCardMetadata>;
/// HTML card record.
pub type HtmlCardRecord = CardRecord<HtmlCardData>;
/// Iframe card record.
pub type IframeCardRecord = CardRecord<IframeCardData>;
/// Markdown card record.
pub type MarkdownCardRecord = CardRecord<MarkdownCardData>;
