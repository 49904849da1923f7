//! Wire shapes of the Cognifier HTTP contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One unit of raw content submitted for extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognifyItem {
    pub source_id: String,
    pub source_table: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw_data: serde_json::Value,
}

/// An entity the Cognifier extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A relation the Cognifier extracted, endpoints by entity name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub from_name: String,
    pub to_name: String,
    #[serde(rename = "type")]
    pub relation_type: String,
}

/// Extraction result for one submitted item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognifyResult {
    pub source_id: String,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
    #[serde(default)]
    pub summary: String,
}

/// Request body of `POST /summarize-community`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunitySummaryRequest {
    pub community_name: String,
    pub community_type: String,
    pub entities: Vec<String>,
    pub max_summary_length: usize,
}

/// Response of `POST /summarize-community`.
///
/// Also carries the synthesis fields used when the "community" is a batch
/// of crystallised fact summaries being distilled into an insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunitySummary {
    pub community_name: String,
    pub summary: String,
    #[serde(default)]
    pub insight_type: String,
    #[serde(default)]
    pub action_suggestion: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Request body of `POST /summarize-global`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalOverviewRequest {
    pub namespace: String,
    pub community_summaries: Vec<String>,
    pub total_entities: usize,
}

/// Response of `POST /summarize-global`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalOverview {
    pub namespace: String,
    pub overview: String,
    #[serde(default)]
    pub themes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EmbedRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbedResponse {
    pub embedding: Vec<f32>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_cognify_result_tolerates_missing_fields() {
        let json = r#"{"source_id": "ev1"}"#;
        let result: CognifyResult = serde_json::from_str(json).unwrap();
        assert!(result.entities.is_empty());
        assert!(result.relations.is_empty());
        assert!(result.summary.is_empty());
    }

    #[test]
    fn test_entity_type_field_rename() {
        let json = r#"{"name": "Acme", "type": "Entity"}"#;
        let entity: ExtractedEntity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.entity_type, "Entity");

        let back = serde_json::to_value(&entity).unwrap();
        assert_eq!(back["type"], "Entity");
    }

    #[test]
    fn test_relation_round_trip() {
        let relation = ExtractedRelation {
            from_name: "alice".into(),
            to_name: "Acme".into(),
            relation_type: "WORKS_AT".into(),
        };
        let json = serde_json::to_string(&relation).unwrap();
        assert!(json.contains("\"type\":\"WORKS_AT\""));
        let back: ExtractedRelation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.relation_type, "WORKS_AT");
    }
}
