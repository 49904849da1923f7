//! Relation inference from extraction metadata.
//!
//! The Cognifier only reports relations it saw stated outright. A second
//! pass derives the ones implied by entity tags and attributes, so "Sarah,
//! tagged `department:engineering`" and "Acme, her `employer` attribute"
//! still connect even when the sentence never said "works at".
//!
//! Heuristics, all within one batch:
//! - `employer` attribute naming another entity → `works_at`
//! - `project` attribute naming another entity → `works_on`
//! - a `skill:<s>` or `interest:<i>` tag naming another entity → `has_interest`
//! - two person-like entities sharing a `department:<d>` tag → `colleague`

use rmk_cognify::{ExtractedEntity, ExtractedRelation};
use rmk_core::normalize::normalize_name;
use std::collections::{HashMap, HashSet};

fn relation(from: &str, to: &str, relation_type: &str) -> ExtractedRelation {
    ExtractedRelation {
        from_name: from.to_string(),
        to_name: to.to_string(),
        relation_type: relation_type.to_string(),
    }
}

fn tag_value<'a>(entity: &'a ExtractedEntity, prefix: &str) -> Option<&'a str> {
    entity
        .tags
        .iter()
        .find_map(|tag| tag.strip_prefix(prefix))
}

fn is_person(entity: &ExtractedEntity) -> bool {
    entity.entity_type.eq_ignore_ascii_case("user")
        || entity.tags.iter().any(|t| t == "person")
        || entity.attributes.contains_key("role")
}

/// Derive implied relations for one batch of extracted entities.
#[must_use]
pub fn infer_relations(entities: &[ExtractedEntity]) -> Vec<ExtractedRelation> {
    let by_normalized: HashMap<String, &ExtractedEntity> = entities
        .iter()
        .map(|e| (normalize_name(&e.name), e))
        .collect();
    let in_batch = |name: &str| by_normalized.contains_key(&normalize_name(name));

    let mut inferred = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |rel: ExtractedRelation| {
        let key = (
            normalize_name(&rel.from_name),
            normalize_name(&rel.to_name),
            rel.relation_type.clone(),
        );
        if seen.insert(key) {
            inferred.push(rel);
        }
    };

    for entity in entities {
        if let Some(employer) = entity.attributes.get("employer") {
            if in_batch(employer) {
                push(relation(&entity.name, employer, "works_at"));
            }
        }
        if let Some(project) = entity.attributes.get("project") {
            if in_batch(project) {
                push(relation(&entity.name, project, "works_on"));
            }
        }
        for prefix in ["skill:", "interest:"] {
            if let Some(value) = tag_value(entity, prefix) {
                if in_batch(value) {
                    push(relation(&entity.name, value, "has_interest"));
                }
            }
        }
    }

    // Shared department implies colleagues, pairwise, one direction per pair.
    let mut departments: HashMap<String, Vec<&ExtractedEntity>> = HashMap::new();
    for entity in entities.iter().filter(|e| is_person(e)) {
        if let Some(department) = tag_value(entity, "department:") {
            departments
                .entry(department.to_string())
                .or_default()
                .push(entity);
        }
    }
    for members in departments.values() {
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                push(relation(&members[i].name, &members[j].name, "colleague"));
            }
        }
    }

    inferred
}
