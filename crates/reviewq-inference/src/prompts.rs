//! Prompt construction and response parsing for review tasks.
//!
//! Items are numbered `1..=n` in the prompt instead of carrying their UUIDs;
//! the parser maps numbers back to ids and drops anything it cannot place.

use serde::Deserialize;

use reviewq_core::{ChecklistPrompt, DocumentPart, Error, ItemVerdict, Result};

pub const CHECKLIST_SYSTEM_PROMPT: &str = "You write review checklists. Read the documents and \
propose concrete, independently checkable requirements. Reply with a JSON array of strings and \
nothing else.";

pub const QA_SYSTEM_PROMPT: &str = "You answer questions about a completed document review. Use \
only the review evidence provided. If the evidence does not answer the question, say so.";

/// System prompt for item review, listing the allowed labels best first.
pub fn review_system_prompt(labels: &[String]) -> String {
    format!(
        "You review a document against numbered checklist items. For every item reply with an \
         object {{\"item\": <number>, \"evaluation\": <label>, \"comment\": <evidence>}} where \
         the label is one of {} (best first). Quote the passages that support your evaluation. \
         Reply with a JSON array of these objects and nothing else.",
        labels.join(", ")
    )
}

pub fn checklist_user_prompt(documents: &[DocumentPart], requirements: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(req) = requirements.map(str::trim).filter(|r| !r.is_empty()) {
        prompt.push_str("Additional requirements:\n");
        prompt.push_str(req);
        prompt.push_str("\n\n");
    }
    for doc in documents {
        push_document(&mut prompt, doc);
    }
    prompt
}

pub fn review_user_prompt(items: &[ChecklistPrompt], document: &DocumentPart) -> String {
    let mut prompt = String::from("Checklist:\n");
    for (i, item) in items.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, item.content));
    }
    prompt.push('\n');
    push_document(&mut prompt, document);
    prompt
}

pub fn qa_user_prompt(question: &str, context: &str) -> String {
    format!("Review evidence:\n{context}\n\nQuestion: {question}")
}

fn push_document(prompt: &mut String, doc: &DocumentPart) {
    if doc.total_parts > 1 {
        prompt.push_str(&format!(
            "Document: {} (part {}/{})\n",
            doc.document_name,
            doc.part_index + 1,
            doc.total_parts
        ));
    } else {
        prompt.push_str(&format!("Document: {}\n", doc.document_name));
    }
    prompt.push_str("<<<\n");
    prompt.push_str(&doc.text);
    prompt.push_str("\n>>>\n\n");
}

/// The outermost JSON array in `content`, ignoring code fences and prose.
fn json_array(content: &str) -> Result<&str> {
    let start = content.find('[');
    let end = content.rfind(']');
    match (start, end) {
        (Some(s), Some(e)) if s < e => Ok(&content[s..=e]),
        _ => Err(Error::Inference(format!(
            "Model reply contains no JSON array: {}",
            truncate(content, 200)
        ))),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn parse_checklist(content: &str) -> Result<Vec<String>> {
    let items: Vec<String> = serde_json::from_str(json_array(content)?)
        .map_err(|e| Error::Inference(format!("Malformed checklist reply: {e}")))?;
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[derive(Deserialize)]
struct RawVerdict {
    item: usize,
    evaluation: String,
    #[serde(default)]
    comment: String,
}

/// Map numbered verdicts back to item ids. Out-of-range numbers and
/// duplicates are dropped; the caller treats missing items as failures.
pub fn parse_verdicts(content: &str, items: &[ChecklistPrompt]) -> Result<Vec<ItemVerdict>> {
    let raw: Vec<RawVerdict> = serde_json::from_str(json_array(content)?)
        .map_err(|e| Error::Inference(format!("Malformed review reply: {e}")))?;

    let mut seen = vec![false; items.len()];
    let mut verdicts = Vec::with_capacity(items.len());
    for v in raw {
        let Some(idx) = v.item.checked_sub(1).filter(|i| *i < items.len()) else {
            continue;
        };
        if std::mem::replace(&mut seen[idx], true) {
            continue;
        }
        verdicts.push(ItemVerdict {
            checklist_item_id: items[idx].id,
            evaluation: v.evaluation.trim().to_string(),
            comment: v.comment.trim().to_string(),
        });
    }
    Ok(verdicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn items(n: usize) -> Vec<ChecklistPrompt> {
        (0..n)
            .map(|i| ChecklistPrompt {
                id: Uuid::new_v4(),
                content: format!("Requirement {}", i + 1),
            })
            .collect()
    }

    fn part(index: usize, total: usize) -> DocumentPart {
        DocumentPart {
            document_name: "contract.txt".into(),
            text: "The supplier keeps logs for 30 days.".into(),
            part_index: index,
            total_parts: total,
        }
    }

    #[test]
    fn test_review_prompt_numbers_items_and_marks_parts() {
        let prompt = review_user_prompt(&items(2), &part(1, 3));
        assert!(prompt.contains("1. Requirement 1\n2. Requirement 2"));
        assert!(prompt.contains("(part 2/3)"));
        assert!(!review_user_prompt(&items(1), &part(0, 1)).contains("part"));
    }

    #[test]
    fn test_system_prompt_lists_labels() {
        let prompt = review_system_prompt(&["A".into(), "B".into(), "C".into()]);
        assert!(prompt.contains("A, B, C"));
    }

    #[test]
    fn test_parse_checklist_strips_fences_and_blanks() {
        let reply = "```json\n[\"Retention stated\", \" \", \"Processor named \"]\n```";
        assert_eq!(
            parse_checklist(reply).unwrap(),
            vec!["Retention stated".to_string(), "Processor named".to_string()]
        );
        assert!(parse_checklist("no list here").is_err());
    }

    #[test]
    fn test_parse_verdicts_maps_numbers_to_ids() {
        let items = items(3);
        let reply = r#"Here you go:
[{"item": 2, "evaluation": "B", "comment": "partial"},
 {"item": 1, "evaluation": "A", "comment": "ok"},
 {"item": 1, "evaluation": "C", "comment": "duplicate"},
 {"item": 9, "evaluation": "A"}]"#;
        let verdicts = parse_verdicts(reply, &items).unwrap();
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].checklist_item_id, items[1].id);
        assert_eq!(verdicts[0].evaluation, "B");
        assert_eq!(verdicts[1].checklist_item_id, items[0].id);
        assert_eq!(verdicts[1].comment, "ok");
    }

    #[test]
    fn test_parse_verdicts_rejects_malformed_reply() {
        let err = parse_verdicts(r#"[{"evaluation": "A"}]"#, &items(1)).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }
}
