//! Field-level merge functions.

use serde_json::Value;

use crate::compare::normalize_text;
use crate::schema::{MergeRule, SynonymGroups};

/// Split free text into sentences, keeping terminal punctuation.
///
/// Text without terminal punctuation is a single sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            push_sentence(&mut sentences, &current);
            current.clear();
        }
    }
    push_sentence(&mut sentences, &current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    // A run of punctuation ("...") continues the previous sentence.
    if trimmed.chars().all(|c| matches!(c, '.' | '!' | '?')) {
        if let (Some(last), false) = (sentences.last_mut(), trimmed.is_empty()) {
            last.push_str(trimmed);
        }
        return;
    }
    sentences.push(trimmed.to_string());
}

/// Union of unique sentences, local sentences first, in their original order.
///
/// When the remote adds nothing new, the local text is returned untouched.
pub fn merge_sentences(local: &str, remote: &str) -> String {
    let local_sentences = split_sentences(local);
    let mut seen: Vec<String> = local_sentences.iter().map(|s| normalize_text(s)).collect();
    let mut additions = Vec::new();

    for sentence in split_sentences(remote) {
        let key = normalize_text(&sentence);
        if !seen.contains(&key) {
            seen.push(key);
            additions.push(sentence);
        }
    }

    if additions.is_empty() {
        return local.to_string();
    }
    if local_sentences.is_empty() {
        return additions.join(" ");
    }
    let mut merged = local_sentences;
    merged.extend(additions);
    merged.join(" ")
}

/// Canonical member of the synonym group containing both values, if any.
pub fn canonical_synonym(groups: SynonymGroups, a: &str, b: &str) -> Option<&'static str> {
    let (a, b) = (normalize_text(a), normalize_text(b));
    groups
        .iter()
        .find(|group| group.contains(&a.as_str()) && group.contains(&b.as_str()))
        .map(|group| group[0])
}

/// Whether a value belongs to any synonym group.
pub fn is_known_synonym(groups: SynonymGroups, value: &str) -> bool {
    let value = normalize_text(value);
    groups.iter().any(|group| group.contains(&value.as_str()))
}

fn as_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Null => Some(""),
        _ => None,
    }
}

/// Whether the rule defines a merge for these two values.
pub fn can_merge(rule: MergeRule, local: &Value, remote: &Value) -> bool {
    merge_values(rule, local, remote).is_some()
}

/// Merge two values under a rule; `None` when the rule does not apply.
pub fn merge_values(rule: MergeRule, local: &Value, remote: &Value) -> Option<Value> {
    match rule {
        MergeRule::None => None,
        MergeRule::SentenceUnion => {
            let (l, r) = (as_text(local)?, as_text(remote)?);
            Some(Value::String(merge_sentences(l, r)))
        }
        MergeRule::Synonyms(groups) => {
            let (l, r) = (local.as_str()?, remote.as_str()?);
            canonical_synonym(groups, l, r).map(|c| Value::String(c.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STATUS: SynonymGroups = &[&["done", "completed", "finished"], &["todo", "open"]];

    #[test]
    fn disjoint_sentences_are_both_kept() {
        let merged = merge_sentences("Bring chairs.", "Bring tables.");
        assert_eq!(merged, "Bring chairs. Bring tables.");
    }

    #[test]
    fn identical_text_is_unchanged() {
        let text = "Bring chairs.  Meet at noon!";
        assert_eq!(merge_sentences(text, text), text);
    }

    #[test]
    fn shared_sentences_appear_once() {
        let merged = merge_sentences(
            "Bring chairs. Meet at noon.",
            "Meet at noon. Bring snacks.",
        );
        assert_eq!(merged, "Bring chairs. Meet at noon. Bring snacks.");
    }

    #[test]
    fn sentence_match_ignores_case_and_spacing() {
        let merged = merge_sentences("Bring  chairs.", "bring chairs.");
        assert_eq!(merged, "Bring  chairs.");
    }

    #[test]
    fn empty_local_takes_remote_sentences() {
        assert_eq!(merge_sentences("", "Call back."), "Call back.");
    }

    #[test]
    fn ellipsis_stays_with_its_sentence() {
        assert_eq!(
            split_sentences("Wait... then go."),
            vec!["Wait...".to_string(), "then go.".to_string()]
        );
    }

    #[test]
    fn unterminated_text_is_one_sentence() {
        assert_eq!(split_sentences("no punctuation"), vec!["no punctuation"]);
    }

    #[test]
    fn synonyms_resolve_to_canonical() {
        assert_eq!(canonical_synonym(STATUS, "Finished", "completed"), Some("done"));
        assert_eq!(canonical_synonym(STATUS, "done", "open"), None);
        assert_eq!(canonical_synonym(STATUS, "done", "archived"), None);
    }

    #[test]
    fn merge_rules() {
        assert!(can_merge(
            MergeRule::SentenceUnion,
            &json!("A."),
            &Value::Null
        ));
        assert!(!can_merge(MergeRule::SentenceUnion, &json!("A."), &json!(5)));
        assert!(!can_merge(MergeRule::None, &json!("a"), &json!("b")));
        assert_eq!(
            merge_values(MergeRule::Synonyms(STATUS), &json!("finished"), &json!("done")),
            Some(json!("done"))
        );
    }
}
