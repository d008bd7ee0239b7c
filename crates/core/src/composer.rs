use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{CardAction, CardButton, CardLayout, LookupRecord, OutboundMessage, Reply};

pub const UNAVAILABLE_TEXT: &str =
    "Sorry, I can't reach that service right now. Please try again in a moment.";

pub fn compose(reply: &Reply) -> OutboundMessage {
    match reply {
        Reply::Prompt { prompt, .. } if prompt.options.is_empty() => {
            OutboundMessage::PlainText(prompt.text.clone())
        }
        Reply::Prompt { prompt, .. } => OutboundMessage::Card(card(
            &prompt.text,
            None,
            prompt
                .options
                .iter()
                .map(|option| CardButton {
                    label: option.clone(),
                    action: CardAction::Message(option.clone()),
                })
                .collect(),
        )),
        Reply::Closing { text, .. } => OutboundMessage::PlainText(text.clone()),
        Reply::FormLinks(forms) => OutboundMessage::Card(card(
            &forms.title,
            forms.body.as_deref(),
            forms
                .links
                .iter()
                .map(|link| CardButton {
                    label: link.label.clone(),
                    action: CardAction::Uri(link.url.clone()),
                })
                .collect(),
        )),
        Reply::LookupReport { name, records } => {
            OutboundMessage::PlainText(format_lookup_report(name, records))
        }
        Reply::Assistant(text) if text.trim().is_empty() => {
            OutboundMessage::PlainText(UNAVAILABLE_TEXT.to_string())
        }
        Reply::Assistant(text) => OutboundMessage::PlainText(text.trim().to_string()),
        Reply::Help { triggers } => OutboundMessage::PlainText(help_text(triggers)),
        Reply::Unavailable => OutboundMessage::PlainText(UNAVAILABLE_TEXT.to_string()),
    }
}

pub fn card(title: &str, body: Option<&str>, buttons: Vec<CardButton>) -> CardLayout {
    CardLayout {
        title: title.trim().to_string(),
        body: body
            .map(str::trim)
            .filter(|body| !body.is_empty())
            .map(ToString::to_string),
        buttons,
    }
}

pub fn not_found_text(name: &str) -> String {
    format!("No records found for {}.", name)
}

pub fn help_text(triggers: &[String]) -> String {
    let mut text = String::from("Sorry, I didn't catch that. You can type one of:\n");
    for trigger in triggers {
        text.push_str(&format!("- {}\n", trigger));
    }
    text.push_str("- show info of <name>");
    text
}

// Categories and extra field keys sort alphabetically; records keep store order.
pub fn format_lookup_report(name: &str, records: &[LookupRecord]) -> String {
    if records.is_empty() {
        return not_found_text(name);
    }

    let mut sections: BTreeMap<String, Vec<&LookupRecord>> = BTreeMap::new();
    for record in records {
        let category = record.category.trim().to_lowercase();
        let category = if category.is_empty() {
            "uncategorized".to_string()
        } else {
            category
        };
        sections.entry(category).or_default().push(record);
    }

    let mut lines = vec![format!(
        "Records for {} ({} total)",
        name,
        records.len()
    )];
    for (category, entries) in sections {
        lines.push(String::new());
        lines.push(format!("== {} ==", category));
        for record in entries {
            lines.push(format!("- {}", record_line(record)));
        }
    }

    lines.join("\n")
}

fn record_line(record: &LookupRecord) -> String {
    let mut parts = Vec::new();
    if let Some(score) = record.score {
        parts.push(format!("score: {}", format_score(score)));
    }
    if let Some(at) = record.recorded_at.as_deref().filter(|at| !at.is_empty()) {
        parts.push(format!("date: {}", at));
    }
    for (key, value) in &record.fields {
        let rendered = match value {
            Value::Null => continue,
            Value::String(text) if text.is_empty() => continue,
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        parts.push(format!("{}: {}", key, rendered));
    }

    if parts.is_empty() {
        "(no details)".to_string()
    } else {
        parts.join(", ")
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{}", score as i64)
    } else {
        format!("{:.2}", score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{DialogueScript, Prompt};

    fn record(category: &str, score: Option<f64>) -> LookupRecord {
        LookupRecord {
            category: category.to_string(),
            score,
            recorded_at: None,
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn prompt_with_options_becomes_card() {
        let reply = Reply::Prompt {
            topic: "talk".to_string(),
            step: 0,
            prompt: Prompt {
                text: "How are you?".to_string(),
                options: vec!["Good".to_string(), "Bad".to_string()],
            },
        };
        let OutboundMessage::Card(layout) = compose(&reply) else {
            panic!("expected card");
        };
        assert_eq!(layout.title, "How are you?");
        assert_eq!(
            layout.buttons[1].action,
            CardAction::Message("Bad".to_string())
        );
    }

    #[test]
    fn prompt_without_options_is_plain_text() {
        let reply = Reply::Prompt {
            topic: "talk".to_string(),
            step: 1,
            prompt: Prompt {
                text: "Tell me more".to_string(),
                options: Vec::new(),
            },
        };
        assert_eq!(
            compose(&reply),
            OutboundMessage::PlainText("Tell me more".to_string())
        );
    }

    #[test]
    fn form_links_card_has_uri_buttons() {
        let forms = DialogueScript::builtin().forms;
        let OutboundMessage::Card(layout) = compose(&Reply::FormLinks(forms)) else {
            panic!("expected card");
        };
        assert_eq!(layout.buttons.len(), 2);
        assert!(layout
            .buttons
            .iter()
            .all(|button| matches!(button.action, CardAction::Uri(_))));
    }

    #[test]
    fn empty_lookup_is_explicit_not_found() {
        let message = compose(&Reply::LookupReport {
            name: "Bob".to_string(),
            records: Vec::new(),
        });
        assert_eq!(
            message,
            OutboundMessage::PlainText("No records found for Bob.".to_string())
        );
    }

    #[test]
    fn report_places_score_under_category_header() {
        let report = format_lookup_report("Alice", &[record("Depression", Some(12.0))]);
        let header = report.find("== depression ==").expect("section header");
        let score = report.find("score: 12").expect("score line");
        assert!(score > header);
        assert!(!report.contains("12.0"));
    }

    #[test]
    fn report_sections_are_sorted() {
        let report = format_lookup_report(
            "Alice",
            &[record("stress", Some(3.5)), record("anxiety", Some(7.0))],
        );
        assert!(report.find("== anxiety ==").unwrap() < report.find("== stress ==").unwrap());
        assert!(report.contains("score: 3.50"));
    }

    #[test]
    fn help_lists_triggers() {
        let text = help_text(&["survey".to_string(), "talk".to_string()]);
        assert!(text.contains("- survey"));
        assert!(text.contains("- talk"));
    }

    #[test]
    fn blank_assistant_text_never_composes_empty() {
        assert!(!compose(&Reply::Assistant("  ".to_string())).is_empty());
    }
}
