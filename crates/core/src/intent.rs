use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Route, UserSession};
use crate::script::{DialogueScript, Trigger};

static LOOKUP_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^show\s+info\s+of\s+(.+)$").expect("lookup pattern compiles"));

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn normalize_trigger(input: &str) -> String {
    normalize_text(input).to_lowercase()
}

pub fn extract_lookup_name(text: &str) -> Option<String> {
    let text = normalize_text(text);
    LOOKUP_PREFIX
        .captures(&text)
        .and_then(|captures| captures.get(1))
        .map(|name| normalize_text(name.as_str()))
        .filter(|name| !name.is_empty())
}

pub struct RouteContext<'a> {
    pub text: &'a str,
    pub session: Option<&'a UserSession>,
    pub script: &'a DialogueScript,
}

#[derive(Clone, Copy)]
pub struct RouteRule {
    pub name: &'static str,
    pub apply: fn(&RouteContext<'_>) -> Option<Route>,
}

#[derive(Clone)]
pub struct IntentRouter {
    script: Arc<DialogueScript>,
    rules: Vec<RouteRule>,
}

impl IntentRouter {
    pub fn new(script: Arc<DialogueScript>, rules: Vec<RouteRule>) -> Self {
        Self { script, rules }
    }

    pub fn standard(script: Arc<DialogueScript>) -> Self {
        Self::new(
            script,
            vec![
                RouteRule {
                    name: "active_dialogue",
                    apply: continue_active_dialogue,
                },
                RouteRule {
                    name: "trigger_phrase",
                    apply: match_trigger_phrase,
                },
                RouteRule {
                    name: "lookup_prefix",
                    apply: match_lookup_prefix,
                },
                RouteRule {
                    name: "assistant_fallback",
                    apply: assistant_fallback,
                },
            ],
        )
    }

    pub fn script(&self) -> &DialogueScript {
        &self.script
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name).collect()
    }

    pub fn route(&self, text: &str, session: Option<&UserSession>) -> (Route, &'static str) {
        let context = RouteContext {
            text,
            session,
            script: &self.script,
        };

        self.rules
            .iter()
            .find_map(|rule| (rule.apply)(&context).map(|route| (route, rule.name)))
            .unwrap_or_else(|| {
                (
                    Route::Assistant {
                        text: text.to_string(),
                    },
                    "default",
                )
            })
    }
}

fn continue_active_dialogue(context: &RouteContext<'_>) -> Option<Route> {
    let topic = context.session?.active_topic()?;
    context.script.topic(topic)?;

    // A trigger phrase mid-flow restarts or switches topics instead of
    // being taken as an answer.
    if context.script.match_trigger(context.text).is_some() {
        return None;
    }

    Some(Route::ContinueDialogue {
        topic: topic.to_string(),
        answer: context.text.to_string(),
    })
}

fn match_trigger_phrase(context: &RouteContext<'_>) -> Option<Route> {
    match context.script.match_trigger(context.text)? {
        Trigger::Forms => Some(Route::FormLinks),
        Trigger::Topic(topic) => {
            let restart = context
                .session
                .and_then(UserSession::active_topic)
                .map(|active| active == topic)
                .unwrap_or(false);
            Some(Route::StartTopic {
                topic: topic.to_string(),
                restart,
            })
        }
    }
}

fn match_lookup_prefix(context: &RouteContext<'_>) -> Option<Route> {
    extract_lookup_name(context.text).map(|name| Route::Lookup { name })
}

fn assistant_fallback(context: &RouteContext<'_>) -> Option<Route> {
    Some(Route::Assistant {
        text: context.text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn router() -> IntentRouter {
        IntentRouter::standard(Arc::new(DialogueScript::builtin()))
    }

    fn session_in(topic: &str) -> UserSession {
        let mut session = UserSession::new("U1", Duration::minutes(30));
        session.topic = Some(topic.to_string());
        session.step = 1;
        session
    }

    #[test]
    fn active_dialogue_takes_any_text_as_answer() {
        let session = session_in("talk");
        let (route, rule) = router().route("show info of Alice", Some(&session));
        assert_eq!(rule, "active_dialogue");
        assert_eq!(
            route,
            Route::ContinueDialogue {
                topic: "talk".to_string(),
                answer: "show info of Alice".to_string()
            }
        );
    }

    #[test]
    fn same_trigger_mid_flow_restarts() {
        let session = session_in("talk");
        let (route, _) = router().route("talk", Some(&session));
        assert_eq!(
            route,
            Route::StartTopic {
                topic: "talk".to_string(),
                restart: true
            }
        );
    }

    #[test]
    fn other_trigger_mid_flow_switches_topic() {
        let session = session_in("talk");
        let (route, _) = router().route("Relax", Some(&session));
        assert_eq!(
            route,
            Route::StartTopic {
                topic: "relax".to_string(),
                restart: false
            }
        );
    }

    #[test]
    fn survey_routes_to_form_links() {
        assert_eq!(router().route("survey", None).0, Route::FormLinks);
    }

    #[test]
    fn lookup_prefix_extracts_name() {
        let (route, rule) = router().route("Show info of  Alice   Smith", None);
        assert_eq!(rule, "lookup_prefix");
        assert_eq!(
            route,
            Route::Lookup {
                name: "Alice Smith".to_string()
            }
        );
    }

    #[test]
    fn lookup_without_name_falls_through_to_assistant() {
        let (route, rule) = router().route("show info of", None);
        assert_eq!(rule, "assistant_fallback");
        assert!(matches!(route, Route::Assistant { .. }));
    }

    #[test]
    fn session_without_topic_does_not_continue() {
        let session = UserSession::new("U1", Duration::minutes(30));
        let (route, _) = router().route("hello there", Some(&session));
        assert_eq!(
            route,
            Route::Assistant {
                text: "hello there".to_string()
            }
        );
    }

    #[test]
    fn multi_line_text_still_matches_and_keeps_its_lines() {
        assert_eq!(
            router().route("show info of\nAlice", None).0,
            Route::Lookup {
                name: "Alice".to_string()
            }
        );
        assert_eq!(router().route("  Survey\n", None).0, Route::FormLinks);
        assert_eq!(
            router().route("line one\nline two", None).0,
            Route::Assistant {
                text: "line one\nline two".to_string()
            }
        );
    }

    #[test]
    fn rules_are_in_precedence_order() {
        assert_eq!(
            router().rule_names(),
            vec![
                "active_dialogue",
                "trigger_phrase",
                "lookup_prefix",
                "assistant_fallback"
            ]
        );
    }
}
