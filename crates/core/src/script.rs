use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScriptError;
use crate::intent::normalize_trigger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScript {
    pub triggers: Vec<String>,
    pub prompts: Vec<Prompt>,
    pub closing: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormLink {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormCard {
    pub triggers: Vec<String>,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub links: Vec<FormLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger<'a> {
    Topic(&'a str),
    Forms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueScript {
    pub topics: BTreeMap<String, TopicScript>,
    pub forms: FormCard,
}

impl DialogueScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ScriptError> {
        let script: Self = serde_json::from_str(raw)?;
        script.validate()?;
        Ok(script)
    }

    pub fn topic(&self, name: &str) -> Option<&TopicScript> {
        self.topics.get(name)
    }

    pub fn match_trigger(&self, text: &str) -> Option<Trigger<'_>> {
        let wanted = normalize_trigger(text);
        if wanted.is_empty() {
            return None;
        }

        if self
            .forms
            .triggers
            .iter()
            .any(|trigger| normalize_trigger(trigger) == wanted)
        {
            return Some(Trigger::Forms);
        }

        self.topics
            .iter()
            .find(|(_, topic)| {
                topic
                    .triggers
                    .iter()
                    .any(|trigger| normalize_trigger(trigger) == wanted)
            })
            .map(|(name, _)| Trigger::Topic(name.as_str()))
    }

    pub fn trigger_phrases(&self) -> Vec<String> {
        self.forms
            .triggers
            .iter()
            .chain(self.topics.values().flat_map(|topic| topic.triggers.iter()))
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), ScriptError> {
        let mut seen = HashSet::new();
        let all_triggers = self
            .forms
            .triggers
            .iter()
            .chain(self.topics.values().flat_map(|topic| topic.triggers.iter()));
        for trigger in all_triggers {
            let normalized = normalize_trigger(trigger);
            if normalized.is_empty() {
                return Err(ScriptError::Invalid("empty trigger phrase".to_string()));
            }
            if !seen.insert(normalized) {
                return Err(ScriptError::Invalid(format!(
                    "trigger phrase '{}' is used more than once",
                    trigger
                )));
            }
        }

        for (name, topic) in &self.topics {
            if topic.prompts.is_empty() {
                return Err(ScriptError::Invalid(format!("topic '{}' has no prompts", name)));
            }
            if topic.prompts.iter().any(|prompt| prompt.text.trim().is_empty()) {
                return Err(ScriptError::Invalid(format!(
                    "topic '{}' has an empty prompt",
                    name
                )));
            }
            if topic.closing.trim().is_empty() {
                return Err(ScriptError::Invalid(format!(
                    "topic '{}' has no closing message",
                    name
                )));
            }
        }

        if self.forms.title.trim().is_empty() {
            return Err(ScriptError::Invalid("form card has no title".to_string()));
        }
        if self.forms.links.is_empty() {
            return Err(ScriptError::Invalid("form card has no links".to_string()));
        }
        for link in &self.forms.links {
            if !(link.url.starts_with("https://") || link.url.starts_with("http://")) {
                return Err(ScriptError::Invalid(format!(
                    "form link '{}' is not an http(s) url",
                    link.label
                )));
            }
        }

        Ok(())
    }

    pub fn builtin() -> Self {
        let mut topics = BTreeMap::new();

        topics.insert(
            "talk".to_string(),
            TopicScript {
                triggers: vec!["talk".to_string()],
                prompts: vec![
                    prompt(
                        "Hi, I'm here to listen. How has your day been so far?",
                        &["Good", "Okay", "Not great"],
                    ),
                    prompt("What has been on your mind the most lately?", &[]),
                    prompt(
                        "How have you been sleeping this week?",
                        &["Well", "So-so", "Badly"],
                    ),
                    prompt(
                        "Is there someone you can talk to when things get heavy?",
                        &["Yes", "Not really"],
                    ),
                ],
                closing: "Thank you for sharing with me. You can type \"talk\" any time you want to talk again.".to_string(),
            },
        );

        topics.insert(
            "relax".to_string(),
            TopicScript {
                triggers: vec!["relax".to_string()],
                prompts: vec![
                    prompt(
                        "Let's slow down together. Find a comfortable position and tell me when you're ready.",
                        &["Ready"],
                    ),
                    prompt(
                        "Breathe in through your nose for four counts, hold for four, and breathe out for six. Repeat three times.",
                        &["Done"],
                    ),
                    prompt(
                        "Notice five things you can see around you. Which one caught your attention first?",
                        &[],
                    ),
                ],
                closing: "Well done. Come back and type \"relax\" whenever you need a pause.".to_string(),
            },
        );

        topics.insert(
            "encouragement".to_string(),
            TopicScript {
                triggers: vec!["encouragement".to_string()],
                prompts: vec![
                    prompt("What is one thing you handled well recently, even a small one?", &[]),
                    prompt(
                        "What would you say to a friend who was in your situation?",
                        &[],
                    ),
                ],
                closing: "You are doing better than you think. One step at a time is still progress.".to_string(),
            },
        );

        topics.insert(
            "stress".to_string(),
            TopicScript {
                triggers: vec!["stress".to_string()],
                prompts: vec![
                    prompt(
                        "On a scale from 1 to 5, how stressed do you feel right now?",
                        &["1", "2", "3", "4", "5"],
                    ),
                    prompt(
                        "What is the main source of that stress?",
                        &["Study", "Work", "Family", "Money", "Other"],
                    ),
                    prompt("Which part of it feels most within your control?", &[]),
                ],
                closing: "Thanks for checking in. Try to take one small action on the part you can control today.".to_string(),
            },
        );

        topics.insert(
            "chitchat".to_string(),
            TopicScript {
                triggers: vec!["chitchat".to_string()],
                prompts: vec![
                    prompt(
                        "What kind of thing do you enjoy in your free time?",
                        &["Music", "Movies", "Games", "Sports"],
                    ),
                    prompt("Nice! Tell me about a favourite one.", &[]),
                ],
                closing: "That was fun. Type \"chitchat\" whenever you want to chat again.".to_string(),
            },
        );

        Self {
            topics,
            forms: FormCard {
                triggers: vec!["survey".to_string()],
                title: "Wellbeing check-in".to_string(),
                body: Some("Choose a questionnaire to fill in.".to_string()),
                links: vec![
                    FormLink {
                        label: "Stress assessment".to_string(),
                        url: "https://forms.gle/stress-assessment".to_string(),
                    },
                    FormLink {
                        label: "Depression screening".to_string(),
                        url: "https://forms.gle/depression-screening".to_string(),
                    },
                ],
            },
        }
    }
}

fn prompt(text: &str, options: &[&str]) -> Prompt {
    Prompt {
        text: text.to_string(),
        options: options.iter().map(|option| option.to_string()).collect(),
    }
}
