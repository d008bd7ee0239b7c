use std::sync::Arc;

use crate::error::DialogueError;
use crate::models::Reply;
use crate::script::{DialogueScript, Prompt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueStep {
    Prompt {
        topic: String,
        step: usize,
        total: usize,
        prompt: Prompt,
    },
    Complete {
        topic: String,
        closing: String,
    },
}

impl DialogueStep {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

impl From<DialogueStep> for Reply {
    fn from(step: DialogueStep) -> Self {
        match step {
            DialogueStep::Prompt {
                topic,
                step,
                prompt,
                ..
            } => Reply::Prompt {
                topic,
                step,
                prompt,
            },
            DialogueStep::Complete { topic, closing } => Reply::Closing {
                topic,
                text: closing,
            },
        }
    }
}

// States are prompt indices 0..N; index N is terminal.
#[derive(Debug, Clone)]
pub struct DialogueEngine {
    script: Arc<DialogueScript>,
}

impl DialogueEngine {
    pub fn new(script: Arc<DialogueScript>) -> Self {
        Self { script }
    }

    pub fn opening(&self, topic: &str) -> Result<DialogueStep, DialogueError> {
        self.step_at(topic, 0)
    }

    pub fn step_at(&self, topic: &str, step: usize) -> Result<DialogueStep, DialogueError> {
        let script = self
            .script
            .topic(topic)
            .ok_or_else(|| DialogueError::UnknownTopic(topic.to_string()))?;

        Ok(match script.prompts.get(step) {
            Some(prompt) => DialogueStep::Prompt {
                topic: topic.to_string(),
                step,
                total: script.prompts.len(),
                prompt: prompt.clone(),
            },
            None => DialogueStep::Complete {
                topic: topic.to_string(),
                closing: script.closing.clone(),
            },
        })
    }

    pub fn prompt_count(&self, topic: &str) -> Option<usize> {
        self.script.topic(topic).map(|script| script.prompts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DialogueEngine {
        DialogueEngine::new(Arc::new(DialogueScript::builtin()))
    }

    #[test]
    fn opening_is_first_prompt() {
        let script = DialogueScript::builtin();
        let step = engine().opening("talk").unwrap();
        match step {
            DialogueStep::Prompt { step, prompt, .. } => {
                assert_eq!(step, 0);
                assert_eq!(prompt, script.topics["talk"].prompts[0]);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn talk_completes_after_exactly_n_prompts() {
        let engine = engine();
        let total = engine.prompt_count("talk").unwrap();
        for index in 0..total {
            assert!(!engine.step_at("talk", index).unwrap().is_complete());
        }
        assert!(engine.step_at("talk", total).unwrap().is_complete());
    }

    #[test]
    fn unknown_topic_is_an_error() {
        assert!(matches!(
            engine().opening("karaoke"),
            Err(DialogueError::UnknownTopic(_))
        ));
    }
}
