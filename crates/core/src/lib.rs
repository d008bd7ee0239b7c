pub mod composer;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod intent;
pub mod models;
pub mod risk;
pub mod script;
pub mod webhook;

pub use composer::{compose, format_lookup_report, help_text, not_found_text, UNAVAILABLE_TEXT};
pub use config::{LocalConfig, RelayConfig};
pub use dialogue::{DialogueEngine, DialogueStep};
pub use error::{ConfigError, DialogueError, ErrorKind, ScriptError};
pub use intent::{extract_lookup_name, normalize_text, IntentRouter, RouteRule};
pub use models::*;
pub use risk::{RiskMatch, RiskScanner};
pub use script::{DialogueScript, FormCard, FormLink, Prompt, TopicScript, Trigger};
pub use webhook::{WebhookEvent, WebhookPayload};
