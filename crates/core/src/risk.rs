#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskMatch {
    pub phrase: String,
}

#[derive(Debug, Clone)]
pub struct RiskScanner {
    phrases: Vec<String>,
}

impl Default for RiskScanner {
    fn default() -> Self {
        Self::new(
            [
                "suicide",
                "kill myself",
                "end my life",
                "want to die",
                "self harm",
                "self-harm",
                "hurt myself",
                "no reason to live",
                "ฆ่าตัวตาย",
                "อยากตาย",
                "ไม่อยากอยู่",
                "ทำร้ายตัวเอง",
            ]
            .iter()
            .map(|phrase| phrase.to_string())
            .collect(),
        )
    }
}

impl RiskScanner {
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases: phrases
                .into_iter()
                .map(|phrase| phrase.trim().to_lowercase())
                .filter(|phrase| !phrase.is_empty())
                .collect(),
        }
    }

    pub fn scan(&self, text: &str) -> Option<RiskMatch> {
        let lower = crate::intent::normalize_trigger(text);
        self.phrases
            .iter()
            .find(|phrase| lower.contains(phrase.as_str()))
            .map(|phrase| RiskMatch {
                phrase: phrase.clone(),
            })
    }

    pub fn alert_text(&self, user_id: &str, text: &str, found: &RiskMatch) -> String {
        format!(
            "Risk alert: user {} mentioned \"{}\".\nMessage: {}",
            user_id, found.phrase, text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_risk_phrases_case_insensitively() {
        let scanner = RiskScanner::default();
        let found = scanner.scan("Sometimes I WANT TO DIE").unwrap();
        assert_eq!(found.phrase, "want to die");
    }

    #[test]
    fn phrases_split_across_lines_are_flagged() {
        assert!(RiskScanner::default().scan("I want to\ndie").is_some());
    }

    #[test]
    fn flags_thai_phrases() {
        assert!(RiskScanner::default().scan("ช่วงนี้อยากตายมาก").is_some());
    }

    #[test]
    fn ordinary_text_is_not_flagged() {
        assert!(RiskScanner::default().scan("I had a long day at work").is_none());
    }

    #[test]
    fn alert_names_user_and_quotes_text() {
        let scanner = RiskScanner::default();
        let found = scanner.scan("i want to die").unwrap();
        let alert = scanner.alert_text("U42", "i want to die", &found);
        assert!(alert.contains("U42"));
        assert!(alert.contains("i want to die"));
    }
}
