use crate::config::PromptConfig;
use crate::db::schema_catalog::SchemaWhitelist;
use crate::db::{ContextSnippet, DatabaseError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Constraints on the shape of the model's reply. Domain independent.
pub const OUTPUT_FORMAT_RULES: &[&str] = &[
    "Return SQL only. No markdown code fences, no explanations.",
    "Return exactly one statement.",
    "Do not end the statement with a semicolon.",
    "Reference only the tables and columns listed under Allowed tables.",
];

/// One named domain constraint. Names are stable so tests and config
/// overrides can address individual rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRule {
    pub name: String,
    pub text: String,
}

impl PromptRule {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            text: text.to_string(),
        }
    }
}

/// Versioned list of domain rules embedded in every prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    version: String,
    rules: Vec<PromptRule>,
}

impl RuleSet {
    pub fn new(version: impl Into<String>, rules: Vec<PromptRule>) -> Self {
        Self {
            version: version.into(),
            rules,
        }
    }

    /// Rules for the clinic scheduling schema (patients, appointments).
    pub fn clinic() -> Self {
        Self::new(
            "clinic-v1",
            vec![
                PromptRule::new(
                    "patient-name-column",
                    "The patients table has no `name` column. Use `patients.full_name` for a patient's name.",
                ),
                PromptRule::new(
                    "next-appointment-join",
                    "There is no `next_appointment` column anywhere. Compute a patient's next appointment as \
                     MIN(appointments.starts_at) over appointments with starts_at > CURRENT_DATE and \
                     status = 'scheduled', grouped by appointments.patient_id, then join that result to \
                     patients on patients.id = appointments.patient_id.",
                ),
                PromptRule::new(
                    "prefer-cte",
                    "Prefer common table expressions (WITH ...) over nested subqueries.",
                ),
                PromptRule::new(
                    "no-positional-parameters",
                    "Never use positional or named parameters such as $1, ? or :id. Inline literal values.",
                ),
                PromptRule::new(
                    "default-limit",
                    "When the question does not say how many rows it wants, add LIMIT 50.",
                ),
            ],
        )
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        match &config.rules {
            Some(rules) => Self::new(
                config.version.clone().unwrap_or_else(|| "custom".to_string()),
                rules.clone(),
            ),
            None => Self::clinic(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> &[PromptRule] {
        &self.rules
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&PromptRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::clinic()
    }
}

/// A finished prompt. Built once per generation attempt and never edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt(String);

impl GenerationPrompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GenerationPrompt {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl fmt::Display for GenerationPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct PromptBuilder {
    rules: RuleSet,
}

impl PromptBuilder {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn build(
        &self,
        question: &str,
        snippets: &[ContextSnippet],
        whitelist: &SchemaWhitelist,
    ) -> GenerationPrompt {
        let mut prompt = self.context_sections(snippets, whitelist);
        prompt.push_str(&format!("### Question\n{}\n", question.trim()));
        GenerationPrompt(prompt)
    }

    /// Prompt for the single correction attempt after a database error.
    pub fn build_repair(
        &self,
        question: &str,
        snippets: &[ContextSnippet],
        whitelist: &SchemaWhitelist,
        failed_sql: &str,
        error: &DatabaseError,
    ) -> GenerationPrompt {
        let mut prompt = self.context_sections(snippets, whitelist);
        prompt.push_str(&format!("### Question\n{}\n\n", question.trim()));
        prompt.push_str(&format!("### Previous attempt\n{}\n\n", failed_sql));
        prompt.push_str(&format!(
            "### Database error\n{}: {}\n\n",
            error.code, error.message
        ));
        prompt.push_str(
            "The previous attempt failed with the error above. \
             Return a corrected statement that answers the question.\n",
        );
        GenerationPrompt(prompt)
    }

    fn context_sections(&self, snippets: &[ContextSnippet], whitelist: &SchemaWhitelist) -> String {
        let mut out = String::from("### Output format\n");
        for rule in OUTPUT_FORMAT_RULES {
            out.push_str(&format!("- {}\n", rule));
        }

        out.push_str("\n### Allowed tables\n");
        out.push_str(&whitelist.render());
        out.push_str("\n\n### Reference documentation\n");
        if snippets.is_empty() {
            out.push_str("(none retrieved)");
        } else {
            let contents: Vec<&str> = snippets.iter().map(|s| s.content.as_str()).collect();
            out.push_str(&contents.join("\n\n"));
        }

        out.push_str(&format!("\n\n### Rules ({})\n", self.rules.version()));
        for rule in self.rules.rules() {
            out.push_str(&format!("- {}\n", rule.text));
        }
        out.push('\n');
        out
    }
}
