//! Free-text conditional rules that can excuse a column mismatch.
//!
//! A rule reads `[N. ]<ValueToken>: <phrase>` and only applies to lanes whose
//! cell in that column normalizes to `ValueToken`. The phrase is classified
//! once, at load time, into a [`LogicKind`] plus its comparison operands.

use std::collections::BTreeMap;

use crate::error::ReconError;
use crate::model::Cell;
use crate::normalize::{is_blank, normalize, normalize_column, normalize_str};

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicKind {
    IsEmpty,
    DoesNotContain,
    DoesNotEqual,
    Contains,
    Equals,
    Unrecognized,
}

/// Phrase keywords in priority order. Phrases overlap ("does not contain"
/// contains "contain"), so the first hit wins. Within one kind the longest
/// spelling is listed first so operands start after the whole keyword.
const PHRASES: &[(LogicKind, &[&str])] = &[
    (LogicKind::IsEmpty, &["is empty"]),
    (LogicKind::DoesNotContain, &["does not contain"]),
    (
        LogicKind::DoesNotEqual,
        &["does not equals to", "does not equal to", "does not equals", "does not equal"],
    ),
    (LogicKind::Contains, &["contains"]),
    (LogicKind::Equals, &["equals to", "equal to", "equals", "equal"]),
];

const ANY_ITEM: &str = "in any item";

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRule {
    /// Rate-card value the rule is scoped to. `None` when the text has no
    /// `Value:` prefix, in which case the rule applies to every lane.
    pub target_value: Option<String>,
    pub logic: LogicKind,
    pub comparison_set: Vec<String>,
    /// The rule text as loaded (one rule, ordinal included).
    pub text: String,
}

impl ConditionRule {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let body = strip_ordinal(text);
        let (target_value, phrase) = match body.split_once(':') {
            Some((token, rest)) => (Some(token.trim().to_string()), rest.trim()),
            None => (None, body.trim()),
        };
        let phrase = strip_column_reference(phrase);
        let (logic, comparison_set) = classify_phrase(phrase);
        Self {
            target_value,
            logic,
            comparison_set,
            text: text.to_string(),
        }
    }

    /// Scope check: the rule's value token must equal the lane value. A rule
    /// without a value token and a blank lane value never match.
    pub fn applies_to(&self, lane_value: Option<&Cell>) -> bool {
        match &self.target_value {
            None => false,
            Some(token) => match normalize(lane_value) {
                Some(lane) => normalize_str(token).as_deref() == Some(lane.as_str()),
                None => false,
            },
        }
    }

    /// Evaluate the phrase against a shipment value, ignoring scope.
    pub fn evaluate(&self, shipment_value: Option<&Cell>) -> bool {
        let blank = is_blank(shipment_value);
        match self.logic {
            LogicKind::IsEmpty => blank,
            LogicKind::DoesNotContain => {
                blank || !self.operands().any(|op| contains(shipment_value, &op))
            }
            LogicKind::DoesNotEqual => {
                blank || !self.operands().any(|op| equals(shipment_value, &op))
            }
            LogicKind::Contains => {
                !blank && self.operands().any(|op| contains(shipment_value, &op))
            }
            LogicKind::Equals => !blank && self.operands().any(|op| equals(shipment_value, &op)),
            LogicKind::Unrecognized => false,
        }
    }

    pub fn is_satisfied(&self, shipment_value: Option<&Cell>, lane_value: Option<&Cell>) -> bool {
        self.applies_to(lane_value) && self.evaluate(shipment_value)
    }

    /// The explicit code an `equals` rule asks for.
    pub fn expected_code(&self) -> Option<String> {
        if self.logic != LogicKind::Equals || self.comparison_set.is_empty() {
            return None;
        }
        Some(self.comparison_set.join(", "))
    }

    fn operands(&self) -> impl Iterator<Item = String> + '_ {
        self.comparison_set.iter().filter_map(|op| normalize_str(op))
    }
}

/// Evaluate one rule text for a (shipment, lane) value pair.
pub fn satisfies(shipment_value: Option<&Cell>, lane_value: Option<&Cell>, rule_text: &str) -> bool {
    ConditionRule::parse(rule_text).is_satisfied(shipment_value, lane_value)
}

fn contains(value: Option<&Cell>, operand: &str) -> bool {
    normalize(value).is_some_and(|v| v.contains(operand))
}

fn equals(value: Option<&Cell>, operand: &str) -> bool {
    normalize(value).is_some_and(|v| v == operand)
}

/// `"1. NAC: ..."` → `"NAC: ..."`.
fn strip_ordinal(text: &str) -> &str {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && text[digits..].starts_with('.') {
        text[digits + 1..].trim_start()
    } else {
        text
    }
}

/// `"RATE_TYPE is empty"` → `"is empty"`: drops an upper-case column token
/// that precedes the logic phrase.
fn strip_column_reference(phrase: &str) -> &str {
    let Some((first, rest)) = phrase.split_once(char::is_whitespace) else {
        return phrase;
    };
    let looks_like_column = first.len() > 1
        && first.chars().any(|c| c.is_ascii_uppercase())
        && first
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '#');
    let rest = rest.trim_start();
    let lowered = rest.to_ascii_lowercase();
    let starts_phrase = ["is ", "does ", "contains", "equal"]
        .iter()
        .any(|k| lowered.starts_with(k));
    if looks_like_column && starts_phrase {
        rest
    } else {
        phrase
    }
}

fn classify_phrase(phrase: &str) -> (LogicKind, Vec<String>) {
    let lowered = phrase.to_ascii_lowercase();
    for (kind, keywords) in PHRASES {
        for keyword in *keywords {
            if let Some(pos) = lowered.find(keyword) {
                let start = pos + keyword.len();
                let operands = if *kind == LogicKind::IsEmpty {
                    Vec::new()
                } else {
                    split_operands(&phrase[start..], &lowered[start..])
                };
                return (*kind, operands);
            }
        }
    }
    (LogicKind::Unrecognized, Vec::new())
}

fn split_operands(rest: &str, lowered_rest: &str) -> Vec<String> {
    let end = lowered_rest.find(ANY_ITEM).unwrap_or(rest.len());
    rest[..end]
        .split(',')
        .map(|t| t.trim().trim_end_matches('.').trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ColumnRules {
    column: String,
    rules: Vec<ConditionRule>,
}

/// Condition rules keyed by normalized column name. Immutable once a batch
/// starts.
#[derive(Debug, Clone, Default)]
pub struct ConditionBook {
    columns: BTreeMap<String, ColumnRules>,
}

impl ConditionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `column → rule texts`. Each text may hold several
    /// newline-separated rules.
    pub fn from_map<I, K, V, S>(map: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut book = Self::new();
        for (column, texts) in map {
            for text in texts {
                book.add_rule_text(column.as_ref(), text.as_ref());
            }
        }
        book
    }

    /// Load the two-column conditions export (`Column`, `Condition Rule`).
    /// Blank `Column` cells continue the previous column.
    pub fn from_csv(data: &str) -> Result<Self, ReconError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());
        let headers = reader.headers()?.clone();
        let idx = |wanted: &str| -> Result<usize, ReconError> {
            headers
                .iter()
                .position(|h| normalize_column(h) == wanted)
                .ok_or_else(|| {
                    ReconError::RulesParse(format!("conditions sheet: missing '{wanted}' header"))
                })
        };
        let column_idx = idx("column")?;
        let rule_idx = idx("conditionrule")?;

        let mut book = Self::new();
        let mut current: Option<String> = None;
        for record in reader.records() {
            let record = record?;
            let column = record.get(column_idx).unwrap_or("").trim();
            if !column.is_empty() {
                current = Some(column.to_string());
            }
            let text = record.get(rule_idx).unwrap_or("");
            match &current {
                Some(column) if !text.trim().is_empty() => book.add_rule_text(column, text),
                _ => {}
            }
        }
        Ok(book)
    }

    /// Add every rule found in `text` under `column`, cleaning header lines.
    pub fn add_rule_text(&mut self, column: &str, text: &str) {
        for line in text.lines() {
            let Some(line) = clean_rule_line(line) else {
                continue;
            };
            let rule = ConditionRule::parse(line);
            if rule.logic == LogicKind::Unrecognized {
                tracing::warn!(column, rule = %rule.text, "unrecognized condition phrase");
            }
            self.insert(column, rule);
        }
    }

    fn insert(&mut self, column: &str, rule: ConditionRule) {
        let entry = self
            .columns
            .entry(normalize_column(column))
            .or_insert_with(|| ColumnRules {
                column: column.to_string(),
                rules: Vec::new(),
            });
        if !entry.rules.iter().any(|r| r.text == rule.text) {
            entry.rules.push(rule);
        }
    }

    /// Fold another book in. Rules already present (same text) are skipped.
    pub fn merge(&mut self, other: ConditionBook) {
        for (_, column_rules) in other.columns {
            for rule in column_rules.rules {
                self.insert(&column_rules.column, rule);
            }
        }
    }

    pub fn rules_for(&self, column: &str) -> &[ConditionRule] {
        self.columns
            .get(&normalize_column(column))
            .map(|c| c.rules.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_rules(&self, column: &str) -> bool {
        !self.rules_for(column).is_empty()
    }

    /// True when any rule of `column` scoped to `lane_value` is satisfied by
    /// `shipment_value`.
    pub fn satisfies(
        &self,
        column: &str,
        shipment_value: Option<&Cell>,
        lane_value: Option<&Cell>,
    ) -> bool {
        self.rules_for(column)
            .iter()
            .any(|r| r.is_satisfied(shipment_value, lane_value))
    }

    /// First scoped rule tied to `lane_value`, satisfied or not.
    pub fn find_rule_for_value(&self, column: &str, lane_value: Option<&Cell>) -> Option<&ConditionRule> {
        self.rules_for(column)
            .iter()
            .find(|r| r.applies_to(lane_value))
    }

    pub fn find_rule_text_for_value(&self, column: &str, lane_value: Option<&Cell>) -> Option<&str> {
        self.find_rule_for_value(column, lane_value)
            .map(|r| r.text.as_str())
    }

    /// Display names of every column with rules.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.values().map(|c| c.column.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.values().map(|c| c.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop blank lines and the `Conditional rules:` header.
fn clean_rule_line(line: &str) -> Option<&str> {
    const HEADER: &str = "conditional rules:";
    let mut line = line.trim();
    if line.get(..HEADER.len()).is_some_and(|h| h.eq_ignore_ascii_case(HEADER)) {
        line = line[HEADER.len()..].trim();
    }
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAC_RULE: &str = "NAC: RATE_TYPE is empty in any item and does not contain FAK in any item";

    fn c(s: &str) -> Cell {
        Cell::text(s)
    }

    #[test]
    fn scoped_rule_applies_only_to_its_value() {
        assert!(satisfies(None, Some(&c("NAC")), NAC_RULE));
        assert!(!satisfies(None, Some(&c("OTHER")), NAC_RULE));
        assert!(!satisfies(Some(&c("FAK")), Some(&c("OTHER")), NAC_RULE));
        assert!(!satisfies(None, None, NAC_RULE));
    }

    #[test]
    fn is_empty_takes_priority() {
        let rule = ConditionRule::parse(NAC_RULE);
        assert_eq!(rule.logic, LogicKind::IsEmpty);
        assert_eq!(rule.target_value.as_deref(), Some("NAC"));
        assert!(rule.evaluate(Some(&c("none"))));
        assert!(!rule.evaluate(Some(&c("FAK"))));
        assert!(!rule.evaluate(Some(&c("XYZ"))));
    }

    #[test]
    fn ordinal_is_stripped() {
        let rule = ConditionRule::parse("2. 40HC: equals 40HC, 45HC");
        assert_eq!(rule.target_value.as_deref(), Some("40HC"));
        assert_eq!(rule.logic, LogicKind::Equals);
        assert_eq!(rule.comparison_set, vec!["40HC", "45HC"]);
        assert!(rule.is_satisfied(Some(&c("45 hc")), Some(&c("40hc"))));
    }

    #[test]
    fn negations_are_checked_before_positives() {
        let dnc = ConditionRule::parse("A: does not contain DG, HAZ in any item");
        assert_eq!(dnc.logic, LogicKind::DoesNotContain);
        assert_eq!(dnc.comparison_set, vec!["DG", "HAZ"]);
        assert!(dnc.evaluate(Some(&c("general"))));
        assert!(!dnc.evaluate(Some(&c("DG class 3"))));
        assert!(dnc.evaluate(None));

        let dne = ConditionRule::parse("A: does not equal to X");
        assert_eq!(dne.logic, LogicKind::DoesNotEqual);
        assert_eq!(dne.comparison_set, vec!["X"]);
        assert!(dne.evaluate(Some(&c("Y"))));
        assert!(!dne.evaluate(Some(&c("x"))));
        assert!(dne.evaluate(None));
    }

    #[test]
    fn contains_and_equals_need_a_value() {
        let contains = ConditionRule::parse("A: contains REEF");
        assert_eq!(contains.logic, LogicKind::Contains);
        assert!(contains.evaluate(Some(&c("40 Reefer"))));
        assert!(!contains.evaluate(None));

        let equals = ConditionRule::parse("A: equal to 7719");
        assert_eq!(equals.logic, LogicKind::Equals);
        assert!(equals.evaluate(Some(&Cell::Number(7719.0))));
        assert!(!equals.evaluate(None));
        assert_eq!(equals.expected_code().as_deref(), Some("7719"));
    }

    #[test]
    fn unrecognized_phrase_is_false() {
        let rule = ConditionRule::parse("A: starts with X");
        assert_eq!(rule.logic, LogicKind::Unrecognized);
        assert!(!rule.is_satisfied(Some(&c("X1")), Some(&c("A"))));
        assert!(!rule.is_satisfied(None, Some(&c("A"))));
    }

    #[test]
    fn unscoped_rule_excuses_nothing() {
        let rule = ConditionRule::parse("RATE_TYPE is empty");
        assert!(rule.target_value.is_none());
        assert_eq!(rule.logic, LogicKind::IsEmpty);
        assert!(rule.evaluate(None));
        assert!(!rule.is_satisfied(None, Some(&c("FAK"))));
        assert!(!satisfies(None, Some(&c("FAK")), "RATE_TYPE is empty"));
    }

    #[test]
    fn book_cleans_and_splits_texts() {
        let book = ConditionBook::from_map([(
            "Rate type",
            vec!["Conditional rules:\n1. NAC: RATE_TYPE is empty\n2. FAK: equals FAK"],
        )]);
        let rules = book.rules_for("rate_type");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].text, "1. NAC: RATE_TYPE is empty");
        assert!(book.satisfies("RATE TYPE", None, Some(&c("NAC"))));
        assert!(!book.satisfies("Rate type", Some(&c("X")), Some(&c("NAC"))));
        assert_eq!(
            book.find_rule_text_for_value("Rate type", Some(&c("fak"))),
            Some("2. FAK: equals FAK")
        );
        assert_eq!(book.find_rule_text_for_value("Rate type", Some(&c("other"))), None);
    }

    #[test]
    fn book_from_csv_carries_column_forward() {
        let csv = "\
Column,Condition Rule
Rate type,NAC: is empty
,FAK: equals FAK
Service,EXP: contains express
";
        let book = ConditionBook::from_csv(csv).unwrap();
        assert_eq!(book.rules_for("Rate type").len(), 2);
        assert_eq!(book.rules_for("Service").len(), 1);
        assert_eq!(book.len(), 3);
    }

    #[test]
    fn book_from_csv_requires_headers() {
        let err = ConditionBook::from_csv("Col,Rule\nA,B\n").unwrap_err();
        assert!(matches!(err, ReconError::RulesParse(_)));
    }

    #[test]
    fn merge_dedupes_by_text() {
        let mut a = ConditionBook::from_map([("Rate type", ["NAC: is empty"])]);
        let b = ConditionBook::from_map([("rate_type", ["NAC: is empty", "FAK: equals FAK"])]);
        a.merge(b);
        assert_eq!(a.rules_for("Rate type").len(), 2);
        assert_eq!(a.columns().collect::<Vec<_>>(), vec!["Rate type"]);
    }
}
