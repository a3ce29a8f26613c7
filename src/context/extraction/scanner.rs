//! Pattern scanners for decisions, file paths and gotchas
//!
//! Each scanner is a shallow heuristic over raw text. They sit behind the
//! [`Scanner`] trait so a better strategy can replace one without touching
//! budgeting or persistence.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::tokens::truncate_chars;

/// Longest finding kept from a single sentence
const MAX_FINDING_CHARS: usize = 200;

/// Sentence boundaries: terminal punctuation followed by whitespace, or newlines.
static SENTENCE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?]+\s+|\n+").expect("SENTENCE_BREAK_RE regex should compile")
});

/// Decision and agreement phrasing ("we decided to", "let's go with", "decision:").
static DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:decided|agreed|settled on|opted (?:for|to)|chose to|going with|(?:we|i)(?:'ll| will) (?:use|go with|switch to)|let's (?:use|go with|switch to)|decision(?: is)?\s*:)",
    )
    .expect("DECISION_RE regex should compile")
});

/// Path-like tokens with at least one slash and an extension.
static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s`'"(\[<])((?:\.{1,2}/|/)?(?:[\w@.-]+/)+[\w.-]+\.([A-Za-z0-9]+))\b"#)
        .expect("FILE_PATH_RE regex should compile")
});

/// Caveat and warning phrasing.
static GOTCHA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:gotcha|careful|beware|watch out|caveat|pitfall|warning|note that|keep in mind|don't forget|do not forget|make sure|be aware|must not|never|breaks? (?:if|when)|fails? (?:if|when))\b",
    )
    .expect("GOTCHA_RE regex should compile")
});

const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cfg", "conf", "cpp", "cs", "css", "env", "go", "h", "hpp", "html", "ini", "java",
    "js", "json", "jsx", "kt", "lock", "md", "php", "py", "rb", "rs", "scss", "sh", "sql",
    "swift", "toml", "ts", "tsx", "twig", "txt", "vue", "xml", "yaml", "yml",
];

/// One extraction heuristic
pub trait Scanner: Send + Sync {
    /// Short identifier, used in logs
    fn id(&self) -> &str;

    /// Findings in order of first appearance, duplicates allowed
    fn scan(&self, text: &str) -> Vec<String>;
}

/// Sentences that record a decision or agreement
pub struct DecisionScanner;

impl Scanner for DecisionScanner {
    fn id(&self) -> &str {
        "decisions"
    }

    fn scan(&self, text: &str) -> Vec<String> {
        matching_sentences(text, &DECISION_RE)
    }
}

/// Relative or absolute file paths with a recognized source extension
pub struct FilePathScanner;

impl Scanner for FilePathScanner {
    fn id(&self) -> &str {
        "files"
    }

    fn scan(&self, text: &str) -> Vec<String> {
        FILE_PATH_RE
            .captures_iter(text)
            .filter(|caps| {
                let ext = caps[2].to_ascii_lowercase();
                SOURCE_EXTENSIONS.contains(&ext.as_str())
            })
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

/// Sentences that warn about a pitfall
pub struct GotchaScanner;

impl Scanner for GotchaScanner {
    fn id(&self) -> &str {
        "gotchas"
    }

    fn scan(&self, text: &str) -> Vec<String> {
        matching_sentences(text, &GOTCHA_RE)
    }
}

/// Deduplicated results of running a [`ScannerSet`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Findings {
    pub decisions: Vec<String>,
    pub files: Vec<String>,
    pub gotchas: Vec<String>,
}

/// The three scanners an extraction runs
pub struct ScannerSet {
    decisions: Box<dyn Scanner>,
    files: Box<dyn Scanner>,
    gotchas: Box<dyn Scanner>,
}

impl Default for ScannerSet {
    fn default() -> Self {
        Self::heuristic()
    }
}

impl ScannerSet {
    pub fn heuristic() -> Self {
        Self {
            decisions: Box::new(DecisionScanner),
            files: Box::new(FilePathScanner),
            gotchas: Box::new(GotchaScanner),
        }
    }

    pub fn with_decisions(mut self, scanner: Box<dyn Scanner>) -> Self {
        self.decisions = scanner;
        self
    }

    pub fn with_files(mut self, scanner: Box<dyn Scanner>) -> Self {
        self.files = scanner;
        self
    }

    pub fn with_gotchas(mut self, scanner: Box<dyn Scanner>) -> Self {
        self.gotchas = scanner;
        self
    }

    pub fn ids(&self) -> [&str; 3] {
        [self.decisions.id(), self.files.id(), self.gotchas.id()]
    }

    pub fn scan(&self, text: &str) -> Findings {
        Findings {
            decisions: dedup(self.decisions.scan(text)),
            files: dedup(self.files.scan(text)),
            gotchas: dedup(self.gotchas.scan(text)),
        }
    }
}

fn matching_sentences(text: &str, pattern: &Regex) -> Vec<String> {
    SENTENCE_BREAK_RE
        .split(text)
        .map(|sentence| sentence.trim().trim_end_matches(['.', '!', '?']).trim_end())
        .filter(|sentence| !sentence.is_empty() && pattern.is_match(sentence))
        .map(|sentence| truncate_chars(sentence, MAX_FINDING_CHARS).to_string())
        .collect()
}

/// Keep first occurrences, comparing case-insensitively
fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_decision_sentences() {
        let text = "Looked at both options. After some back and forth we decided to use Postgres \
                    for the orders table. The UI stays as is.";
        let found = DecisionScanner.scan(text);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("Postgres"));

        let found = DecisionScanner.scan("Decision: keep the cron job\nok");
        assert_eq!(found, vec!["Decision: keep the cron job".to_string()]);
        assert!(DecisionScanner.scan("nothing to see here").is_empty());
    }

    #[test]
    fn finds_paths_with_known_extensions() {
        let text = "I changed src/app.py and `templates/base.html`, see https://example.com/x.html \
                    and also /etc/nginx/sites/default.conf. Version 1.2.3 is fine, so is a/b.";
        let found = FilePathScanner.scan(text);
        assert_eq!(
            found,
            vec![
                "src/app.py".to_string(),
                "templates/base.html".to_string(),
                "/etc/nginx/sites/default.conf".to_string(),
            ]
        );
    }

    #[test]
    fn ignores_unknown_extensions() {
        assert!(FilePathScanner.scan("see build/out.o2x").is_empty());
        assert_eq!(FilePathScanner.scan("./lib/util.RS"), vec!["./lib/util.RS".to_string()]);
    }

    #[test]
    fn finds_gotchas() {
        let text = "All good.\nCareful: the queue worker caches config. Make sure to restart it!";
        let found = GotchaScanner.scan(text);
        assert_eq!(found.len(), 2);
        assert!(found[0].starts_with("Careful"));
    }

    #[test]
    fn set_collapses_duplicates() {
        let text = "Edit src/app.py. Then edit src/app.py again.\nWe decided to use Redis.\nwe decided to use redis.";
        let findings = ScannerSet::heuristic().scan(text);
        assert_eq!(findings.files, vec!["src/app.py".to_string()]);
        assert_eq!(findings.decisions.len(), 1);
    }

    struct Fixed;

    impl Scanner for Fixed {
        fn id(&self) -> &str {
            "fixed"
        }

        fn scan(&self, _text: &str) -> Vec<String> {
            vec!["always".into()]
        }
    }

    #[test]
    fn scanners_are_swappable() {
        let set = ScannerSet::heuristic().with_gotchas(Box::new(Fixed));
        assert_eq!(set.ids(), ["decisions", "files", "fixed"]);
        assert_eq!(set.scan("").gotchas, vec!["always".to_string()]);
    }

    #[test]
    fn long_sentences_are_clipped() {
        let text = format!("we agreed {}", "x".repeat(500));
        let found = DecisionScanner.scan(&text);
        assert_eq!(found[0].chars().count(), MAX_FINDING_CHARS);
    }
}
