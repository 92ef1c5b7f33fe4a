use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

#[path = "build/identifiers.rs"]
mod identifiers;

// Directories holding this crate's own Rust sources. Nothing outside them is scanned.
const SOURCE_ROOTS: [&str; 6] = ["burden", "io", "report", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

// One source rule: the line pattern that makes a line a candidate, and the message
// shown when candidates survive the rule's own filtering.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    const ALL: [Rule; 5] = [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWords,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ];

    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWords => format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::AllCapsComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn applies_to_build_script(self) -> bool {
        matches!(self, Rule::UnderscorePrefix)
    }

    fn description(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => "underscore-prefixed variables",
            Rule::ForbiddenWords => "forbidden comment words",
            Rule::StarsInComment => "'**' patterns in regular comments",
            Rule::AllCapsComment => "comments with all uppercase alphabetic characters",
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> String {
        match self {
            Rule::UnderscorePrefix => "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely.".to_string(),
            Rule::ForbiddenWords => format!(
                "Comments containing {} are STRICTLY FORBIDDEN in this project.\n   Remove them completely rather than commenting them out.",
                FORBIDDEN_WORDS.map(|w| format!("'{w}'")).join(", ")
            ),
            Rule::StarsInComment => "The '**' pattern is not allowed in regular comments (but is allowed in doc comments).".to_string(),
            Rule::AllCapsComment => "Comments where all alphabetic characters are uppercase are STRICTLY FORBIDDEN in this project.\n   STRONGLY CONSIDER deleting the comment completely.".to_string(),
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes are STRICTLY FORBIDDEN in this project.\n   Either use the code (removing the attribute) or remove it completely.".to_string(),
        }
    }

    // Decides whether a candidate line is a real violation.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscorePrefix => {
                !is_comment(trimmed) && identifiers::has_underscore_identifier_outside_strings(line)
            }
            Rule::ForbiddenWords | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !trimmed.starts_with("///"),
            Rule::AllCapsComment => comment_text(line).is_some_and(|text| {
                let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }),
        }
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//")
        || (trimmed.contains("/*") && !trimmed.contains("*/match") && !trimmed.contains("*/let"))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        Some(match rest.find("*/") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        })
    } else {
        None
    }
}

// Collects the violating lines of a single file for one rule.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.description(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice()));

        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }

        // Keep searching the rest of the file.
        Ok(true)
    }
}

fn source_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from("build.rs"), PathBuf::from("build/identifiers.rs")];
    for root in SOURCE_ROOTS {
        files.extend(
            WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path()),
        );
    }
    files
}

fn scan_sources(files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let mut searcher = Searcher::new();
    for rule in Rule::ALL {
        let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
        for path in files {
            let is_build_script = !SOURCE_ROOTS.iter().any(|root| path.starts_with(root));
            if is_build_script && !rule.applies_to_build_script() {
                continue;
            }

            let mut collector = ViolationCollector::new(rule, path);
            searcher.search_path(&matcher, path, &mut collector)?;
            if let Some(error_message) = collector.check_and_get_error_message() {
                return Err(error_message.into());
            }
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=build/identifiers.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }
    println!("cargo:rerun-if-env-changed=AVERTABLE_RELEASE_TAG");

    let build_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=AVERTABLE_BUILD_TIMESTAMP={build_timestamp}");

    // The `eprintln!` is what shows the violation list in cargo's output.
    if let Err(e) = scan_sources(&source_files()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
