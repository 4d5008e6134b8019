//! Static checks for OpenSCAD sources: delimiter balance, structure counts and
//! maintainability warnings. Nothing is rendered.

use crate::errors::{Error, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const VALIDATOR_NAME: &str = "3dPot OpenSCAD validator";

const MAX_FOR_LOOPS: usize = 20;
const MAX_LINES: usize = 400;
const PRIMITIVES: [&str; 4] = ["translate(", "cube(", "cylinder(", "sphere("];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Structure {
    pub modules: usize,
    pub functions: usize,
    pub includes: usize,
    #[serde(rename = "use")]
    pub uses: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Complexity {
    pub if_statements: usize,
    pub for_loops: usize,
    pub while_loops: usize,
    pub linear_extrudes: usize,
}

/// Result of analysing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAnalysis {
    pub file: PathBuf,
    pub name: String,
    pub total_lines: usize,
    pub file_size: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub structure: Structure,
    pub complexity: Complexity,
}

impl FileAnalysis {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub validation_time: DateTime<Local>,
    pub validator: &'static str,
    pub total_files: usize,
    pub valid_files: Vec<FileAnalysis>,
    pub error_files: Vec<FileAnalysis>,
    pub files_with_warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.error_files.is_empty()
    }

    /// Process exit code: 0 only when every file is valid.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.all_valid())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(report = %path.display(), "validation report written");
        Ok(())
    }
}

/// Removes `//` and `/* */` comments. Line comments keep their newline.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Brace, parenthesis and bracket balance of comment-free text.
///
/// Positions are byte offsets into `code`.
#[must_use]
pub fn check_delimiters(code: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let mut open_braces = 0usize;
    let mut parens = 0i64;
    let mut brackets = 0i64;
    for (pos, c) in code.char_indices() {
        match c {
            '{' => open_braces += 1,
            '}' if open_braces == 0 => {
                errors.push(format!("Closing brace without opening at position {pos}"));
            }
            '}' => open_braces -= 1,
            '(' => parens += 1,
            ')' => {
                parens -= 1;
                if parens < 0 {
                    errors.push(format!("Extra closing parenthesis at position {pos}"));
                }
            }
            '[' => brackets += 1,
            ']' => {
                brackets -= 1;
                if brackets < 0 {
                    errors.push(format!("Extra closing bracket at position {pos}"));
                }
            }
            _ => {}
        }
    }
    if open_braces > 0 {
        errors.push(format!("{open_braces} opening braces without closing"));
    }
    if parens != 0 {
        errors.push(format!("Unbalanced parentheses: {parens} not closed"));
    }
    if brackets != 0 {
        errors.push(format!("Unbalanced brackets: {brackets} not closed"));
    }
    errors
}

fn declares(line: &str, keyword: &str) -> bool {
    line.find(keyword).is_some_and(|at| {
        let rest = &line[at + keyword.len()..];
        line.contains('(') && rest.trim_start().starts_with(|c: char| c.is_alphanumeric() || c == '_')
    })
}

fn calls(line: &str, keyword: &str) -> bool {
    line.contains(&format!("{keyword}(")) || line.contains(&format!("{keyword} ("))
}

/// Analyses source text. `file` is only used for labelling.
#[must_use]
pub fn analyze_source(file: &Path, source: &str) -> FileAnalysis {
    let lines = source.split('\n').collect::<Vec<_>>();
    let mut structure = Structure::default();
    let mut complexity = Complexity::default();

    for line in &lines {
        let stripped = line.trim().to_lowercase();
        if stripped.is_empty() || stripped.starts_with("//") {
            continue;
        }
        if declares(&stripped, "module ") {
            structure.modules += 1;
        }
        if declares(&stripped, "function ") {
            structure.functions += 1;
        }
        if stripped.contains("include ") {
            structure.includes += 1;
        }
        if stripped.contains("use <") {
            structure.uses += 1;
        }
        if calls(&stripped, "if") {
            complexity.if_statements += 1;
        }
        if calls(&stripped, "for") {
            complexity.for_loops += 1;
        }
        if calls(&stripped, "while") {
            complexity.while_loops += 1;
        }
        if stripped.contains("linear_extrude") {
            complexity.linear_extrudes += 1;
        }
    }

    let errors = check_delimiters(&strip_comments(source));
    let mut warnings = Vec::new();
    if structure.modules == 0 && structure.functions == 0 {
        let has_main_code = lines
            .iter()
            .any(|line| PRIMITIVES.iter().any(|p| line.contains(p)));
        warnings.push(if has_main_code {
            "Main code without module, hard to reuse".to_string()
        } else {
            "File has no modules, functions or objects".to_string()
        });
    }
    if complexity.for_loops > MAX_FOR_LOOPS {
        warnings.push("High number of loops may slow down rendering".to_string());
    }
    if lines.len() > MAX_LINES {
        warnings.push("File is very large, consider splitting it into modules".to_string());
    }

    FileAnalysis {
        file: file.to_path_buf(),
        name: file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        total_lines: lines.len(),
        file_size: source.len(),
        errors,
        warnings,
        structure,
        complexity,
    }
}

/// Reads and analyses one file; unreadable files become a single error.
pub fn analyze_file(file: &Path) -> FileAnalysis {
    match std::fs::read_to_string(file) {
        Ok(source) => analyze_source(file, &source),
        Err(e) => {
            let mut analysis = analyze_source(file, "");
            analysis.warnings.clear();
            analysis.errors = vec![format!("Could not read file: {e}")];
            analysis
        }
    }
}

/// Validates every `*.scad` file directly inside `dir`, in name order.
pub fn validate_dir(dir: &Path) -> Result<ValidationReport> {
    if !dir.is_dir() {
        return Err(Error::Validation {
            message: format!("Directory not found: {}", dir.display()),
        });
    }
    let mut files = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "scad"))
        .collect::<Vec<_>>();
    files.sort();
    info!(dir = %dir.display(), files = files.len(), "validating OpenSCAD models");

    let mut report = ValidationReport {
        validation_time: Local::now(),
        validator: VALIDATOR_NAME,
        total_files: files.len(),
        valid_files: Vec::new(),
        error_files: Vec::new(),
        files_with_warnings: Vec::new(),
    };
    for file in files {
        let analysis = analyze_file(&file);
        if !analysis.warnings.is_empty() {
            report.files_with_warnings.push(analysis.name.clone());
        }
        if analysis.is_valid() {
            report.valid_files.push(analysis);
        } else {
            warn!(file = %analysis.name, errors = ?analysis.errors, "invalid OpenSCAD file");
            report.error_files.push(analysis);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BRACKET: &str = "// wall bracket\nmodule bracket(w = 10) {\n    difference() {\n        cube([w, 5, 2]);\n        translate([2, 2, 0]) cylinder(r = 1, h = 3);\n    }\n}\n\nfor (i = [0:2]) translate([i * 12, 0, 0]) bracket();\n";

    #[test]
    fn test_strip_comments() {
        let code = strip_comments("a // x { \nb /* { ( */ c");
        assert_eq!(code, "a \nb  c");
        assert_eq!(strip_comments("tail // no newline"), "tail ");
    }

    #[test]
    fn test_valid_model() {
        let analysis = analyze_source(Path::new("bracket.scad"), BRACKET);
        assert!(analysis.is_valid(), "{:?}", analysis.errors);
        assert!(analysis.warnings.is_empty());
        assert_eq!(analysis.structure.modules, 1);
        assert_eq!(analysis.complexity.for_loops, 1);
        assert_eq!(analysis.name, "bracket.scad");
    }

    #[test]
    fn test_delimiter_errors() {
        assert_eq!(
            check_delimiters("}"),
            vec!["Closing brace without opening at position 0".to_string()]
        );
        let errors = check_delimiters("module a() { cube([1, 2, 3);");
        assert!(errors.contains(&"1 opening braces without closing".to_string()));
        assert!(errors.contains(&"Unbalanced brackets: 1 not closed".to_string()));
        assert_eq!(
            check_delimiters("cube(1));"),
            vec![
                "Extra closing parenthesis at position 7".to_string(),
                "Unbalanced parentheses: -1 not closed".to_string(),
            ]
        );
    }

    #[test]
    fn test_warnings() {
        let loose = analyze_source(Path::new("loose.scad"), "cube(10);\n");
        assert_eq!(loose.warnings, vec!["Main code without module, hard to reuse"]);

        let empty = analyze_source(Path::new("empty.scad"), "x = 1;\n");
        assert_eq!(empty.warnings, vec!["File has no modules, functions or objects"]);

        let loops = "module m() {}\n".to_string() + &"for (i = [0:1]) m();\n".repeat(21);
        let busy = analyze_source(Path::new("busy.scad"), &loops);
        assert!(busy.warnings[0].starts_with("High number of loops"));
    }

    #[test]
    fn test_validate_dir() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("b_bracket.scad"), BRACKET)?;
        std::fs::write(dir.path().join("a_broken.scad"), "module x() {\n")?;
        std::fs::write(dir.path().join("notes.txt"), "}")?;

        let report = validate_dir(dir.path())?;
        assert_eq!(report.total_files, 2);
        assert_eq!(report.valid_files[0].name, "b_bracket.scad");
        assert_eq!(report.error_files[0].name, "a_broken.scad");
        assert_eq!(report.exit_code(), 1);

        let out = dir.path().join("report.json");
        report.write_json(&out)?;
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(out)?)?;
        assert_eq!(json["total_files"], 2);

        std::fs::remove_file(dir.path().join("a_broken.scad"))?;
        assert_eq!(validate_dir(dir.path())?.exit_code(), 0);
        assert!(validate_dir(&dir.path().join("missing")).is_err());
        Ok(())
    }
}
