//! Grounding - 응답에 언급된 파일/디렉토리/명령이 실제로 있는지 확인
//!
//! "file notes.txt", "cd src/", "run cargo" 같은 언급을 작업 디렉토리와
//! 셸의 PATH 기준으로 검사합니다. 가정형 문장("for example", "you could" ...)
//! 안의 언급은 검사하지 않습니다.
//!
//! `plan` 블록 없이 번호/글머리 목록으로 단계를 적은 응답에서 단계를 뽑는
//! `extract_steps` 도 여기 있습니다.

use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    File,
    Directory,
    Command,
}

/// 존재하지 않는 참조
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingReference {
    pub kind: ReferenceKind,
    /// 응답에 적힌 그대로
    pub mentioned: String,
    pub resolved: PathBuf,
}

impl MissingReference {
    pub fn note(&self) -> String {
        match self.kind {
            ReferenceKind::File => format!("file `{}` does not exist", self.mentioned),
            ReferenceKind::Directory => format!("directory `{}` does not exist", self.mentioned),
            ReferenceKind::Command => format!("command `{}` was not found on PATH", self.mentioned),
        }
    }
}

const FILE_SKIP: &[&str] = &["file", "open", "read", "write", "cat", "touch", "rm"];
const DIR_SKIP: &[&str] = &["directory", "folder", "cd", "mkdir", "rmdir", "ls", "-p", "..", "."];
const COMMAND_SKIP: &[&str] = &[
    "run", "execute", "launch", "the", "a", "an", "it", "this", "that", "these", "those", "them",
    "your", "my", "our", "its", "all", "any", "some", "each", "every", "following", "command",
    "commands", "script", "scripts", "test", "tests", "again", "now", "first", "next", "then",
    "into", "on", "in", "with", "as",
];

/// PATH 에 없는 셸 내장 명령
const SHELL_BUILTINS: &[&str] = &[
    "cd", "echo", "export", "source", "alias", "unset", "set", "exit", "pwd", "type", "read",
    "eval", "exec", "history", "jobs", "fg", "bg", "kill", "wait", "test", "true", "false",
    "printf", "ulimit", "umask",
];

/// 바로 앞에 오면 뒤 단어가 하위 명령인 도구 (`npm run build`)
const SUBCOMMAND_RUNNERS: &[&str] = &["npm", "yarn", "pnpm", "bun", "cargo", "uv", "poetry", "make", "docker"];

/// 이보다 적으면 단계 목록으로 보지 않음
const MIN_EXTRACTED_STEPS: usize = 2;

/// 이 길이 이하의 "I'll ..." 문장은 단계로 보지 않음
const MIN_INTENTION_CHARS: usize = 10;

pub struct GroundingChecker {
    file: Regex,
    directory: Regex,
    command: Regex,
    hypothetical: Regex,
    fence: Regex,
    numbered: Regex,
    bullet: Regex,
    intention: Regex,
}

impl Default for GroundingChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl GroundingChecker {
    pub fn new() -> Self {
        Self {
            file: Regex::new(r#"\b(?:file|open|read|write|modify)\s+['"`]?([^\s'"`]+\.\w+)['"`]?"#)
                .expect("built-in file reference pattern"),
            directory: Regex::new(
                r#"\b(?:directory|folder|cd|mkdir)\s+['"`]?([^\s'"`]+/?)['"`]?"#,
            )
            .expect("built-in directory reference pattern"),
            command: Regex::new(r#"(?i:\b(?:run|execute|launch))\s+['"`]?([A-Za-z0-9_][A-Za-z0-9_.+-]*)"#)
                .expect("built-in command reference pattern"),
            hypothetical: Regex::new(
                r"(?i)\b(?:imagine|let's say|suppose|for example|hypothetically|pretend|we could|you could|one could|you can|would look like|might look like|could look like)\b",
            )
            .expect("built-in hypothetical pattern"),
            fence: Regex::new(r"(?s)```.*?```").expect("built-in fence pattern"),
            numbered: Regex::new(r"^\s*\d+[.)]\s+").expect("built-in numbered item pattern"),
            bullet: Regex::new(r"^\s*[*\-•]\s+").expect("built-in bullet item pattern"),
            intention: Regex::new(r"(?:I'll|I will|Let me|I'm going to)\s+([^.\n]+)")
                .expect("built-in intention pattern"),
        }
    }

    /// `base` 기준으로 없는 파일/디렉토리 참조 (중복 제거, 등장 순서)
    pub fn missing_references(&self, text: &str, base: &Path) -> Vec<MissingReference> {
        let mut missing: Vec<MissingReference> = Vec::new();

        for sentence in self.checked_sentences(text) {
            let refs = self
                .capture(&self.file, sentence, FILE_SKIP)
                .map(|p| (ReferenceKind::File, p))
                .chain(
                    self.capture(&self.directory, sentence, DIR_SKIP)
                        .map(|p| (ReferenceKind::Directory, p)),
                );

            for (kind, mentioned) in refs {
                if missing.iter().any(|m| m.mentioned == mentioned && m.kind == kind) {
                    continue;
                }
                let resolved = resolve(base, &mentioned);
                let exists = match kind {
                    ReferenceKind::File => resolved.is_file(),
                    _ => resolved.is_dir(),
                };
                if !exists {
                    missing.push(MissingReference {
                        kind,
                        mentioned,
                        resolved,
                    });
                }
            }
        }
        missing
    }

    /// "run X" / "execute X" 의 X 가 내장 명령도 아니고 `search_path` 에도 없으면 보고
    ///
    /// 코드 블록 안은 보지 않습니다. `npm run build` 처럼 하위 명령인 경우도 제외.
    pub fn unknown_commands(
        &self,
        text: &str,
        search_path: Option<&OsStr>,
        base: &Path,
    ) -> Vec<MissingReference> {
        let prose = self.fence.replace_all(text, "");
        let mut missing: Vec<MissingReference> = Vec::new();

        for sentence in self.checked_sentences(&prose) {
            for caps in self.command.captures_iter(sentence) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let name = name.as_str().trim_end_matches(['.', '-']);
                if name.is_empty()
                    || COMMAND_SKIP.contains(&name.to_ascii_lowercase().as_str())
                    || SHELL_BUILTINS.contains(&name)
                    || missing.iter().any(|m| m.mentioned == name)
                {
                    continue;
                }
                let before = sentence[..whole.start()].split_whitespace().last();
                if before.is_some_and(|w| SUBCOMMAND_RUNNERS.contains(&w.trim_matches('`'))) {
                    continue;
                }
                if which::which_in(name, search_path, base).is_err() {
                    missing.push(MissingReference {
                        kind: ReferenceKind::Command,
                        mentioned: name.to_string(),
                        resolved: PathBuf::from(name),
                    });
                }
            }
        }
        missing
    }

    /// 본문의 번호 목록, 없으면 글머리 목록, 그것도 없으면 "I'll ... first" 문장에서 단계 추출
    ///
    /// 항목 바로 아래 이어지는 줄은 그 단계에 붙습니다 (`$ cmd` 줄 포함).
    pub fn extract_steps(&self, text: &str) -> Vec<String> {
        let text = self.fence.replace_all(text, "");

        let mut steps = self.list_items(&text, &self.numbered);
        if steps.is_empty() {
            steps = self.list_items(&text, &self.bullet);
        }
        if steps.is_empty() && text.contains("I'll") && text.contains("first") {
            steps = self
                .intention
                .captures_iter(&text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| s.chars().count() > MIN_INTENTION_CHARS)
                .collect();
        }

        if steps.len() < MIN_EXTRACTED_STEPS {
            steps.clear();
        }
        steps
    }

    fn list_items(&self, text: &str, marker: &Regex) -> Vec<String> {
        let mut items: Vec<String> = Vec::new();
        let mut open = false;

        for line in text.lines() {
            if let Some(m) = marker.find(line) {
                let item = line[m.end()..].trim();
                open = !item.is_empty();
                if open {
                    items.push(item.to_string());
                }
            } else if line.trim().is_empty() {
                open = false;
            } else if open {
                if let Some(last) = items.last_mut() {
                    last.push('\n');
                    last.push_str(self.bullet.replace(line, "").trim());
                }
            }
        }
        items
    }

    fn checked_sentences<'t>(&'t self, text: &'t str) -> impl Iterator<Item = &'t str> + 't {
        sentences(text).filter(move |s| !self.hypothetical.is_match(s))
    }

    fn capture<'t>(
        &'t self,
        re: &'t Regex,
        sentence: &'t str,
        skip: &'static [&'static str],
    ) -> impl Iterator<Item = String> + 't {
        re.captures_iter(sentence).filter_map(move |caps| {
            let raw = caps.get(1)?.as_str();
            let path = raw.trim_end_matches(|c: char| matches!(c, ',' | ';' | ':' | ')' | '!' | '?'));
            let path = if path.ends_with('.') && !path.ends_with("..") {
                path.trim_end_matches('.')
            } else {
                path
            };
            if path.is_empty() || skip.contains(&path) || path.contains("://") || path.contains('*') {
                None
            } else {
                Some(path.to_string())
            }
        })
    }
}

fn resolve(base: &Path, mentioned: &str) -> PathBuf {
    if let Some(rest) = mentioned.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    let path = Path::new(mentioned);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// 줄과 문장 끝(". ")으로 나눔
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .flat_map(|line| line.split(". "))
        .filter(|s| !s.trim().is_empty())
}
