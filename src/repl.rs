// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive REPL: every input is compiled and its bytecode listed.

use std::borrow::Cow;
use std::path::PathBuf;

use owo_colors::OwoColorize;
use quill_compiler::{compile_script, disassemble, CompileOptions};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Config, Editor, Helper};

use crate::print_compile_error;

const HISTORY_FILE: &str = ".quill_history";
const MAX_HISTORY_SIZE: usize = 1000;

const KEYWORDS: &[&str] = &[
    "break", "case", "catch", "const", "continue", "debugger", "default", "delete", "do", "else", "finally",
    "for", "function", "if", "in", "instanceof", "let", "new", "of", "return", "switch", "throw", "try",
    "typeof", "var", "void", "while", "with", "yield",
];

const LITERALS: &[&str] = &["true", "false", "null", "undefined", "NaN", "Infinity", "this", "arguments"];

/// REPL commands, written with a leading dot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Version,
    Load,
    Strict,
    Lazy,
    Bindings,
    Options,
}

impl ReplCommand {
    /// Splits `.name arg` into a command and its argument.
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let rest = input.trim().strip_prefix('.')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        let command = match name.as_str() {
            "help" | "h" | "?" => ReplCommand::Help,
            "exit" | "quit" | "q" => ReplCommand::Exit,
            "clear" | "cls" => ReplCommand::Clear,
            "version" | "v" => ReplCommand::Version,
            "load" | "l" => ReplCommand::Load,
            "strict" => ReplCommand::Strict,
            "lazy" => ReplCommand::Lazy,
            "bindings" | "b" => ReplCommand::Bindings,
            "options" | "o" => ReplCommand::Options,
            _ => return None,
        };
        Some((command, arg))
    }

    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the REPL"),
            (".clear", "Clear the screen"),
            (".version", "Show version information"),
            (".load <file>", "Compile a file and list its bytecode"),
            (".strict", "Toggle strict mode"),
            (".lazy", "Toggle lazy compilation of nested functions"),
            (".bindings", "Toggle the name resolution report"),
            (".options", "Show the current compile options"),
        ]
    }
}

#[derive(Default)]
struct QuillHelper {
    words: Vec<&'static str>,
}

impl QuillHelper {
    fn new() -> Self {
        let commands = ReplCommand::all_commands()
            .iter()
            .map(|&(name, _)| name.split_whitespace().next().unwrap_or(name));
        let words = KEYWORDS.iter().chain(LITERALS).copied().chain(commands).collect();
        Self { words }
    }

    fn word_start(line: &str) -> usize {
        line.rfind(|c: char| !c.is_alphanumeric() && c != '_' && c != '$' && c != '.')
            .map_or(0, |i| i + 1)
    }
}

impl Completer for QuillHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = Self::word_start(&line[..pos]);
        let word = &line[start..pos];
        if word.is_empty() {
            return Ok((pos, Vec::new()));
        }
        let matches = self
            .words
            .iter()
            .filter(|w| w.starts_with(word))
            .map(|w| Pair {
                display: w.to_string(),
                replacement: w[word.len()..].to_string(),
            })
            .collect();
        Ok((pos, matches))
    }
}

impl Hinter for QuillHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() {
            return None;
        }
        let word = &line[Self::word_start(line)..];
        if word.len() < 2 {
            return None;
        }
        self.words
            .iter()
            .find(|w| w.starts_with(word) && w.len() > word.len())
            .map(|w| w[word.len()..].to_string().dimmed().to_string())
    }
}

impl Highlighter for QuillHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.trim_start().starts_with('.') {
            return Cow::Owned(line.magenta().to_string());
        }
        let mut out = String::with_capacity(line.len() * 2);
        let mut word = String::new();
        for c in line.chars() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                word.push(c);
                continue;
            }
            if !word.is_empty() {
                out.push_str(&highlight_word(&word));
                word.clear();
            }
            match c {
                '(' | ')' | '[' | ']' | '{' | '}' => out.push_str(&c.yellow().to_string()),
                '"' | '\'' | '`' => out.push_str(&c.green().to_string()),
                _ => out.push(c),
            }
        }
        if !word.is_empty() {
            out.push_str(&highlight_word(&word));
        }
        Cow::Owned(out)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn highlight_word(word: &str) -> String {
    if KEYWORDS.contains(&word) {
        word.magenta().bold().to_string()
    } else if LITERALS.contains(&word) {
        word.blue().to_string()
    } else if word.starts_with(|c: char| c.is_ascii_digit()) {
        word.yellow().to_string()
    } else {
        word.to_string()
    }
}

impl Validator for QuillHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> rustyline::Result<ValidationResult> {
        let input = ctx.input();
        if input.trim_start().starts_with('.') || is_balanced(input) {
            Ok(ValidationResult::Valid(None))
        } else {
            Ok(ValidationResult::Incomplete)
        }
    }
}

impl Helper for QuillHelper {}

/// True unless a bracket, string or comment is still open. Mismatched
/// closers count as balanced so the compiler can report them.
fn is_balanced(input: &str) -> bool {
    let mut stack = Vec::new();
    let mut quote = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                '\\' => {
                    chars.next();
                }
                _ if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.next_if_eq(&'/').is_some() {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return false;
                }
            }
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' if stack.pop() != Some(c) => return true,
            _ => {}
        }
    }
    stack.is_empty() && quote.is_none()
}

enum Flow {
    Continue,
    Exit,
}

/// The interactive compiler shell
pub struct Repl {
    options: CompileOptions,
    show_bindings: bool,
    editor: Editor<QuillHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    pub fn new(options: CompileOptions) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(QuillHelper::new()));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill")
            .join(HISTORY_FILE);
        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if editor.load_history(&history_path).is_err() {
            tracing::debug!(path = %history_path.display(), "no REPL history loaded");
        }

        Ok(Self {
            options: options.with_keep_last_value(true).with_filename("<repl>"),
            show_bindings: false,
            editor,
            history_path,
        })
    }

    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();

        loop {
            let prompt = format!("{} ", "quill>".bright_green().bold());
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    if let Some((command, arg)) = ReplCommand::parse(input) {
                        match self.execute(command, arg) {
                            Flow::Continue => continue,
                            Flow::Exit => break,
                        }
                    }
                    self.compile_and_print(input);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    self.save_history();
                    return Err(err);
                }
            }
        }

        self.save_history();
        Ok(())
    }

    fn save_history(&mut self) {
        if let Err(e) = self.editor.save_history(&self.history_path) {
            tracing::warn!(error = %e, "could not save REPL history");
        }
    }

    fn print_banner(&self) {
        println!();
        println!(
            "  {} {}",
            "quill".bright_cyan().bold(),
            env!("CARGO_PKG_VERSION").bright_yellow()
        );
        println!("  {}", "JavaScript in, bytecode out".dimmed());
        println!(
            "  {} {} {}",
            "Type".dimmed(),
            ".help".cyan(),
            "for available commands".dimmed()
        );
        println!();
    }

    fn execute(&mut self, command: ReplCommand, arg: Option<&str>) -> Flow {
        match command {
            ReplCommand::Help => self.print_help(),
            ReplCommand::Exit => return Flow::Exit,
            ReplCommand::Clear => print!("\x1B[2J\x1B[H"),
            ReplCommand::Version => {
                println!("{} {}", "quill".bright_cyan().bold(), env!("CARGO_PKG_VERSION").yellow());
            }
            ReplCommand::Load => match arg {
                Some(path) => self.load_file(path),
                None => eprintln!("{}: {} requires a file path", "Error".red().bold(), ".load".cyan()),
            },
            ReplCommand::Strict => {
                self.options.strict = !self.options.strict;
                print_toggle("strict mode", self.options.strict);
            }
            ReplCommand::Lazy => {
                self.options.lazy_functions = !self.options.lazy_functions;
                print_toggle("lazy functions", self.options.lazy_functions);
            }
            ReplCommand::Bindings => {
                self.show_bindings = !self.show_bindings;
                print_toggle("binding report", self.show_bindings);
            }
            ReplCommand::Options => match toml::to_string_pretty(&self.options) {
                Ok(text) => print!("{text}"),
                Err(e) => eprintln!("{}: {e}", "Error".red().bold()),
            },
        }
        Flow::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "REPL Commands:".white().bold());
        for (command, description) in ReplCommand::all_commands() {
            println!("  {:16} {}", command.cyan(), description.dimmed());
        }
        println!();
        println!("{}", "Anything else is compiled and its bytecode listed.".dimmed());
        println!();
    }

    fn load_file(&mut self, path: &str) {
        match std::fs::read_to_string(path) {
            Ok(source) => {
                let options = self.options.clone().with_filename(path);
                self.compile_with(&source, &options);
            }
            Err(e) => eprintln!("{}: reading {path}: {e}", "Error".red().bold()),
        }
    }

    fn compile_and_print(&self, source: &str) {
        self.compile_with(source, &self.options);
    }

    fn compile_with(&self, source: &str, options: &CompileOptions) {
        let name = options.filename.as_deref().unwrap_or("<repl>");
        match compile_script(source, options) {
            Ok(script) => {
                for warning in &script.warnings {
                    eprintln!("{}", warning.to_string().yellow());
                }
                print!("{}", disassemble(&script.main));
                if self.show_bindings {
                    println!();
                    for binding in &script.bindings {
                        println!("  {:<16} {} ({})", binding.name.cyan(), binding.kind, binding.pos);
                    }
                }
            }
            Err(e) => print_compile_error(name, &e),
        }
    }
}

fn print_toggle(what: &str, on: bool) {
    let state = if on { "on".green().to_string() } else { "off".red().to_string() };
    println!("{what}: {state}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repl_command_parse() {
        assert!(matches!(ReplCommand::parse(".help"), Some((ReplCommand::Help, None))));
        assert!(matches!(ReplCommand::parse(".q"), Some((ReplCommand::Exit, None))));
        assert!(matches!(
            ReplCommand::parse(".load  test.js "),
            Some((ReplCommand::Load, Some("test.js")))
        ));
        assert!(matches!(ReplCommand::parse(".strict"), Some((ReplCommand::Strict, None))));
        assert!(ReplCommand::parse(".nope").is_none());
        assert!(ReplCommand::parse("a.b").is_none());
    }

    #[test]
    fn test_is_balanced() {
        assert!(is_balanced("(1 + 2)"));
        assert!(is_balanced("function f() { return 1; }"));
        assert!(!is_balanced("function f() {"));
        assert!(!is_balanced("[1, 2"));
        assert!(is_balanced("'a string with ( inside'"));
        assert!(!is_balanced("`open template"));
        assert!(is_balanced("x; // comment with {"));
        assert!(!is_balanced("/* still open"));
        assert!(is_balanced("/* closed { */ x"));
    }
}
