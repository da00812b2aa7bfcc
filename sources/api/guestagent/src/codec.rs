//! Text formats of datastore configuration files.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::directive::{Directive, Overrides};
use crate::error::{self, Result};

/// Reads and writes a configuration file.  `layer` names the input in parse errors.
pub trait StreamCodec: Send + Sync {
    fn serialize(&self, overrides: &Overrides) -> String;
    fn deserialize(&self, layer: &str, input: &str) -> Result<Overrides>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// `key arg arg` lines, as Redis uses.
    Properties,
    /// A single `[section]` of `key = value` lines, as MySQL uses.
    Ini,
}

pub fn codec_for(kind: CodecKind, ini_section: &str) -> Box<dyn StreamCodec> {
    match kind {
        CodecKind::Properties => Box::new(PropertiesCodec),
        CodecKind::Ini => Box::new(IniCodec::new(ini_section)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesCodec;

impl StreamCodec for PropertiesCodec {
    fn serialize(&self, overrides: &Overrides) -> String {
        let mut out = String::new();
        for (key, directive) in overrides {
            for args in directive.occurrences() {
                out.push_str(key);
                for arg in args {
                    out.push(' ');
                    out.push_str(&quote(arg));
                }
                out.push('\n');
            }
        }
        out
    }

    fn deserialize(&self, layer: &str, input: &str) -> Result<Overrides> {
        let mut overrides = Overrides::new();
        for (index, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = split_words(line).map_err(|msg| {
                error::ParseSnafu {
                    layer,
                    line: index + 1,
                    msg,
                }
                .build()
            })?;
            let key = words.remove(0);
            overrides.entry(key).or_default().push(words);
        }
        Ok(overrides)
    }
}

/// Splits on whitespace; double quotes group words and `""` is an empty argument.
fn split_words(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => word.push(escaped),
                        None => return Err("dangling escape".to_string()),
                    },
                    Some(other) => word.push(other),
                    None => return Err("unterminated quote".to_string()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return arg.to_string();
    }
    let mut quoted = String::from("\"");
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// One INI section.  A key without `=` is a bare flag and has no arguments.
#[derive(Debug, Clone)]
pub struct IniCodec {
    section: String,
}

impl IniCodec {
    pub fn new<S: Into<String>>(section: S) -> Self {
        Self {
            section: section.into(),
        }
    }
}

impl StreamCodec for IniCodec {
    fn serialize(&self, overrides: &Overrides) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[{}]", self.section);
        for (key, directive) in overrides {
            for args in directive.occurrences() {
                if args.is_empty() {
                    let _ = writeln!(out, "{}", key);
                } else {
                    let _ = writeln!(out, "{} = {}", key, args.join(" "));
                }
            }
        }
        out
    }

    fn deserialize(&self, layer: &str, input: &str) -> Result<Overrides> {
        let mut overrides = Overrides::new();
        let mut in_section = false;
        for (index, line) in input.lines().enumerate() {
            let fail = |msg: String| {
                error::ParseSnafu {
                    layer,
                    line: index + 1,
                    msg,
                }
                .fail()
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[') {
                let name = match header.strip_suffix(']') {
                    Some(name) => name.trim(),
                    None => return fail(format!("malformed section header '{}'", line)),
                };
                if name != self.section {
                    return fail(format!("unexpected section '{}'", name));
                }
                in_section = true;
                continue;
            }
            if !in_section {
                return fail(format!("'{}' is outside the [{}] section", line, self.section));
            }
            let (key, args) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), vec![value.trim().to_string()]),
                None => (line, Vec::new()),
            };
            if key.is_empty() {
                return fail("missing key".to_string());
            }
            overrides
                .entry(key.to_string())
                .or_insert_with(Directive::default)
                .push(args);
        }
        Ok(overrides)
    }
}
