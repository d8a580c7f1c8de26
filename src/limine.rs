// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Typed line model of limine.conf with surgical hash patching.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! `limine.conf` is handled as an ordered list of typed lines rather than a
//! parsed tree. Each line keeps its original terminator, untouched lines are
//! rendered from their original text, and a patch only ever replaces the
//! `#<hash>` fragment that follows a matched file name on one line.

use std::sync::OnceLock;

use regex::Regex;

use crate::digest::VerificationDigest;

/// One `image_path:` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePathLine {
    line_number: usize,
    raw: String,
    declared_path: String,
    declared_hash: String,
}

impl ImagePathLine {
    /// 1-based position in the file.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Line content without its terminator.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Path fragment after `image_path:`, without any `#` suffix.
    #[must_use]
    pub fn declared_path(&self) -> &str {
        &self.declared_path
    }

    /// Hash fragment after `#`, or empty when absent.
    #[must_use]
    pub fn declared_hash(&self) -> &str {
        &self.declared_hash
    }

    /// Declared hash as a verification digest, when well formed.
    #[must_use]
    pub fn declared_digest(&self) -> Option<VerificationDigest> {
        VerificationDigest::parse(&self.declared_hash)
    }

    /// Final component of the declared path (after the last `/` or `:`).
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.declared_path
            .rsplit(|c| c == '/' || c == ':')
            .next()
            .unwrap_or(&self.declared_path)
    }

    /// Declared path with any `boot():`-style locator and leading `/` removed.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        let path = self.declared_path.trim();
        let path = path.find("):").map_or(path, |idx| &path[idx + 2..]);
        path.trim_start_matches('/')
    }

    /// `true` when the declared file name is exactly `name`.
    #[must_use]
    pub fn references_file(&self, name: &str) -> bool {
        !name.is_empty() && self.file_name() == name
    }
}

/// A classified line of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLine {
    /// An `image_path:` directive.
    ImagePath(ImagePathLine),
    /// Any other line, kept verbatim.
    Other(String),
}

impl ConfigLine {
    fn text(&self) -> &str {
        match self {
            Self::ImagePath(line) => &line.raw,
            Self::Other(text) => text,
        }
    }
}

/// Whole configuration file as typed lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigDocument {
    lines: Vec<ConfigLine>,
    terminators: Vec<&'static str>,
}

fn directive_regex() -> &'static Regex {
    static DIRECTIVE: OnceLock<Regex> = OnceLock::new();
    DIRECTIVE.get_or_init(|| {
        Regex::new(r"(?i)^(\s*image_path:\s*)(\S.*?)?(\s*)$").expect("image_path pattern")
    })
}

/// Classify one line (without terminator).
#[must_use]
pub fn classify_line(line_number: usize, text: &str) -> ConfigLine {
    let Some(caps) = directive_regex().captures(text) else {
        return ConfigLine::Other(text.to_owned());
    };
    let value = caps.get(2).map_or("", |m| m.as_str());
    let (declared_path, declared_hash) = match value.rfind('#') {
        Some(idx) => (&value[..idx], &value[idx + 1..]),
        None => (value, ""),
    };
    ConfigLine::ImagePath(ImagePathLine {
        line_number,
        raw: text.to_owned(),
        declared_path: declared_path.to_owned(),
        declared_hash: declared_hash.to_owned(),
    })
}

impl ConfigDocument {
    /// Split `text` into typed lines, remembering each line terminator.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut terminators = Vec::new();
        for (idx, chunk) in text.split_inclusive('\n').enumerate() {
            let (body, terminator) = if let Some(body) = chunk.strip_suffix("\r\n") {
                (body, "\r\n")
            } else if let Some(body) = chunk.strip_suffix('\n') {
                (body, "\n")
            } else {
                (chunk, "")
            };
            lines.push(classify_line(idx + 1, body));
            terminators.push(terminator);
        }
        Self { lines, terminators }
    }

    /// Render the document back to text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (line, terminator) in self.lines.iter().zip(&self.terminators) {
            out.push_str(line.text());
            out.push_str(terminator);
        }
        out
    }

    /// Number of lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Iterate over `image_path:` directives in file order.
    pub fn image_paths(&self) -> impl Iterator<Item = &ImagePathLine> {
        self.lines.iter().filter_map(|line| match line {
            ConfigLine::ImagePath(image) => Some(image),
            ConfigLine::Other(_) => None,
        })
    }

    /// Directive at the 1-based `line_number`, if that line is one.
    #[must_use]
    pub fn image_path_at(&self, line_number: usize) -> Option<&ImagePathLine> {
        match self.lines.get(line_number.checked_sub(1)?) {
            Some(ConfigLine::ImagePath(image)) => Some(image),
            _ => None,
        }
    }

    /// Replace or append the `#<hash>` fragment after `file_name` on one line.
    ///
    /// The line is addressed by its 1-based number; `file_name` is escaped
    /// before it is used as a pattern. Returns `true` when the line changed.
    pub fn patch_hash(
        &mut self,
        line_number: usize,
        file_name: &str,
        digest: &VerificationDigest,
    ) -> bool {
        let Some(index) = line_number.checked_sub(1) else {
            return false;
        };
        let Some(ConfigLine::ImagePath(image)) = self.lines.get(index) else {
            return false;
        };
        let Ok(pattern) = Regex::new(&format!(r"{}(#[^\s]*)?", regex::escape(file_name))) else {
            return false;
        };
        let Some(found) = pattern.find_iter(&image.raw).last() else {
            return false;
        };
        let replacement = format!("{file_name}#{digest}");
        let mut patched = String::with_capacity(image.raw.len() + replacement.len());
        patched.push_str(&image.raw[..found.start()]);
        patched.push_str(&replacement);
        patched.push_str(&image.raw[found.end()..]);
        if patched == image.raw {
            return false;
        }
        self.lines[index] = classify_line(line_number, &patched);
        true
    }
}
