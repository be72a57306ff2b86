// MIT License - Copyright (c) 2021 TJForc
// Sectioned key/value files (scenes.ini, picos.ini)

use crate::error::ConfigError;

/// Section whose entries act as fallbacks for every other section.
const DEFAULT_SECTION: &str = "DEFAULT";

/// One `[name]` block and its entries, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed section file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionFile {
    defaults: Option<Section>,
    sections: Vec<Section>,
}

impl SectionFile {
    /// Sections in file order, excluding `[DEFAULT]`.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Look up `key` in `section`, falling back to `[DEFAULT]`.
    pub fn get<'a>(&'a self, section: &'a Section, key: &str) -> Option<&'a str> {
        section
            .get(key)
            .or_else(|| self.defaults.as_ref().and_then(|d| d.get(key)))
    }

    /// Entries of `section` whose key is all ASCII digits (device, button
    /// ids), followed by those it inherits from `[DEFAULT]`.
    pub fn numeric_entries<'a>(
        &'a self,
        section: &'a Section,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let inherited = self
            .defaults
            .iter()
            .flat_map(|d| d.entries.iter())
            .filter(move |(k, _)| section.get(k).is_none());
        section
            .entries
            .iter()
            .chain(inherited)
            .filter(|(k, _)| is_numeric_key(k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub fn is_numeric_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

/// Parse the text of a section file.
///
/// Keys are lowercased; values are trimmed. `key = value` and `key: value`
/// are both accepted. Lines starting with `#` or `;` are comments.
pub fn parse_sections(origin: &str, text: &str) -> Result<SectionFile, ConfigError> {
    let mut file = SectionFile::default();
    let mut current: Option<Section> = None;

    let syntax = |line: usize, details: String| ConfigError::Syntax {
        origin: origin.to_string(),
        line,
        details,
    };

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .ok_or_else(|| syntax(line_no, format!("unterminated section header: {line}")))?
                .trim();
            if name.is_empty() {
                return Err(syntax(line_no, "empty section name".to_string()));
            }
            if let Some(done) = current.take() {
                file.push(done);
            }
            if file.contains(name) {
                return Err(syntax(line_no, format!("duplicate section [{name}]")));
            }
            current = Some(Section {
                name: name.to_string(),
                entries: Vec::new(),
            });
            continue;
        }

        let Some(section) = current.as_mut() else {
            return Err(syntax(line_no, "entry before the first section header".to_string()));
        };
        let Some(split) = line.find(['=', ':']) else {
            return Err(syntax(line_no, format!("expected key = value, got: {line}")));
        };
        let key = line[..split].trim().to_lowercase();
        let value = line[split + 1..].trim().to_string();
        if key.is_empty() {
            return Err(syntax(line_no, "empty key".to_string()));
        }
        if section.get(&key).is_some() {
            return Err(syntax(
                line_no,
                format!("duplicate key {key} in [{}]", section.name),
            ));
        }
        section.entries.push((key, value));
    }

    if let Some(done) = current.take() {
        file.push(done);
    }
    Ok(file)
}

impl SectionFile {
    fn push(&mut self, section: Section) {
        if section.name == DEFAULT_SECTION {
            self.defaults = Some(section);
        } else {
            self.sections.push(section);
        }
    }

    fn contains(&self, name: &str) -> bool {
        if name == DEFAULT_SECTION {
            return self.defaults.is_some();
        }
        self.sections.iter().any(|s| s.name == name)
    }
}
