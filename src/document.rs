//! # Document Module
//!
//! Modello di un documento Markdown/MDX letto da disco.
//!
//! ## Responsabilità:
//! - Separa il frontmatter YAML dal corpo (mappa ordinata, passata invariata)
//! - Trova i riferimenti immagine `![alt](target "title")` nel corpo
//! - Riscrive il corpo sostituendo ogni riferimento con il suo esito
//! - Produce il blocco finale: frontmatter combinato + corpo riscritto
//!
//! ## Sorgenti immagine:
//! - `http://` / `https://`: lasciate com'erano, non contate
//! - `data:`: immagine inline in base64
//! - tutto il resto: path locale, risolto da `FileManager`
//!
//! ## Formato di output:
//! ```text
//! ---
//! source_file: docs/guide.md
//! type: documentation
//! last_processed: 2024-01-01T00:00:00+00:00
//! title: Guide            # chiavi del frontmatter originale
//! word_count: 120
//! has_images: true
//! ---
//!
//! ...corpo riscritto...
//! ```

use crate::error::DocumentError;
use base64::Engine;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Frontmatter entries in source order
pub type Frontmatter = Mapping;

const FRONTMATTER_DELIMITER: &str = "---";

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"!\[(.*?)\]\(\s*(<[^>]*>|[^)\s]+)(?:\s+"[^"]*")?\s*\)"#)
            .expect("image pattern is a valid regex")
    })
}

/// Where the bytes of an embedded image come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Local(String),
    /// Full `data:` URI
    Inline(String),
}

/// One embedded image, by position in the document body
#[derive(Debug, Clone)]
pub struct ImageReference {
    pub alt_text: String,
    pub source: ImageSource,
    /// Byte range of the whole `![..](..)` in the body
    pub span: Range<usize>,
    /// Verbatim markdown, kept as fallback
    pub original: String,
}

impl ImageReference {
    /// Target as written in the document, shortened for inline data
    pub fn display_target(&self) -> String {
        match &self.source {
            ImageSource::Local(path) => path.clone(),
            ImageSource::Inline(uri) => {
                let header = uri.split(',').next().unwrap_or("data:");
                format!("{},…", header)
            }
        }
    }
}

/// A parsed source document
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub frontmatter: Frontmatter,
    /// Body without the frontmatter block
    pub body: String,
    pub images: Vec<ImageReference>,
}

impl Document {
    /// Split frontmatter and scan image references
    pub fn parse(path: impl Into<PathBuf>, raw: &str) -> Result<Self, DocumentError> {
        let path = path.into();
        let (frontmatter_text, body) = split_frontmatter(raw);

        let frontmatter = match frontmatter_text {
            Some(text) => parse_frontmatter(&path, text)?,
            None => Frontmatter::new(),
        };

        let images = scan_images(body);
        Ok(Self {
            path,
            frontmatter,
            body: body.to_string(),
            images,
        })
    }

    /// Body with `replacements[i]` substituted for `images[i]`
    pub fn rewrite_body(&self, replacements: &[String]) -> String {
        let mut output = String::with_capacity(self.body.len());
        let mut cursor = 0;

        for (image, replacement) in self.images.iter().zip(replacements) {
            output.push_str(&self.body[cursor..image.span.start]);
            output.push_str(replacement);
            cursor = image.span.end;
        }
        output.push_str(&self.body[cursor..]);
        output
    }

    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }

    pub fn has_images(&self) -> bool {
        self.body.contains("![")
    }

    /// Final block for the combined artifact
    pub fn render(&self, rewritten_body: &str, processed_at: &str) -> Result<String, DocumentError> {
        let mut header = Mapping::new();
        header.insert(
            Value::from("source_file"),
            Value::from(self.path.to_string_lossy().into_owned()),
        );
        header.insert(Value::from("type"), Value::from("documentation"));
        header.insert(Value::from("last_processed"), Value::from(processed_at));
        for (key, value) in &self.frontmatter {
            header.insert(key.clone(), value.clone());
        }
        header.insert(Value::from("word_count"), Value::from(self.word_count() as u64));
        header.insert(Value::from("has_images"), Value::from(self.has_images()));

        let yaml = serde_yaml::to_string(&header).map_err(|e| DocumentError::Render {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        Ok(format!("---\n{}---\n\n{}", yaml, rewritten_body))
    }
}

/// `(frontmatter, body)`; frontmatter only when the text opens with `---`
/// and a closing `---` line follows
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = raw.strip_prefix(FRONTMATTER_DELIMITER) else {
        return (None, raw);
    };
    if !(rest.starts_with('\n') || rest.starts_with("\r\n")) {
        return (None, raw);
    }

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if offset > 0 && line.trim_end() == FRONTMATTER_DELIMITER {
            let frontmatter = rest[..offset].trim();
            let body = rest[offset + line.len()..].trim();
            return (Some(frontmatter), body);
        }
        offset += line.len();
    }

    (None, raw)
}

fn parse_frontmatter(path: &Path, text: &str) -> Result<Frontmatter, DocumentError> {
    if text.trim().is_empty() {
        return Ok(Frontmatter::new());
    }

    let value: Value = serde_yaml::from_str(text).map_err(|e| DocumentError::Frontmatter {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    match value {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Frontmatter::new()),
        other => Err(DocumentError::Frontmatter {
            path: path.to_path_buf(),
            message: format!("expected a mapping, found {:?}", other),
        }),
    }
}

fn scan_images(body: &str) -> Vec<ImageReference> {
    image_pattern()
        .captures_iter(body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let alt_text = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let target = caps.get(2)?.as_str();
            let target = target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .unwrap_or(target);

            if target.starts_with("http://") || target.starts_with("https://") {
                return None;
            }

            let source = if target.starts_with("data:") {
                ImageSource::Inline(target.to_string())
            } else {
                ImageSource::Local(target.to_string())
            };

            Some(ImageReference {
                alt_text,
                source,
                span: whole.range(),
                original: whole.as_str().to_string(),
            })
        })
        .collect()
}

/// Bytes of a base64 `data:` URI
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(payload).ok()
}
