//! Destination paths from an output template.
//!
//! The template may contain one `%s`, replaced with the source file name
//! minus its extension; `%%` is a literal percent sign.
//!
//! - `tn_%s.jpg` + `photos/IMG_0042.JPG` → `photos/tn_IMG_0042.jpg`
//! - `/tmp/thumbs/%s.png` + `photos/IMG_0042.JPG` → `/tmp/thumbs/IMG_0042.png`
//!
//! Relative templates land beside the source; absolute templates discard the
//! source directory.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("output template '{0}' has more than one %s")]
    TooManyPlaceholders(String),
    #[error("{0} has no file name")]
    NoFileName(PathBuf),
}

/// Expands an output template for each source.
#[derive(Debug, Clone)]
pub struct OutputNamer {
    template: String,
}

impl OutputNamer {
    /// Rejects templates with more than one placeholder up front.
    pub fn new(template: &str) -> Result<Self, NamingError> {
        expand(template, "")?;
        Ok(Self {
            template: template.to_string(),
        })
    }

    /// Expand the template for `source`. A relative result is placed in the
    /// source file's directory, not the working directory; an absolute one
    /// is used as is.
    pub fn destination(&self, source: &Path) -> Result<PathBuf, NamingError> {
        let name = source
            .file_name()
            .ok_or_else(|| NamingError::NoFileName(source.to_path_buf()))?
            .to_string_lossy();
        let expanded = PathBuf::from(expand(&self.template, basename(&name))?);
        if expanded.is_absolute() {
            return Ok(expanded);
        }
        Ok(match source.parent() {
            Some(dir) => dir.join(expanded),
            None => expanded,
        })
    }
}

/// File name without its last extension. Dot-files keep their name.
pub fn basename(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    }
}

fn expand(template: &str, stem: &str) -> Result<String, NamingError> {
    let mut out = String::with_capacity(template.len() + stem.len());
    let mut substituted = false;
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => {
                if substituted {
                    return Err(NamingError::TooManyPlaceholders(template.to_string()));
                }
                substituted = true;
                out.push_str(stem);
            }
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(out)
}
