//! Loaded project-file text.  `.pro`/`.pri` files written on Windows
//! routinely carry a UTF-8 BOM and CRLF line endings; both are stripped
//! at load time so the lexer only ever sees plain `\n` (a CR between a
//! continuation backslash and its newline would otherwise break the
//! continuation).

pub struct File {
    path: std::path::PathBuf,
    buffer: String,
}

impl File {
    pub fn new(
        path: &std::path::Path,
    ) -> std::result::Result<Self, std::io::Error> {
        Ok(Self {
            path: path.to_owned(),
            buffer: normalize(std::fs::read_to_string(path)?),
        })
    }

    pub fn new_from_str(s: &str) -> Self {
        Self {
            path: std::path::Path::new(":memory:").to_owned(),
            buffer: normalize(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        self.buffer.as_str()
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn normalize(text: String) -> String {
    let text = match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    };
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bom_and_crlf_are_normalized() {
        let f = File::new_from_str("\u{feff}SOURCES += \\\r\n    a.cpp\r\n");
        assert_eq!(f.as_str(), "SOURCES += \\\n    a.cpp\n");
        assert_eq!(f.path(), std::path::Path::new(":memory:"));
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let f = File::new_from_str("SOURCES += a.cpp\n");
        assert_eq!(f.as_str(), "SOURCES += a.cpp\n");
    }
}
