//! Keyword detection for incoming message text.

use regex::Regex;

/// Keyword root matched when no override is configured.
pub const DEFAULT_KEYWORD: &str = "ООБИ-24091";

/// Case-sensitive matcher for a keyword root plus any word-continuation suffix.
///
/// `ROOT`, `ROOTa`, `ROOT_2` and `xROOTy` all match; text without the root
/// never does. Absent or empty text is simply "no match".
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: Regex,
}

impl Matcher {
    /// Build a matcher for the given keyword root.
    ///
    /// The root is escaped, so regex metacharacters in it are matched literally.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyword is blank.
    pub fn new(keyword: &str) -> anyhow::Result<Self> {
        if keyword.trim().is_empty() {
            anyhow::bail!("matcher keyword must not be blank");
        }
        let pattern = Regex::new(&format!(r"{}\w*", regex::escape(keyword)))
            .map_err(|e| anyhow::anyhow!("invalid keyword pattern for {keyword:?}: {e}"))?;
        Ok(Self { pattern })
    }

    /// Returns `true` when the text contains the keyword root.
    pub fn matches(&self, text: Option<&str>) -> bool {
        match text {
            Some(t) if !t.is_empty() => self.pattern.is_match(t),
            _ => false,
        }
    }
}
