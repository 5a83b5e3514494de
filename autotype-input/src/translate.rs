//! Text to scancode translation
//!
//! Every mapped character becomes a key-down report followed by an all-zero
//! key-up report, so repeated characters are seen as discrete keystrokes.
//! Characters the layout cannot produce are skipped and counted.

use autotype_common::{ScancodeReport, TranslationError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::layout::{key_by_name, KeyStroke, Layout, LayoutId};

/// Substitution tokens embedded in stored credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Substitutions {
    /// Press Tab
    pub tab: String,
    /// Press Return
    pub enter: String,
    /// Replaced by the current one-time code before translation
    pub otp: String,
}

impl Default for Substitutions {
    fn default() -> Self {
        Self {
            tab: "{TAB}".into(),
            enter: "{RETURN}".into(),
            otp: "{OTP}".into(),
        }
    }
}

/// A piece of credential text after splitting on key tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Tab,
    Return,
}

/// Split `text` on the Tab and Return tokens, keeping the tokens as segments
pub fn split_tokens<'a>(text: &'a str, subs: &Substitutions) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut rest = text;

    loop {
        let tab = find_token(rest, &subs.tab);
        let enter = find_token(rest, &subs.enter);

        let (pos, len, segment) = match (tab, enter) {
            (Some(t), Some(e)) if e < t => (e, subs.enter.len(), Segment::Return),
            (Some(t), _) => (t, subs.tab.len(), Segment::Tab),
            (None, Some(e)) => (e, subs.enter.len(), Segment::Return),
            (None, None) => break,
        };

        if pos > 0 {
            segments.push(Segment::Text(&rest[..pos]));
        }
        segments.push(segment);
        rest = &rest[pos + len..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    segments
}

fn find_token(haystack: &str, token: &str) -> Option<usize> {
    if token.is_empty() {
        None
    } else {
        haystack.find(token)
    }
}

/// Result of a translation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    /// Key-down/key-up report pairs in typing order
    pub reports: Vec<ScancodeReport>,
    /// Characters skipped because the layout has no mapping for them
    pub dropped: usize,
}

impl Translation {
    fn push(&mut self, stroke: KeyStroke) {
        self.reports.push(stroke.report());
        self.reports.push(ScancodeReport::RELEASE);
    }

    /// Number of keystrokes (report pairs)
    pub fn keystrokes(&self) -> usize {
        self.reports.len() / 2
    }

    pub fn lost_characters(&self) -> bool {
        self.dropped > 0
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Append another translation, summing dropped counts
    pub fn extend(&mut self, other: Translation) {
        self.reports.extend(other.reports);
        self.dropped += other.dropped;
    }
}

/// Translates credential text for one host layout
#[derive(Debug, Clone)]
pub struct Translator {
    layout: &'static Layout,
    substitutions: Substitutions,
}

impl Translator {
    pub fn new(layout: LayoutId) -> Self {
        Self {
            layout: Layout::get(layout),
            substitutions: Substitutions::default(),
        }
    }

    pub fn with_substitutions(mut self, substitutions: Substitutions) -> Self {
        self.substitutions = substitutions;
        self
    }

    pub fn layout(&self) -> LayoutId {
        self.layout.id()
    }

    pub fn substitutions(&self) -> &Substitutions {
        &self.substitutions
    }

    /// Whether `text` still carries the OTP token
    pub fn contains_otp(&self, text: &str) -> bool {
        !self.substitutions.otp.is_empty() && text.contains(&self.substitutions.otp)
    }

    /// Replace the OTP token with `code`
    pub fn substitute_otp(&self, text: &str, code: &str) -> String {
        if self.substitutions.otp.is_empty() {
            return text.to_string();
        }
        text.replace(&self.substitutions.otp, code)
    }

    /// Translate text including Tab/Return tokens.
    ///
    /// Fails only when an unreplaced OTP token is present; typing the
    /// placeholder literally would enter a wrong credential.
    pub fn translate(&self, text: &str) -> Result<Translation, TranslationError> {
        if self.contains_otp(text) {
            return Err(TranslationError::OtpPlaceholder);
        }

        let mut out = Translation::default();
        for segment in split_tokens(text, &self.substitutions) {
            match segment {
                Segment::Tab => out.push(KeyStroke::new(autotype_common::usage::TAB, 0)),
                Segment::Return => out.push(KeyStroke::new(autotype_common::usage::ENTER, 0)),
                Segment::Text(chunk) => self.translate_chars(chunk, &mut out),
            }
        }

        if out.lost_characters() {
            debug!("{} characters without mapping in {}", out.dropped, self.layout.id());
        }
        Ok(out)
    }

    /// Translate a named key such as `"return"` or `"tabulator"`
    pub fn translate_key(&self, name: &str) -> Result<Translation, TranslationError> {
        let stroke = key_by_name(name).ok_or_else(|| TranslationError::UnknownKey(name.to_string()))?;
        let mut out = Translation::default();
        out.push(stroke);
        Ok(out)
    }

    fn translate_chars(&self, text: &str, out: &mut Translation) {
        for c in text.chars() {
            match self.layout.lookup(c) {
                Some(stroke) => {
                    trace!("'{}' > {}", c, stroke.report());
                    out.push(stroke);
                }
                None => {
                    trace!("'{}' mapping not found", c);
                    out.dropped += 1;
                }
            }
        }
    }
}

/// Translate `text` for `layout` using the default substitution tokens
pub fn translate(text: &str, layout: LayoutId) -> Result<Translation, TranslationError> {
    Translator::new(layout).translate(text)
}
