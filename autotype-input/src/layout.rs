//! Keyboard layout tables
//!
//! Each layout maps a character to the usage id and modifier bits a host
//! configured with that layout needs to see to produce the character.
//! Tables are built once on first use and never mutated afterwards.
//!
//! Dead keys (`^`, `´` and `` ` `` on German layouts) are left unmapped,
//! since typing them would take more than one keystroke.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use autotype_common::{modifier, usage, ScancodeReport, TranslationError};
use tracing::{debug, warn};

const N: u8 = modifier::NONE;
const S: u8 = modifier::LEFT_SHIFT;
const ALTGR: u8 = modifier::RIGHT_ALT;
/// Option key on Apple layouts
const OPT: u8 = modifier::LEFT_ALT;

/// Supported host keyboard layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutId {
    #[default]
    EnUs,
    DeDe,
    AppleMacDeDe,
    FrFr,
}

impl LayoutId {
    pub const ALL: [LayoutId; 4] = [
        LayoutId::EnUs,
        LayoutId::DeDe,
        LayoutId::AppleMacDeDe,
        LayoutId::FrFr,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            LayoutId::EnUs => "en_US",
            LayoutId::DeDe => "de_DE",
            LayoutId::AppleMacDeDe => "AppleMac_de_DE",
            LayoutId::FrFr => "fr_FR",
        }
    }

    /// Parse a layout name, falling back to `en_US` for unknown names
    pub fn parse_or_default(name: &str) -> Self {
        match name.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!("Layout {} not found, using {}", name, LayoutId::EnUs);
                LayoutId::EnUs
            }
        }
    }
}

impl FromStr for LayoutId {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayoutId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| TranslationError::UnknownLayout(s.to_string()))
    }
}

impl std::fmt::Display for LayoutId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single key press: usage id plus modifier bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub usage: u8,
    pub modifier: u8,
}

impl KeyStroke {
    pub const fn new(usage: u8, modifier: u8) -> Self {
        Self { usage, modifier }
    }

    /// Key-down report for this stroke
    pub fn report(&self) -> ScancodeReport {
        ScancodeReport::key(self.usage, self.modifier)
    }
}

/// Resolve a layout-independent key name (`"return"`, `"tab"`, ...)
pub fn key_by_name(name: &str) -> Option<KeyStroke> {
    let usage = match name {
        "return" | "enter" => usage::ENTER,
        "tab" | "tabulator" => usage::TAB,
        "esc" | "escape" => usage::ESCAPE,
        "backspace" | "bckspc" => usage::BACKSPACE,
        "space" => usage::SPACE,
        _ => return None,
    };
    Some(KeyStroke::new(usage, N))
}

/// Character table for one layout
#[derive(Debug)]
pub struct Layout {
    id: LayoutId,
    keys: HashMap<char, KeyStroke>,
}

impl Layout {
    /// Shared table for `id`
    pub fn get(id: LayoutId) -> &'static Layout {
        static TABLES: OnceLock<HashMap<LayoutId, Layout>> = OnceLock::new();
        let tables = TABLES.get_or_init(|| {
            LayoutId::ALL
                .into_iter()
                .map(|id| (id, Layout::build(id)))
                .collect()
        });
        // Every LayoutId is inserted above
        &tables[&id]
    }

    pub fn id(&self) -> LayoutId {
        self.id
    }

    pub fn lookup(&self, c: char) -> Option<KeyStroke> {
        self.keys.get(&c).copied()
    }

    /// Number of mapped characters
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn build(id: LayoutId) -> Layout {
        let mut keys = HashMap::new();

        insert_whitespace(&mut keys);
        match id {
            LayoutId::EnUs => {
                insert_letters(&mut keys, QWERTY_LETTERS);
                insert_digits(&mut keys);
                insert(&mut keys, EN_US_SYMBOLS);
            }
            LayoutId::DeDe => {
                insert_letters(&mut keys, QWERTZ_LETTERS);
                insert_digits(&mut keys);
                insert(&mut keys, DE_DE_SYMBOLS);
            }
            LayoutId::AppleMacDeDe => {
                insert_letters(&mut keys, QWERTZ_LETTERS);
                insert_digits(&mut keys);
                insert(&mut keys, DE_DE_SYMBOLS);
                for c in APPLE_DE_UNMAPPED {
                    keys.remove(c);
                }
                insert(&mut keys, APPLE_DE_OVERRIDES);
            }
            LayoutId::FrFr => {
                insert_letters(&mut keys, AZERTY_LETTERS);
                // Digits need shift on AZERTY
                for (i, c) in ('1'..='9').chain(['0']).enumerate() {
                    keys.insert(c, KeyStroke::new(usage::ONE + i as u8, S));
                }
                insert(&mut keys, FR_FR_SYMBOLS);
            }
        }

        debug!("Built layout {} with {} characters", id, keys.len());
        Layout { id, keys }
    }
}

fn insert(keys: &mut HashMap<char, KeyStroke>, table: &[(char, u8, u8)]) {
    for &(c, usage, modifier) in table {
        keys.insert(c, KeyStroke::new(usage, modifier));
    }
}

fn insert_whitespace(keys: &mut HashMap<char, KeyStroke>) {
    keys.insert(' ', KeyStroke::new(usage::SPACE, N));
    keys.insert('\t', KeyStroke::new(usage::TAB, N));
    keys.insert('\n', KeyStroke::new(usage::ENTER, N));
}

/// `letters[i]` is the lowercase letter on usage `A + i`; non-letters are skipped
fn insert_letters(keys: &mut HashMap<char, KeyStroke>, letters: &[char; 26]) {
    for (i, &c) in letters.iter().enumerate() {
        if !c.is_ascii_lowercase() {
            continue;
        }
        let usage = usage::A + i as u8;
        keys.insert(c, KeyStroke::new(usage, N));
        keys.insert(c.to_ascii_uppercase(), KeyStroke::new(usage, S));
    }
}

fn insert_digits(keys: &mut HashMap<char, KeyStroke>) {
    for (i, c) in ('1'..='9').chain(['0']).enumerate() {
        keys.insert(c, KeyStroke::new(usage::ONE + i as u8, N));
    }
}

// ============================================================================
// Letter rows
// ============================================================================

const QWERTY_LETTERS: &[char; 26] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
    'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

const QWERTZ_LETTERS: &[char; 26] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
    'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'z', 'y',
];

// AZERTY has 'm' on the semicolon key; usage 0x10 carries ',' (see FR_FR_SYMBOLS).
const AZERTY_LETTERS: &[char; 26] = &[
    'q', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', ',',
    'n', 'o', 'p', 'a', 'r', 's', 't', 'u', 'v', 'z', 'x', 'y', 'w',
];

// ============================================================================
// Symbol tables
// ============================================================================

const EN_US_SYMBOLS: &[(char, u8, u8)] = &[
    ('!', 0x1E, S),
    ('@', 0x1F, S),
    ('#', 0x20, S),
    ('$', 0x21, S),
    ('%', 0x22, S),
    ('^', 0x23, S),
    ('&', 0x24, S),
    ('*', 0x25, S),
    ('(', 0x26, S),
    (')', 0x27, S),
    ('-', usage::MINUS, N),
    ('_', usage::MINUS, S),
    ('=', usage::EQUAL, N),
    ('+', usage::EQUAL, S),
    ('[', usage::LEFT_BRACKET, N),
    ('{', usage::LEFT_BRACKET, S),
    (']', usage::RIGHT_BRACKET, N),
    ('}', usage::RIGHT_BRACKET, S),
    ('\\', usage::BACKSLASH, N),
    ('|', usage::BACKSLASH, S),
    (';', usage::SEMICOLON, N),
    (':', usage::SEMICOLON, S),
    ('\'', usage::APOSTROPHE, N),
    ('"', usage::APOSTROPHE, S),
    ('`', usage::GRAVE, N),
    ('~', usage::GRAVE, S),
    (',', usage::COMMA, N),
    ('<', usage::COMMA, S),
    ('.', usage::PERIOD, N),
    ('>', usage::PERIOD, S),
    ('/', usage::SLASH, N),
    ('?', usage::SLASH, S),
];

const DE_DE_SYMBOLS: &[(char, u8, u8)] = &[
    ('!', 0x1E, S),
    ('"', 0x1F, S),
    ('§', 0x20, S),
    ('$', 0x21, S),
    ('%', 0x22, S),
    ('&', 0x23, S),
    ('/', 0x24, S),
    ('(', 0x25, S),
    (')', 0x26, S),
    ('=', 0x27, S),
    ('²', 0x1F, ALTGR),
    ('³', 0x20, ALTGR),
    ('{', 0x24, ALTGR),
    ('[', 0x25, ALTGR),
    (']', 0x26, ALTGR),
    ('}', 0x27, ALTGR),
    ('ß', usage::MINUS, N),
    ('?', usage::MINUS, S),
    ('\\', usage::MINUS, ALTGR),
    ('ü', usage::LEFT_BRACKET, N),
    ('Ü', usage::LEFT_BRACKET, S),
    ('+', usage::RIGHT_BRACKET, N),
    ('*', usage::RIGHT_BRACKET, S),
    ('~', usage::RIGHT_BRACKET, ALTGR),
    ('#', usage::NON_US_HASH, N),
    ('\'', usage::NON_US_HASH, S),
    ('ö', usage::SEMICOLON, N),
    ('Ö', usage::SEMICOLON, S),
    ('ä', usage::APOSTROPHE, N),
    ('Ä', usage::APOSTROPHE, S),
    ('°', usage::GRAVE, S),
    (',', usage::COMMA, N),
    (';', usage::COMMA, S),
    ('.', usage::PERIOD, N),
    (':', usage::PERIOD, S),
    ('-', usage::SLASH, N),
    ('_', usage::SLASH, S),
    ('<', usage::NON_US_BACKSLASH, N),
    ('>', usage::NON_US_BACKSLASH, S),
    ('|', usage::NON_US_BACKSLASH, ALTGR),
    ('@', 0x14, ALTGR), // q
    ('€', 0x08, ALTGR), // e
    ('µ', 0x10, ALTGR), // m
];

/// Characters the Apple German layout has no single stroke for
const APPLE_DE_UNMAPPED: &[char] = &['²', '³', '~'];

/// Apple German differs from the PC table in its Option combinations and
/// in the ISO key swap: Apple ISO keyboards exchange the grave and
/// non-US backslash usages.
const APPLE_DE_OVERRIDES: &[(char, u8, u8)] = &[
    ('@', 0x0F, OPT), // l
    ('€', 0x08, OPT), // e
    ('µ', 0x10, OPT), // m
    ('[', 0x22, OPT), // 5
    (']', 0x23, OPT), // 6
    ('|', 0x24, OPT), // 7
    ('\\', 0x24, OPT | S),
    ('{', 0x25, OPT), // 8
    ('}', 0x26, OPT), // 9
    ('<', usage::GRAVE, N),
    ('>', usage::GRAVE, S),
    ('°', usage::NON_US_BACKSLASH, S),
];

const FR_FR_SYMBOLS: &[(char, u8, u8)] = &[
    ('m', 0x33, N),
    ('M', 0x33, S),
    (',', 0x10, N),
    ('!', 0x38, N),
    ('@', 0x27, ALTGR),
    ('#', 0x20, ALTGR),
    ('$', 0x30, N),
    ('%', 0x34, S),
    ('^', 0x26, ALTGR),
    ('&', 0x1E, N),
    ('*', 0x32, N),
    ('(', 0x22, N),
    (')', 0x2D, N),
    ('-', 0x23, N),
    ('=', 0x2E, N),
    ('[', 0x22, ALTGR),
    (']', 0x2D, ALTGR),
    ('\\', 0x25, ALTGR),
    (';', 0x36, N),
    ('\'', 0x21, N),
    ('`', 0x24, ALTGR),
    ('.', 0x36, S),
    ('/', 0x37, S),
    ('_', 0x25, N),
    ('+', 0x2E, S),
    ('{', 0x21, ALTGR),
    ('}', 0x2E, ALTGR),
    ('|', 0x23, ALTGR),
    (':', 0x37, N),
    ('"', 0x20, N),
    ('~', 0x1F, ALTGR),
    ('<', 0x64, N),
    ('>', 0x64, S),
    ('?', 0x10, S),
    ('é', 0x1F, N),
    ('è', 0x24, N),
    ('ç', 0x26, N),
    ('à', 0x27, N),
    ('ù', 0x34, N),
    ('²', 0x35, N),
    ('°', 0x2D, S),
    ('£', 0x30, S),
    ('µ', 0x32, S),
    ('§', 0x38, S),
    ('€', 0x08, ALTGR),
    ('¤', 0x30, ALTGR),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layout_names() {
        for id in LayoutId::ALL {
            assert_eq!(id.name().parse::<LayoutId>(), Ok(id));
        }
        assert_eq!(
            "xx_XX".parse::<LayoutId>(),
            Err(TranslationError::UnknownLayout("xx_XX".into()))
        );
        assert_eq!(LayoutId::parse_or_default("xx_XX"), LayoutId::EnUs);
    }

    #[test]
    fn test_qwertz_swaps_y_and_z() {
        let de = Layout::get(LayoutId::DeDe);
        assert_eq!(de.lookup('z'), Some(KeyStroke::new(0x1C, N)));
        assert_eq!(de.lookup('Y'), Some(KeyStroke::new(0x1D, S)));
        assert_eq!(de.lookup('@'), Some(KeyStroke::new(0x14, ALTGR)));
        assert_eq!(de.lookup('^'), None);
    }

    #[test]
    fn test_apple_overrides() {
        let mac = Layout::get(LayoutId::AppleMacDeDe);
        assert_eq!(mac.lookup('@'), Some(KeyStroke::new(0x0F, OPT)));
        assert_eq!(mac.lookup('~'), None);
        assert_eq!(mac.lookup('ö'), Layout::get(LayoutId::DeDe).lookup('ö'));
    }

    #[test]
    fn test_azerty_rows() {
        let fr = Layout::get(LayoutId::FrFr);
        assert_eq!(fr.lookup('a'), Some(KeyStroke::new(0x14, N)));
        assert_eq!(fr.lookup('M'), Some(KeyStroke::new(0x33, S)));
        assert_eq!(fr.lookup(','), Some(KeyStroke::new(0x10, N)));
        assert_eq!(fr.lookup('1'), Some(KeyStroke::new(0x1E, S)));
        assert_eq!(fr.lookup('é'), Some(KeyStroke::new(0x1F, N)));
    }

    #[test]
    fn test_key_names() {
        assert_eq!(key_by_name("tabulator"), key_by_name("tab"));
        assert_eq!(key_by_name("enter").map(|k| k.usage), Some(usage::ENTER));
        assert_eq!(key_by_name("bckspc").map(|k| k.usage), Some(usage::BACKSPACE));
        assert!(key_by_name("hyper").is_none());
    }
}
