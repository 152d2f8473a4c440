//! Replay progress through a scenario text
//!
//! Also owns the keystroke encoding: the injection grammar gives a few
//! characters a special meaning, so those are wrapped in braces.

use std::fmt;

use crate::scenario::Slot;

/// Characters that are control syntax in the keystroke grammar
pub const RESERVED_CHARS: [char; 8] = ['{', '}', '(', ')', '%', '+', '^', '~'];

/// One synthetic keystroke produced from a scenario character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    character: char,
}

impl Keystroke {
    pub fn new(character: char) -> Self {
        Self { character }
    }

    /// The literal character, for backends that type unicode text directly
    pub fn character(&self) -> char {
        self.character
    }

    /// The keystroke in escaped key-sequence form, e.g. `{+}` for `+`
    pub fn encoded(&self) -> String {
        if RESERVED_CHARS.contains(&self.character) {
            format!("{{{}}}", self.character)
        } else {
            self.character.to_string()
        }
    }
}

impl fmt::Display for Keystroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}

/// Progress pointer into the active slot's text
#[derive(Debug, Clone)]
pub struct ReplayCursor {
    slot: Slot,
    chars: Vec<char>,
    position: usize,
}

impl ReplayCursor {
    pub fn new(slot: Slot, text: &str) -> Self {
        Self {
            slot,
            chars: text.chars().collect(),
            position: 0,
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Number of characters already replayed
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.chars.len()
    }

    /// The character at the cursor, or `None` at end of text
    pub fn peek_next_char(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    /// The next keystroke to inject, or `None` at end of text
    pub fn next_keystroke(&self) -> Option<Keystroke> {
        self.peek_next_char().map(Keystroke::new)
    }

    /// Move past the current character; a no-op at end of text
    pub fn advance(&mut self) {
        if !self.is_exhausted() {
            self.position += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: usize) -> Slot {
        Slot::new(index).unwrap()
    }

    #[test]
    fn test_reserved_chars_are_wrapped() {
        let encoded: Vec<String> = RESERVED_CHARS
            .iter()
            .map(|&c| Keystroke::new(c).encoded())
            .collect();
        assert_eq!(
            encoded,
            vec!["{{}", "{}}", "{(}", "{)}", "{%}", "{+}", "{^}", "{~}"]
        );
    }

    #[test]
    fn test_plain_chars_untouched() {
        for c in ['a', 'Z', '7', ' ', '\r', '\n', 'é', '[', ']', '*'] {
            let keystroke = Keystroke::new(c);
            assert_eq!(keystroke.encoded(), c.to_string());
            assert_eq!(keystroke.character(), c);
        }
    }

    #[test]
    fn test_walks_text_to_end() {
        let mut cursor = ReplayCursor::new(slot(2), "hé!");
        assert_eq!(cursor.slot(), slot(2));
        assert_eq!(cursor.len(), 3);

        let mut seen = String::new();
        while let Some(c) = cursor.peek_next_char() {
            seen.push(c);
            cursor.advance();
        }
        assert_eq!(seen, "hé!");
        assert_eq!(cursor.position(), 3);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_advance_never_passes_end() {
        let mut cursor = ReplayCursor::new(slot(0), "x");
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.next_keystroke(), None);
    }

    #[test]
    fn test_empty_text_starts_exhausted() {
        let cursor = ReplayCursor::new(slot(0), "");
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.peek_next_char(), None);
    }
}
