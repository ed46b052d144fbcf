//! Persian-aware text normalization, sentence splitting, and token
//! counting.
//!
//! Legal corpus text arrives with mixed Persian/Arabic codepoints and
//! Persian-script digits. Everything is normalized before tokenization so
//! token counts are stable regardless of input script, which keeps
//! segmentation deterministic across re-runs.

use std::sync::LazyLock;

use regex::Regex;

/// A sentence-like unit with its token count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub token_count: usize,
}

static SPACE_BEFORE_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+/").expect("static regex"));
static SPACE_AFTER_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\s+(\d+)").expect("static regex"));
static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Normalize Persian/Arabic text for tokenization and embedding.
///
/// Applies, in order: digit normalization (Persian and Arabic-Indic to
/// ASCII), hamza folding, Arabic-to-Persian letter forms, zero-width
/// joiner handling, control-character stripping, date-slash fixup
/// (`1361 / 02 / 13` → `1361/02/13`), and whitespace collapse.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            // Persian digits
            '۰'..='۹' => out.push(char::from(b'0' + (ch as u32 - '۰' as u32) as u8)),
            // Arabic-Indic digits
            '٠'..='٩' => out.push(char::from(b'0' + (ch as u32 - '٠' as u32) as u8)),
            // Hamza forms. Yeh-with-hamza (ئ) is kept: it appears in
            // valid words like مسئول.
            'أ' | 'إ' => out.push('ا'),
            'ؤ' => out.push('و'),
            'ء' => {}
            // Arabic letter forms used interchangeably in the corpus
            'ي' => out.push('ی'),
            'ك' => out.push('ک'),
            // Zero-width (non-)joiners become spaces; directional marks drop
            '\u{200c}' | '\u{200d}' => out.push(' '),
            '\u{200e}' | '\u{200f}' => {}
            c if c.is_control() && c != '\n' => {}
            c => out.push(c),
        }
    }

    let out = SPACE_BEFORE_SLASH.replace_all(&out, "$1/");
    let out = SPACE_AFTER_SLASH.replace_all(&out, "/$1");
    let out = MULTI_SPACE.replace_all(&out, " ");
    out.trim().to_string()
}

/// Count tokens in already-normalized text.
///
/// Whitespace-delimited after normalization; digit normalization has
/// already run, so numeric tokens count identically in either script.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Whether a character ends a sentence in Persian or Latin punctuation.
fn is_sentence_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '؟' | '⸮')
}

/// Split normalized text into sentence units with token counts.
///
/// Terminators stay attached to their sentence. Paragraph breaks (input
/// newlines survive normalization) also end a sentence, so headings and
/// unterminated list items become their own units rather than fusing
/// with the following sentence.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    let mut push_current = |current: &mut String, sentences: &mut Vec<Sentence>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            sentences.push(Sentence {
                text: trimmed.to_string(),
                token_count: count_tokens(trimmed),
            });
        }
        current.clear();
    };

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\n' {
            push_current(&mut current, &mut sentences);
            continue;
        }
        current.push(ch);
        if is_sentence_terminal(ch) {
            // Abbreviation-style runs ("ق.م.") stay together: only break
            // when the terminator is followed by whitespace or end of text.
            match chars.peek() {
                Some(next) if !next.is_whitespace() => {}
                _ => push_current(&mut current, &mut sentences),
            }
        }
    }
    push_current(&mut current, &mut sentences);

    sentences
}

/// Normalize and split in one step; the segmenter's entry point.
pub fn sentences_of(raw: &str) -> Vec<Sentence> {
    // Normalize per line so paragraph breaks survive whitespace collapse.
    let mut out = Vec::new();
    for line in raw.lines() {
        let normalized = normalize(line);
        if normalized.is_empty() {
            continue;
        }
        out.extend(split_sentences(&normalized));
    }
    out
}
