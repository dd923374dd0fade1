//! Spoken number parsing
//!
//! Recognisers return digits ("5", "-3.5") or words ("minus three point
//! five", "one hundred and two") depending on the engine and the phrasing.
//! Both forms are accepted.

use regex::Regex;
use std::sync::LazyLock;

/// Leading numeric part of a token ("5", "-3.5", "5°c", "2nd")
static DIGITS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordKind {
    Unit(u32),
    Ten(u32),
    Hundred,
}

fn word_kind(word: &str) -> Option<WordKind> {
    let kind = match word {
        "zero" => WordKind::Unit(0),
        "one" => WordKind::Unit(1),
        "two" => WordKind::Unit(2),
        "three" => WordKind::Unit(3),
        "four" => WordKind::Unit(4),
        "five" => WordKind::Unit(5),
        "six" => WordKind::Unit(6),
        "seven" => WordKind::Unit(7),
        "eight" => WordKind::Unit(8),
        "nine" => WordKind::Unit(9),
        "ten" => WordKind::Unit(10),
        "eleven" => WordKind::Unit(11),
        "twelve" => WordKind::Unit(12),
        "thirteen" => WordKind::Unit(13),
        "fourteen" => WordKind::Unit(14),
        "fifteen" => WordKind::Unit(15),
        "sixteen" => WordKind::Unit(16),
        "seventeen" => WordKind::Unit(17),
        "eighteen" => WordKind::Unit(18),
        "nineteen" => WordKind::Unit(19),
        "twenty" => WordKind::Ten(20),
        "thirty" => WordKind::Ten(30),
        "forty" => WordKind::Ten(40),
        "fifty" => WordKind::Ten(50),
        "sixty" => WordKind::Ten(60),
        "seventy" => WordKind::Ten(70),
        "eighty" => WordKind::Ten(80),
        "ninety" => WordKind::Ten(90),
        "hundred" => WordKind::Hundred,
        _ => return None,
    };
    Some(kind)
}

/// Single-word answers recognisers commonly mishear as other words
fn homophone(word: &str) -> Option<f64> {
    match word {
        "to" | "too" => Some(2.0),
        "for" | "fore" => Some(4.0),
        "won" => Some(1.0),
        _ => None,
    }
}

fn fraction_digit(word: &str) -> Option<char> {
    match word {
        "oh" => Some('0'),
        _ => match word_kind(word) {
            Some(WordKind::Unit(n)) if n < 10 => char::from_digit(n, 10),
            _ => None,
        },
    }
}

/// Lowercased words with surrounding punctuation removed. Hyphenated
/// number words ("twenty-five") are split.
fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    for raw in text.split_whitespace() {
        let lower = raw.to_lowercase();
        if DIGITS_PATTERN.is_match(&lower) {
            words.push(lower);
            continue;
        }
        for part in lower.split('-') {
            let trimmed = part.trim_matches(|c: char| !c.is_alphanumeric());
            if !trimmed.is_empty() {
                words.push(trimmed.to_string());
            }
        }
    }
    words
}

/// Integer part written in words; returns the value and words consumed
fn parse_word_integer(words: &[String]) -> Option<(u32, usize)> {
    let mut current: u32 = 0;
    let mut last: Option<WordKind> = None;
    let mut consumed = 0;

    // "a hundred"
    let mut start = 0;
    if words.first().map(String::as_str) == Some("a")
        && words.get(1).map(String::as_str) == Some("hundred")
    {
        start = 1;
    }

    for (offset, word) in words[start..].iter().enumerate() {
        let kind = word_kind(word);
        match (kind, last) {
            (Some(WordKind::Unit(n)), None) => current = n,
            (Some(WordKind::Unit(n)), Some(WordKind::Ten(_))) if (1..10).contains(&n) => {
                current += n
            }
            (Some(WordKind::Unit(n)), Some(WordKind::Hundred)) => current += n,
            (Some(WordKind::Ten(t)), None) => current = t,
            (Some(WordKind::Ten(t)), Some(WordKind::Hundred)) => current += t,
            (Some(WordKind::Hundred), None) => current = 100,
            (Some(WordKind::Hundred), Some(WordKind::Unit(_))) if (1..10).contains(&current) => {
                current *= 100
            }
            (None, Some(WordKind::Hundred)) if word == "and" => continue,
            _ => break,
        }
        last = kind;
        consumed = start + offset + 1;
    }

    if consumed == 0 {
        None
    } else {
        Some((current, consumed))
    }
}

/// Decimal digits after "point"; returns the fraction and words consumed
fn parse_fraction(words: &[String]) -> Option<(f64, usize)> {
    if let Some(first) = words.first() {
        if first.chars().all(|c| c.is_ascii_digit()) {
            let value: f64 = format!("0.{}", first).parse().ok()?;
            return Some((value, 1));
        }
    }

    let digits: String = words.iter().map_while(|w| fraction_digit(w)).collect();
    if digits.is_empty() {
        return None;
    }
    let value: f64 = format!("0.{}", digits).parse().ok()?;
    Some((value, digits.len()))
}

/// Parses a number starting at the first word of `words`
fn parse_from(words: &[String]) -> Option<f64> {
    let mut i = 0;
    let mut negative = false;
    if matches!(
        words.first().map(String::as_str),
        Some("minus") | Some("negative")
    ) {
        negative = true;
        i = 1;
    }

    let rest = words.get(i..)?;
    let first = rest.first()?;

    let (mut value, allow_fraction, consumed) = if let Some(m) = DIGITS_PATTERN.find(first) {
        let value: f64 = m.as_str().parse().ok()?;
        (value, !m.as_str().contains('.'), 1)
    } else if first == "point" {
        (0.0, true, 0)
    } else {
        let (value, consumed) = parse_word_integer(rest)?;
        (f64::from(value), true, consumed)
    };
    i += consumed;

    if allow_fraction && words.get(i).map(String::as_str) == Some("point") {
        match parse_fraction(&words[i + 1..]) {
            Some((fraction, _)) => value += fraction,
            None if consumed == 0 => return None,
            None => {}
        }
    } else if consumed == 0 {
        return None;
    }

    Some(if negative { -value } else { value })
}

/// Extracts the first number spoken in `text`
///
/// A whole utterance of a single homophone ("to", "for", "won") is read as
/// the digit it sounds like.
pub fn parse_number(text: &str) -> Option<f64> {
    let words = tokenize(text);
    if let [only] = words.as_slice() {
        if let Some(value) = homophone(only) {
            return Some(value);
        }
    }

    (0..words.len()).find_map(|start| parse_from(&words[start..]))
}

/// Extracts the first non-negative whole number spoken in `text`
pub fn parse_whole_number(text: &str) -> Option<u32> {
    let value = parse_number(text)?;
    if value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

/// Whether `text` ends mid-number ("twenty", "five point", "minus")
///
/// Interim transcripts ending like this are likely to change once the
/// speaker finishes.
pub fn ends_with_incomplete_number(text: &str) -> bool {
    let words = tokenize(text);
    match words.last().map(String::as_str) {
        Some("point" | "minus" | "negative" | "hundred" | "and" | "a") => true,
        Some(word) => matches!(word_kind(word), Some(WordKind::Ten(_))),
        None => false,
    }
}
