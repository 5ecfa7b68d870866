//! Fragmented-text matching
//!
//! Finds runs of neighbouring text units that together spell the search
//! phrase, e.g. `<h1>hello <b>world</b></h1>` for "hello world". The scan
//! works over the flattened unit list with a bounded look-ahead, so the cost
//! stays linear in the number of units.

/// A sequence of units that jointly matches the phrase
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FragmentMatch {
    /// Indices into the unit list, ascending
    pub units: Vec<usize>,
    /// Phrase words covered by the sequence
    pub matched_words: usize,
}

impl FragmentMatch {
    pub fn coverage(&self, phrase_len: usize) -> f64 {
        if phrase_len == 0 {
            return 0.0;
        }
        self.matched_words as f64 / phrase_len as f64
    }
}

/// Scan every start index for an acceptable sequence.
///
/// `unit_words` holds the lowercased words of each unit in document order.
/// Accepted sequences never overlap; scanning resumes after the last unit
/// of an accepted sequence.
pub(crate) fn find_sequences(
    unit_words: &[Vec<String>],
    phrase: &[String],
    lookahead: usize,
    min_coverage: f64,
) -> Vec<FragmentMatch> {
    let mut found = Vec::new();
    if phrase.len() < 2 {
        return found;
    }

    let mut start = 0;
    while start < unit_words.len() {
        match try_sequence(unit_words, start, phrase, lookahead) {
            Some(m) if m.units.len() >= 2 && m.coverage(phrase.len()) >= min_coverage => {
                start = m.units.last().map(|last| last + 1).unwrap_or(start + 1);
                found.push(m);
            }
            _ => start += 1,
        }
    }
    found
}

fn try_sequence(
    unit_words: &[Vec<String>],
    start: usize,
    phrase: &[String],
    lookahead: usize,
) -> Option<FragmentMatch> {
    let end = start.saturating_add(lookahead).min(unit_words.len());
    let mut units = Vec::new();
    let mut next_word = 0;
    let mut i = start;

    while i < end && next_word < phrase.len() {
        let consumed = consume_words(&unit_words[i], &phrase[next_word..], units.is_empty());
        if consumed > 0 {
            units.push(i);
            next_word += consumed;
            i += 1;
            continue;
        }
        if units.is_empty() {
            return None;
        }
        // Skip a non-matching unit only when the one after it continues the phrase.
        let next_extends =
            i + 1 < end && consume_words(&unit_words[i + 1], &phrase[next_word..], false) > 0;
        if !next_extends {
            break;
        }
        i += 1;
    }

    if units.is_empty() {
        return None;
    }
    Some(FragmentMatch {
        units,
        matched_words: next_word,
    })
}

/// How many leading phrase words this unit's words continue.
///
/// The first unit of a sequence may begin with unrelated words.
fn consume_words(words: &[String], remaining: &[String], allow_leading_skip: bool) -> usize {
    let mut consumed = 0;
    for word in words {
        if consumed < remaining.len() && overlaps(word, &remaining[consumed]) {
            consumed += 1;
        } else if consumed == 0 && allow_leading_skip {
            continue;
        } else {
            break;
        }
    }
    consumed
}

fn overlaps(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}
