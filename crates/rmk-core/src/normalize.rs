//! Name normalisation and fuzzy comparison.
//!
//! Deduplication and homograph defence both rely on reducing entity names
//! to a canonical form before comparison: invisible and direction-control
//! characters are stripped, compatibility forms are folded (NFKC maps
//! fullwidth, ligature, and lookalike compatibility characters onto their
//! canonical equivalents), case is folded, and internal whitespace is
//! collapsed.

use unicode_normalization::UnicodeNormalization;

/// Characters that render invisibly or reorder text. Stripped before
/// comparison so `"Ｓarah"` and `"Sa\u{200B}rah"` collapse onto `"sarah"`.
fn is_invisible_or_bidi(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' // zero-width space/joiners, LRM/RLM
        | '\u{202A}'..='\u{202E}' // directional embedding/override
        | '\u{2060}'..='\u{2064}' // word joiner, invisible operators
        | '\u{2066}'..='\u{2069}' // directional isolates
        | '\u{FEFF}' // BOM / zero-width no-break space
    )
}

/// Normalise an entity name for deduplication.
///
/// Strip control, zero-width, and BIDI characters; NFKC fold; lowercase;
/// collapse internal whitespace runs to single spaces; trim.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !c.is_control() && !is_invisible_or_bidi(*c))
        .collect();

    let folded: String = stripped.nfkc().collect::<String>().to_lowercase();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Edit-distance ceiling for a fuzzy match against a normalised name of the
/// given length: 2 for short names, 3 once the name exceeds 10 characters.
#[must_use]
pub fn fuzzy_distance_ceiling(name_len: usize) -> usize {
    if name_len > 10 {
        3
    } else {
        2
    }
}

/// Compute Levenshtein distance between two strings.
///
/// Dynamic programming over characters, O(n·m) time and space.
#[must_use]
pub fn levenshtein(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    let len1 = s1_chars.len();
    let len2 = s2_chars.len();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut dp = vec![vec![0usize; len2 + 1]; len1 + 1];

    #[allow(clippy::needless_range_loop)] // dp[i][0] = i requires index access
    for i in 0..=len1 {
        dp[i][0] = i;
    }
    #[allow(clippy::needless_range_loop)]
    for j in 0..=len2 {
        dp[0][j] = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = usize::from(s1_chars[i - 1] != s2_chars[j - 1]);

            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }

    dp[len1][len2]
}
