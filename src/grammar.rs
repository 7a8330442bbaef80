use crate::data::extract_data;
use crate::error::Result;
use std::path::Path;

/// Rewrite rules for the toy relative-clause language, `(lhs, options)`.
/// Upper-case letters are word tokens, lower-case letters are phrases.
const RULES: &[(&str, &[&str])] = &[
    ("s", &["uxy"]),
    ("u", &["dpn", "dn", "pn", "n"]),
    ("x", &["qqqq", "qqq", "qq", "q"]),
    ("q", &["crvpnp", "crvpn", "crvnp", "crvn"]),
    ("y", &["zvdpn", "zvdn", "zvpn", "zvn"]),
    ("c", &["C"]),
    ("d", &["DDD", "DD", "D"]),
    ("p", &["PP", "P"]),
    (
        "n",
        &[
            "NNNNNNNNNg", "NNNNNNNNg", "NNNNNNNg", "NNNNNNg", "NNNNNg", "NNNNg", "NNNg", "NNg", "Ng",
        ],
    ),
    ("g", &["AS", "AT", "BS", "BT"]),
    (
        "v",
        &[
            "VVVVVS", "VVVVS", "VVVS", "VVS", "VS", "VVVVVT", "VVVVT", "VVVT", "VVT", "VT",
        ],
    ),
    ("z", &["Z"]),
    ("r", &["RA", "RB"]),
];

/// Dropped before the agreement endings are compared.
const WORD_TOKENS: [char; 8] = ['N', 'P', 'D', 'V', 'C', 'R', 'Z', ' '];

/// Word-order check. Rules are applied bottom-up, from the last rule to
/// the first, each option replacing every occurrence of itself with the
/// rule's left-hand side. Agreement is not looked at.
pub fn bnf_parse(sentence: &str) -> bool {
    let mut s = sentence.to_string();
    for (lhs, options) in RULES.iter().rev() {
        for option in options.iter() {
            if s.contains(option) {
                s = s.replace(option, lhs);
            }
        }
    }
    s == "s"
}

/// Agreement check over the `A`/`B` (animacy) and `S`/`T` (person)
/// endings.
///
/// Once the word tokens are dropped, every noun ending must be echoed by
/// the relative pronoun and verb of the clause that follows it, giving
/// groups like `ASAS`. The last noun and the one before it govern
/// nothing and are discarded. The final verb must share the person of
/// the sentence's first noun.
pub fn check_agreement(sentence: &str) -> bool {
    let features: Vec<char> = sentence.chars().filter(|c| !WORD_TOKENS.contains(c)).collect();
    if features.len() < 6 {
        return false;
    }
    let kept = features.len() - 2;
    let mut s: Vec<char> = features[..kept - 3].to_vec();
    s.push(features[kept - 1]);

    let groups_ok = s[..s.len() - 1].chunks_exact(4).all(|g| {
        matches!(
            g,
            ['A', 'S', 'A', 'S'] | ['A', 'T', 'A', 'T'] | ['B', 'S', 'B', 'S'] | ['B', 'T', 'B', 'T']
        )
    });
    groups_ok && s[1] == s[s.len() - 1]
}

/// Word-order and grammaticality rates over a file of generated sentences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GrammarScore {
    pub tested: usize,
    pub word_order_ok: usize,
    pub grammatical: usize,
}

impl GrammarScore {
    pub fn record(&mut self, sentence: &str) {
        self.tested += 1;
        if bnf_parse(sentence) {
            self.word_order_ok += 1;
            if check_agreement(sentence) {
                self.grammatical += 1;
            }
        }
    }

    /// Percentage of sentences with a valid word order, 0 when nothing was tested.
    pub fn word_order_pct(&self) -> f64 {
        percent(self.word_order_ok, self.tested)
    }

    /// Percentage of sentences with valid word order and agreement.
    pub fn grammatical_pct(&self) -> f64 {
        percent(self.grammatical, self.tested)
    }
}

fn percent(hits: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    hits as f64 / total as f64 * 100.0
}

/// Scores every line of `text`. Each line loses its last character, the
/// trailing space every sentence ends with.
pub fn score_text(text: &str) -> GrammarScore {
    let mut score = GrammarScore::default();
    for line in text.lines() {
        let mut sentence = line.chars();
        sentence.next_back();
        score.record(sentence.as_str());
    }
    score
}

pub fn score_file(filepath: impl AsRef<Path>) -> Result<GrammarScore> {
    let filepath = filepath.as_ref();
    let score = score_text(&extract_data(filepath)?);
    tracing::debug!(
        "{}: {} sentences, word order {:.2}%, grammatical {:.2}%",
        filepath.display(),
        score.tested,
        score.word_order_pct(),
        score.grammatical_pct()
    );
    Ok(score)
}
