use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Agreement features carried by a noun's two-letter ending.
#[derive(Clone, Copy, Debug)]
struct NounFeatures {
    animate: bool,
    singular: bool,
}

fn repeated(token: char, n: usize) -> String {
    std::iter::repeat(token).take(n).collect()
}

fn determiner<R: Rng>(rng: &mut R) -> String {
    repeated('D', rng.gen_range(0..4))
}

fn adjective<R: Rng>(rng: &mut R) -> String {
    repeated('P', rng.gen_range(0..3))
}

fn noun<R: Rng>(rng: &mut R) -> (String, NounFeatures) {
    let features = NounFeatures {
        animate: rng.gen_bool(0.5),
        singular: rng.gen_bool(0.5),
    };
    let mut noun = repeated('N', rng.gen_range(1..=9));
    noun.push(if features.animate { 'A' } else { 'B' });
    noun.push(if features.singular { 'S' } else { 'T' });
    (noun, features)
}

/// `S` ending for a third-person singular subject, `T` otherwise.
fn verb<R: Rng>(rng: &mut R, singular: bool) -> String {
    let mut verb = repeated('V', rng.gen_range(1..=5));
    verb.push(if singular { 'S' } else { 'T' });
    verb
}

fn relative_pronoun(animate: bool) -> &'static str {
    if animate {
        "RA"
    } else {
        "RB"
    }
}

/// One corpus line without its newline: `intro<SPACE><TAB>clauses outro<SPACE>`.
///
/// The intro is a noun phrase. Each of the 1 to 4 relative clauses agrees
/// with the noun right before it, and the closing verb phrase agrees with
/// the intro noun.
pub fn sentence<R: Rng>(rng: &mut R) -> String {
    let mut out = determiner(rng);
    out.push_str(&adjective(rng));
    let (intro, subject) = noun(rng);
    out.push_str(&intro);
    out.push_str(" \t");

    let mut last = subject;
    for _ in 0..rng.gen_range(1..=4) {
        out.push('C');
        out.push_str(relative_pronoun(last.animate));
        out.push_str(&verb(rng, last.singular));
        out.push_str(&adjective(rng));
        let (object, features) = noun(rng);
        out.push_str(&object);
        out.push_str(&adjective(rng));
        last = features;
    }

    out.push('Z');
    out.push_str(&verb(rng, subject.singular));
    out.push_str(&determiner(rng));
    out.push_str(&adjective(rng));
    out.push_str(&noun(rng).0);
    out.push(' ');
    out
}

/// Writes `num_sentences` random sentences to `path`, one per line.
pub fn write_corpus(path: impl AsRef<Path>, num_sentences: usize, seed: Option<u64>) -> Result<()> {
    let path = path.as_ref();
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut out = BufWriter::new(File::create(path)?);
    for _ in 0..num_sentences {
        writeln!(out, "{}", sentence(&mut rng))?;
    }
    out.flush()?;
    tracing::info!("Wrote {} sentences to '{}'", num_sentences, path.display());
    Ok(())
}
