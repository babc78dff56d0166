//! Race text sources.
//!
//! The multiplayer core never loads word banks itself; the host asks an
//! injected [`TextSource`] for a fresh text whenever the room needs one.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;

/// Yields a race text for a language tag and a word count.
pub trait TextSource: Send {
    fn race_text(&mut self, language: &str, word_count: usize) -> String;
}

/// Always returns the same text, whatever the language.
#[derive(Debug, Clone)]
pub struct FixedText {
    text: String,
}

impl FixedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl TextSource for FixedText {
    fn race_text(&mut self, _language: &str, _word_count: usize) -> String {
        self.text.clone()
    }
}

const ENGLISH: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "network", "keyboard",
    "window", "river", "mountain", "garden", "silver", "planet", "orange", "coffee", "bridge",
    "signal", "letter", "winter", "summer", "forest", "rocket", "pencil", "market", "castle",
    "little", "happy", "yellow", "number", "people", "answer", "simple", "travel", "friend",
];

const INDONESIAN: &[&str] = &[
    "saya", "kamu", "rumah", "makan", "minum", "jalan", "buku", "meja", "kursi", "pintu",
    "jendela", "sekolah", "belajar", "bermain", "kucing", "anjing", "burung", "pohon", "bunga",
    "langit", "bulan", "bintang", "matahari", "hujan", "sungai", "gunung", "pantai", "kota",
    "desa", "teman", "keluarga", "senang", "cepat", "lambat", "besar", "kecil",
];

const PROGRAMMER: &[&str] = &[
    "fn", "let", "mut", "match", "impl", "trait", "struct", "enum", "async", "await", "Vec<u8>",
    "Option<T>", "Result<T,E>", "&str", "String::new()", "println!", "unwrap_or", "iter()",
    "map(|x|", "collect()", "pub", "mod", "use", "self", "Box<dyn", "where", "loop", "break;",
    "return", "const", "static", "{}", "[]", "->", "=>", "::",
];

/// Random words from a small built-in word bank (`en`, `id`, `prog`).
#[derive(Debug)]
pub struct WordBank {
    rng: StdRng,
}

impl WordBank {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic word bank for reproducible texts.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn words_for(language: &str) -> &'static [&'static str] {
        match language {
            "id" => INDONESIAN,
            "prog" => PROGRAMMER,
            _ => ENGLISH,
        }
    }
}

impl Default for WordBank {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSource for WordBank {
    fn race_text(&mut self, language: &str, word_count: usize) -> String {
        let words = Self::words_for(language);
        let mut picked = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            if let Some(word) = words.choose(&mut self.rng) {
                picked.push(*word);
            }
        }
        picked.join(" ")
    }
}
