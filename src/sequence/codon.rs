use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use bio_seq::prelude::{Dna, Seq};
use bio_seq::translation::{TranslationTable, STANDARD};

use crate::error::{CodonMixError, Result};

/// One of the four nucleotides, which doubles as the fluorescence channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Base {
    A,
    C,
    G,
    T,
}

impl Base {
    pub const ALL: [Base; 4] = [Base::A, Base::C, Base::G, Base::T];

    /// Channel column in trace matrices (A, C, G, T order).
    pub fn channel(self) -> usize {
        self as usize
    }

    pub fn from_byte(b: u8) -> Option<Base> {
        match b.to_ascii_uppercase() {
            b'A' => Some(Base::A),
            b'C' => Some(Base::C),
            b'G' => Some(Base::G),
            b'T' | b'U' => Some(Base::T),
            _ => None,
        }
    }

    pub fn complement(self) -> Base {
        match self {
            Base::A => Base::T,
            Base::C => Base::G,
            Base::G => Base::C,
            Base::T => Base::A,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Base::A => 'A',
            Base::C => 'C',
            Base::G => 'G',
            Base::T => 'T',
        }
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A nucleotide triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Codon(pub [Base; 3]);

impl Codon {
    pub const COUNT: usize = 64;

    /// All 64 codons in lexicographic (A, C, G, T) order; `index()` matches position.
    pub fn all() -> impl Iterator<Item = Codon> {
        (0..Self::COUNT).map(Codon::from_index)
    }

    pub fn from_index(index: usize) -> Codon {
        let base = |shift: usize| Base::ALL[(index >> shift) & 0b11];
        Codon([base(4), base(2), base(0)])
    }

    pub fn index(&self) -> usize {
        (self.0[0].channel() << 4) | (self.0[1].channel() << 2) | self.0[2].channel()
    }

    pub fn bases(&self) -> [Base; 3] {
        self.0
    }

    /// Standard-code translation; stop codons translate to `*`.
    pub fn amino_acid(&self) -> char {
        amino_table()[self.index()]
    }

    /// Codons that differ from this one at exactly one position.
    pub fn neighbors(&self) -> impl Iterator<Item = Codon> + '_ {
        (0..3).flat_map(move |pos| {
            Base::ALL
                .into_iter()
                .filter(move |&b| b != self.0[pos])
                .map(move |b| {
                    let mut bases = self.0;
                    bases[pos] = b;
                    Codon(bases)
                })
        })
    }

    /// Number of positions at which two codons differ.
    pub fn distance(&self, other: &Codon) -> usize {
        self.0.iter().zip(other.0.iter()).filter(|(a, b)| a != b).count()
    }

    /// All codons translating to `amino_acid`.
    pub fn encoding(amino_acid: char) -> Vec<Codon> {
        let aa = amino_acid.to_ascii_uppercase();
        Self::all().filter(|c| c.amino_acid() == aa).collect()
    }
}

impl fmt::Display for Codon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for Codon {
    type Err = CodonMixError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 {
            return Err(CodonMixError::InvalidCodon(s.to_string()));
        }
        let mut bases = [Base::A; 3];
        for (slot, &b) in bases.iter_mut().zip(bytes) {
            *slot = Base::from_byte(b).ok_or_else(|| CodonMixError::InvalidCodon(s.to_string()))?;
        }
        Ok(Codon(bases))
    }
}

pub fn dna_codon_to_amino_acid(codon: &str) -> String {
    if let Ok(codon_seq) = codon.parse::<Seq<Dna>>() {
        if codon_seq.len() == 3 {
            STANDARD.to_amino(&codon_seq).to_string()
        } else {
            "?".to_string()
        }
    } else {
        "?".to_string()
    }
}

/// Translate a called triplet; ambiguous or non-ACGT calls give `X`.
pub fn translate_called_codon(triplet: &[u8]) -> char {
    if triplet.len() != 3 {
        return 'X';
    }
    let mut bases = [Base::A; 3];
    for (slot, &b) in bases.iter_mut().zip(triplet) {
        match Base::from_byte(b) {
            Some(base) => *slot = base,
            None => return 'X',
        }
    }
    Codon(bases).amino_acid()
}

fn amino_table() -> &'static [char; Codon::COUNT] {
    static TABLE: OnceLock<[char; Codon::COUNT]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = ['X'; Codon::COUNT];
        for codon in Codon::all() {
            table[codon.index()] = dna_codon_to_amino_acid(&codon.to_string())
                .chars()
                .next()
                .unwrap_or('X');
        }
        table
    })
}
