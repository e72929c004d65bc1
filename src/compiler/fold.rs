//! Latin-1 to upper-case ASCII folding.

/// Byte substitution table applied to every census text field.
///
/// Printable ASCII is upper-cased, accented Latin-1 letters fold to their
/// base letter, newline is kept, and everything else becomes `?`.
pub static LATIN1_TO_ASCII_UPPER: [u8; 256] = build_table();

/// Inclusive byte ranges and their replacement. A zero replacement upper-cases
/// the ASCII letter in place.
const LETTER_FOLDS: [(usize, usize, u8); 19] = [
    (0xC0, 0xC5, b'A'),
    (0xC7, 0xC7, b'C'),
    (0xC8, 0xCB, b'E'),
    (0xCC, 0xCF, b'I'),
    (0xD1, 0xD1, b'N'),
    (0xD2, 0xD6, b'O'),
    (0xD9, 0xDC, b'U'),
    (0xDD, 0xDD, b'Y'),
    (0xE0, 0xE5, b'A'),
    (0xE7, 0xE7, b'C'),
    (0xE8, 0xEB, b'E'),
    (0xEC, 0xEF, b'I'),
    (0xF1, 0xF1, b'N'),
    (0xF2, 0xF6, b'O'),
    (0xF9, 0xFC, b'U'),
    (0xFD, 0xFD, b'Y'),
    (0xFF, 0xFF, b'Y'),
    (0x0A, 0x0A, b'\n'),
    (0x61, 0x7A, 0),
];

const fn build_table() -> [u8; 256] {
    let mut table = [b'?'; 256];

    let mut i = 0x20;
    while i <= 0x7E {
        table[i] = i as u8;
        i += 1;
    }

    let mut f = 0;
    while f < LETTER_FOLDS.len() {
        let (first, last, value) = LETTER_FOLDS[f];
        let mut b = first;
        while b <= last {
            table[b] = if value == 0 { (b - 0x20) as u8 } else { value };
            b += 1;
        }
        f += 1;
    }

    table
}

/// Fold raw census bytes into an upper-case ASCII string.
pub fn fold_to_ascii_upper(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| LATIN1_TO_ASCII_UPPER[b as usize] as char)
        .collect()
}
