
/// Boundary classes tried in order of preference when closing a chunk
/// window. Paragraph breaks beat line breaks, line breaks beat sentence
/// punctuation, and so on down to a hard character cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Comma,
    Space,
}

const BOUNDARY_LADDER: [Boundary; 5] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Comma,
    Boundary::Space,
];

/// Split `text` into pieces of at most `chunk_size` characters, with
/// adjacent pieces sharing `chunk_overlap` characters of boundary text.
///
/// Lengths are measured in characters, not bytes. Each window is closed at
/// the latest boundary of the most-preferred class found past the overlap
/// region; separator-free text falls back to a hard cut at `chunk_size`.
/// Requires `chunk_overlap < chunk_size` (enforced by config validation).
#[inline]
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    debug_assert!(chunk_overlap < chunk_size);

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let window_end = (start + chunk_size).min(chars.len());

        let end = if window_end == chars.len() {
            window_end
        } else {
            find_boundary(&chars, start + chunk_overlap + 1, window_end).unwrap_or(window_end)
        };

        pieces.push(chars[start..end].iter().collect());

        if end >= chars.len() {
            break;
        }
        // The next window re-reads the tail of this one, so neighbors share
        // exactly `chunk_overlap` characters.
        start = end - chunk_overlap;
    }

    pieces
}

/// Latest cut position in `[lower, upper]` for the most-preferred boundary
/// class that occurs there. The cut falls just after the separator so the
/// separator stays attached to the preceding piece.
fn find_boundary(chars: &[char], lower: usize, upper: usize) -> Option<usize> {
    for class in BOUNDARY_LADDER {
        let mut best = None;
        for cut in lower..=upper {
            if boundary_at(chars, cut, class) {
                best = Some(cut);
            }
        }
        if best.is_some() {
            return best;
        }
    }
    None
}

fn boundary_at(chars: &[char], cut: usize, class: Boundary) -> bool {
    if cut == 0 || cut > chars.len() {
        return false;
    }
    let prev = chars[cut - 1];
    match class {
        Boundary::Paragraph => prev == '\n' && cut >= 2 && chars[cut - 2] == '\n',
        Boundary::Line => prev == '\n',
        Boundary::Sentence => matches!(prev, '.' | '!' | '?'),
        Boundary::Comma => prev == ',',
        Boundary::Space => prev == ' ',
    }
}

/// Character count used for all chunk-size decisions.
#[inline]
pub fn text_len(text: &str) -> usize {
    text.chars().count()
}
