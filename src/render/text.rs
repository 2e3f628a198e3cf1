/// Hard-wrap `title` every `width` characters, ignoring word boundaries.
pub fn fold_title(title: &str, width: usize) -> String {
    if width == 0 {
        return title.trim().to_string();
    }
    let chars: Vec<char> = title.chars().collect();
    chars
        .chunks(width)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// One-line label for a snippet: line breaks become spaces, and anything past
/// `max_chars` characters is cut and replaced by `...`.
pub fn truncate_label(code: &str, max_chars: usize) -> String {
    let flat = code
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join(" ");
    if flat.chars().count() > max_chars {
        let mut label: String = flat.chars().take(max_chars).collect();
        label.push_str("...");
        label
    } else {
        flat
    }
}

/// Rough text extent in pixels for when no font metrics are available.
pub fn estimate_text_size(text: &str, font_px: f64) -> (f64, f64) {
    let widest = text
        .lines()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0);
    let lines = text.lines().count().max(1);
    (
        widest as f64 * font_px * 0.6,
        lines as f64 * font_px * 1.2,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_title_line_count() {
        for len in [1usize, 29, 30, 31, 60, 61, 95] {
            let title = "x".repeat(len);
            let folded = fold_title(&title, 30);
            assert_eq!(folded.lines().count(), len.div_ceil(30), "len={len}");
            assert!(folded.lines().all(|l| l.chars().count() <= 30));
        }
    }

    #[test]
    fn fold_title_ignores_word_boundaries() {
        let folded = fold_title("The sum of two even numbers is even", 30);
        assert_eq!(folded, "The sum of two even numbers is\n even");
    }

    #[test]
    fn fold_title_trims_outer_whitespace() {
        assert_eq!(fold_title("  short  ", 30), "short");
        assert_eq!(fold_title("", 30), "");
    }

    #[test]
    fn refolding_unfolded_title_is_stable() {
        for title in [
            "The sum of two even numbers is even",
            "For every prime p greater than two, p is odd and p squared minus one is divisible by eight",
            "ℤ is a commutative ring with ∀ a b, a + b = b + a",
            "short",
        ] {
            let folded = fold_title(title, 30);
            let content: String = folded.chars().filter(|&c| c != '\n').collect();
            assert_eq!(content.chars().count(), title.chars().count(), "{title}");
            assert_eq!(fold_title(&content, 30), folded, "{title}");
        }
    }

    #[test]
    fn fold_title_counts_characters_not_bytes() {
        let title = "ℤ".repeat(31);
        let folded = fold_title(&title, 30);
        assert_eq!(folded.lines().count(), 2);
    }

    #[test]
    fn long_labels_are_truncated() {
        let code = "theorem sum_even (a b : ℤ) (ha : Even a) (hb : Even b) : Even (a + b) := by sorry";
        let label = truncate_label(code, 50);
        assert!(label.ends_with("..."));
        assert_eq!(label.chars().count(), 53);
        assert!(code.starts_with(label.trim_end_matches("...")));
    }

    #[test]
    fn short_labels_are_kept() {
        assert_eq!(truncate_label("def x := 1", 50), "def x := 1");
        let exact = "a".repeat(50);
        assert_eq!(truncate_label(&exact, 50), exact);
    }

    #[test]
    fn newlines_collapse_to_spaces() {
        assert_eq!(
            truncate_label("theorem t :\n  True := by\r\n  trivial", 50),
            "theorem t :   True := by   trivial"
        );
    }

    #[test]
    fn estimate_grows_with_text() {
        let (w1, h1) = estimate_text_size("abc", 10.0);
        let (w2, h2) = estimate_text_size("abcdef\nxy", 10.0);
        assert!(w2 > w1);
        assert!(h2 > h1);
    }
}
