//! Greedy word wrap by character count.

/// Wrap `text` into lines of at most `max_chars` characters.
///
/// Words are separated by any whitespace and never split; a single word
/// longer than `max_chars` gets a line of its own. Empty or blank input
/// yields no lines.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len > max_chars {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        } else {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_line() {
        assert_eq!(wrap_text("a b c", 100), vec!["a b c"]);
    }

    #[test]
    fn empty_text_has_no_lines() {
        assert!(wrap_text("", 10).is_empty());
        assert!(wrap_text("   \n ", 10).is_empty());
    }

    #[test]
    fn breaks_at_word_boundaries() {
        let lines = wrap_text("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
    }

    #[test]
    fn exact_fit_stays_on_line() {
        assert_eq!(wrap_text("abcd efghi", 10), vec!["abcd efghi"]);
    }

    #[test]
    fn long_word_is_not_split() {
        let lines = wrap_text("a supercalifragilistic b", 8);
        assert_eq!(lines, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn words_survive_wrapping() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let lines = wrap_text(text, 12);
        let rejoined: Vec<&str> = lines.iter().flat_map(|l| l.split(' ')).collect();
        assert_eq!(rejoined, text.split(' ').collect::<Vec<_>>());
    }

    #[test]
    fn counts_characters_not_bytes() {
        let lines = wrap_text("café café", 9);
        assert_eq!(lines, vec!["café café"]);
    }
}
