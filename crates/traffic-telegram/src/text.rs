//! Plain-text splitting for outgoing comments and direct messages.
//!
//! Telegram caps a single message at 4096 UTF-16 code units; `CHUNK_MAX`
//! leaves headroom for code points that encode to more than one unit.
//! MTProto user messages carry no Bot-API parse mode, so unlike the
//! Bot API path this never escapes markdown — it only splits on safe
//! boundaries.

const CHUNK_MAX: usize = 4000;

/// Split `text` into chunks no longer than `CHUNK_MAX` characters, preferring
/// to break on a blank line, then a single newline, then a space, so a
/// sentence is never split mid-word unless a single "word" itself overflows.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.chars().count() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= CHUNK_MAX {
            chunks.push(remaining.to_string());
            break;
        }

        let boundary = find_boundary(remaining, CHUNK_MAX);
        let (head, tail) = remaining.split_at(boundary);
        chunks.push(head.trim_end().to_string());
        remaining = tail.trim_start();
    }

    chunks
}

fn find_boundary(text: &str, max_chars: usize) -> usize {
    let max_byte = char_index_to_byte(text, max_chars);
    let window = &text[..max_byte];

    if let Some(pos) = window.rfind("\n\n") {
        return pos + 2;
    }
    if let Some(pos) = window.rfind('\n') {
        return pos + 1;
    }
    if let Some(pos) = window.rfind(' ') {
        return pos + 1;
    }
    max_byte
}

fn char_index_to_byte(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(byte_idx, _)| byte_idx)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_chunks("hello world");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn long_text_splits_on_paragraph_boundary() {
        let para_a = "a".repeat(3990);
        let para_b = "b".repeat(100);
        let text = format!("{para_a}\n\n{para_b}");

        let chunks = split_chunks(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], para_a);
        assert_eq!(chunks[1], para_b);
    }

    #[test]
    fn no_chunk_exceeds_the_limit() {
        let text = "word ".repeat(2000);
        let chunks = split_chunks(&text);
        assert!(chunks.iter().all(|c| c.chars().count() <= CHUNK_MAX));
    }

    #[test]
    fn reassembling_chunks_preserves_words() {
        let text = "word ".repeat(2000);
        let chunks = split_chunks(&text);
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined.split_whitespace().count(), text.split_whitespace().count());
    }
}
