//! Cheap keyword classifier for `post_topic`: "infers a
//! `post_topic` tag using a cheap keyword classifier over the post text".
//!
//! Intentionally not a model call — the text generator interface is the
//! only place language understanding lives in this engine.

const TOPICS: &[(&str, &[&str])] = &[
    ("detox", &["detox", "cleanse", "чистк", "очищен"]),
    ("nutrition", &["diet", "nutrition", "калори", "питани"]),
    ("fitness", &["workout", "training", "трениров", "фитнес"]),
    ("sleep", &["sleep", "insomnia", "сон", "бессонниц"]),
    ("parenting", &["baby", "toddler", "ребен", "малыш"]),
    ("finance", &["invest", "budget", "деньги", "доход"]),
    ("productivity", &["productiv", "habit", "привычк", "продуктивн"]),
    ("study", &["exam", "study", "экзамен", "учеба"]),
    ("motivation", &["motivat", "inspir", "мотиваци"]),
];

/// Classify `text` into one of a fixed topic set, case-insensitively
/// substring-matching against each topic's keyword list in table order.
/// Falls back to `"general"` when nothing matches.
pub fn classify(text: &str) -> String {
    let lower = text.to_lowercase();
    for (topic, keywords) in TOPICS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return topic.to_string();
        }
    }
    "general".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_first_topic_in_table_order() {
        assert_eq!(classify("Great workout and detox tips"), "detox");
    }

    #[test]
    fn falls_back_to_general() {
        assert_eq!(classify("a completely unrelated announcement"), "general");
    }

    #[test]
    fn matches_cyrillic_keyword() {
        assert_eq!(classify("Моя трениров на сегодня"), "fitness");
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(classify("SLEEP better tonight"), "sleep");
    }
}
