use regex::{Captures, Regex};

pub const CENSORED: &str = "[Censored]";

pub const DEFAULT_BANNED_WORDS: &[&str] = &["badword1", "badword2", "inappropriate"];

// ASCII digits and word boundaries only; `\d` and `\b` would also take other scripts.
const SUSPICIOUS_PATTERNS: &[&str] = &[
    // phone numbers
    r"(?-u:\b)[0-9]{3}-[0-9]{4}-[0-9]{4}(?-u:\b)",
    // e-mail addresses
    r"(?-u:\b)[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}(?-u:\b)",
    // links
    r"(?i)(?-u:\b)https?://\S+",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filtered {
    pub text: String,
    pub flagged: bool,
}

/// Masks banned words and scrubs contact details out of chat text.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    banned: Option<Regex>,
    patterns: Vec<Regex>,
}

impl MessageFilter {
    pub fn new<S: AsRef<str>>(banned_words: &[S]) -> Result<Self, regex::Error> {
        let mut words: Vec<&str> = banned_words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| !w.is_empty())
            .collect();
        // longest first so overlapping words mask as much as possible
        words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));

        let banned = if words.is_empty() {
            None
        } else {
            let alternation = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
            Some(Regex::new(&format!("(?i)(?:{alternation})"))?)
        };

        let patterns = SUSPICIOUS_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { banned, patterns })
    }

    pub fn filter(&self, text: &str) -> Filtered {
        let mut flagged = false;
        let mut out = text.to_owned();

        if let Some(banned) = &self.banned {
            if banned.is_match(&out) {
                out = banned
                    .replace_all(&out, |caps: &Captures| "*".repeat(caps[0].chars().count()))
                    .into_owned();
                flagged = true;
            }
        }

        for pattern in &self.patterns {
            if pattern.is_match(&out) {
                out = pattern.replace_all(&out, CENSORED).into_owned();
                flagged = true;
            }
        }

        Filtered { text: out, flagged }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_filter() -> MessageFilter {
        MessageFilter::new(DEFAULT_BANNED_WORDS).unwrap()
    }

    #[test]
    fn clean_text_passes() {
        let f = default_filter();
        assert_eq!(f.filter("hello"), Filtered { text: "hello".into(), flagged: false });
        assert_eq!(f.filter(""), Filtered { text: String::new(), flagged: false });
    }

    #[test]
    fn banned_words_are_masked_case_insensitively() {
        let f = default_filter();
        let out = f.filter("That is INAPPROPRIATE and badWord1!");
        assert_eq!(out.text, "That is ************* and ********!");
        assert!(out.flagged);
    }

    #[test]
    fn mask_counts_characters_not_bytes() {
        let f = MessageFilter::new(&["욕설"]).unwrap();
        assert_eq!(f.filter("이건 욕설 이다").text, "이건 ** 이다");
    }

    #[test]
    fn metacharacters_are_literal() {
        let f = MessageFilter::new(&["a+b(", ".*"]).unwrap();
        assert_eq!(f.filter("xa+b(y").text, "x****y");
        assert_eq!(f.filter("nothing here").text, "nothing here");
        assert_eq!(f.filter("dot.*star").text, "dot**star");
    }

    #[test]
    fn contact_details_are_censored() {
        let f = MessageFilter::new::<&str>(&[]).unwrap();

        let out = f.filter("call 010-1234-5678 now");
        assert_eq!(out.text, "call [Censored] now");
        assert!(out.flagged);

        let out = f.filter("mail me at someone@example.com or other@example.org");
        assert_eq!(out.text, "mail me at [Censored] or [Censored]");

        let out = f.filter("see HTTPS://example.com/x?y=1 ok");
        assert_eq!(out.text, "see [Censored] ok");
    }

    #[test]
    fn only_ascii_digits_count_as_phone_numbers() {
        let f = MessageFilter::new::<&str>(&[]).unwrap();

        let arabic_indic = "٠١٠-١٢٣٤-٥٦٧٨";
        assert_eq!(f.filter(arabic_indic), Filtered { text: arabic_indic.into(), flagged: false });

        // hangul right before the number is not a word character here
        assert_eq!(f.filter("전화010-1234-5678").text, "전화[Censored]");
        assert!(!f.filter("x010-1234-5678").flagged);
    }

    #[test]
    fn blank_banned_words_are_ignored() {
        let f = MessageFilter::new(&["", "  "]).unwrap();
        assert!(!f.filter("anything").flagged);
    }
}
