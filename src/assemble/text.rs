use anyhow::{Context, Result};
use regex::{Captures, Regex};

/// Rewrites the inline markup Shamela stores in page text.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    image: Regex,
    title_span: Regex,
    other_span: Regex,
    title_tag: Regex,
    any_tag: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            image: compile(r"<img[^>]*>")?,
            title_span: compile(
                r#"(?s)<span\s+data-type=['"]title['"]\s+id=['"]?toc-(\d+)['"]?\s*>(.*?)</span>"#,
            )?,
            other_span: compile(r"(?s)<span[^>]*>(.*?)</span>")?,
            title_tag: compile(r"(?s)<title[^>]*>(.*?)</title>")?,
            any_tag: compile(r"<[^>]+>")?,
        })
    }

    /// Heading spans become `<title id=N parent=P>` tags, with the parent id
    /// taken from `parent_of`. With `plain_text` every tag is removed instead.
    pub fn normalize(&self, text: &str, parent_of: impl Fn(u64) -> u64, plain_text: bool) -> String {
        if text.is_empty() {
            return String::new();
        }

        let text = text.replace('\r', "\n");
        let text = self.image.replace_all(&text, "");
        let text = self.title_span.replace_all(&text, |caps: &Captures| {
            let raw_id = &caps[1];
            let parent = raw_id.parse::<u64>().map(&parent_of).unwrap_or(0);
            format!("<title id={raw_id} parent={parent}>{}</title>", &caps[2])
        });
        let text = self.other_span.replace_all(&text, "$1");

        if !plain_text {
            return text.into_owned();
        }

        let text = self.title_tag.replace_all(&text, "$1");
        self.any_tag.replace_all(&text, "").into_owned()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid markup pattern: {pattern}"))
}
