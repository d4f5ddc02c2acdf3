use std::sync::LazyLock;

use regex::Regex;

use crate::protocol::tracks::Track;

static TITLE_NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"(?i)\s*\([^)]*(?:official|lyrics?|video|audio|mv|visuali[sz]er|hd|4k|remaster(?:ed)?|explicit)[^)]*\)"#,
        r#"(?i)\s*\[[^\]]*(?:official|lyrics?|video|audio|mv|visuali[sz]er|hd|4k|remaster(?:ed)?|explicit)[^\]]*\]"#,
        r#"(?i)\s*[(\[]\s*(?:ft\.?|feat\.?|featuring)\s+[^)\]]+[)\]]"#,
        r#"(?i)\s+(?:ft\.?|feat\.?|featuring)\s.*$"#,
    ])
});

static AUTHOR_NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"(?i)\s*-\s*Topic$"#,
        r#"(?i)VEVO$"#,
        r#"(?i)\s+official(?:\s+channel)?$"#,
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Keyword patterns matched against the raw title, and the genre query each
/// one implies.
static GENRES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"lo-?fi", "lofi hip hop"),
        (r"phonk", "phonk"),
        (r"nightcore", "nightcore"),
        (r"slowed|reverb", "slowed and reverb"),
        (r"remix", "remix"),
        (r"edm|house|techno|trance|dubstep", "edm"),
        (r"k-?pop", "kpop"),
        (r"anime|opening|ending|ost", "anime songs"),
        (r"metal|rock", "rock"),
        (r"jazz", "jazz"),
        (r"rap|hip ?hop|drill|trap", "hip hop"),
        (r"acoustic|cover", "acoustic covers"),
        (r"synthwave|retrowave", "synthwave"),
        (r"classical|piano|symphony", "classical piano"),
        (r"reggaeton|latin", "reggaeton"),
    ]
    .into_iter()
    .filter_map(|(pattern, genre)| {
        Regex::new(&format!(r"(?i)\b(?:{})\b", pattern))
            .ok()
            .map(|re| (re, genre))
    })
    .collect()
});

fn strip(text: &str, patterns: &[Regex]) -> String {
    let mut result = text.to_string();
    for re in patterns {
        result = re.replace_all(&result, "").into_owned();
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips decorations such as "(Official Video)" or "ft. X", and the
/// "Artist - " prefix of uploads titled "Artist - Title".
pub fn clean_title(raw: &str) -> String {
    let stripped = strip(raw, &TITLE_NOISE);
    match stripped.split_once(" - ") {
        Some((_, title)) if !title.trim().is_empty() => title.trim().to_string(),
        _ => stripped,
    }
}

pub fn clean_author(raw: &str) -> String {
    strip(raw.trim(), &AUTHOR_NOISE)
}

pub fn infer_genres(raw_title: &str) -> Vec<&'static str> {
    GENRES
        .iter()
        .filter(|(re, _)| re.is_match(raw_title))
        .map(|(_, genre)| *genre)
        .collect()
}

/// One way of looking for a track that fits after the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Artist(String),
    ArtistPopular(String),
    SimilarTo { title: String, author: String },
    Genre(&'static str),
    TitleMix(String),
}

impl Strategy {
    pub fn query(&self) -> String {
        match self {
            Self::Artist(author) => author.clone(),
            Self::ArtistPopular(author) => format!("{} popular songs", author),
            Self::SimilarTo { title, author } => format!("songs like {} {}", title, author)
                .trim()
                .to_string(),
            Self::Genre(genre) => format!("{} music", genre),
            Self::TitleMix(title) => format!("{} mix", title),
        }
    }
}

/// Candidate strategies derived from `last`, unshuffled.
pub fn strategies_for(last: &Track) -> Vec<Strategy> {
    let title = clean_title(&last.info.title);
    let author = clean_author(&last.info.author);
    let mut out = Vec::new();

    if !author.is_empty() {
        out.push(Strategy::Artist(author.clone()));
        out.push(Strategy::ArtistPopular(author.clone()));
    }
    if !title.is_empty() {
        out.push(Strategy::SimilarTo {
            title: title.clone(),
            author: author.clone(),
        });
        out.push(Strategy::TitleMix(title));
    }
    out.extend(infer_genres(&last.info.title).into_iter().map(Strategy::Genre));
    out
}
