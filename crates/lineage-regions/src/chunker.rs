//! Splits full document text into region-sized chunks.

use lineage_core::{Granularity, TrackerConfig};

/// A contiguous run of lines that becomes one region.
///
/// # Examples
///
/// ```
/// use lineage_core::TrackerConfig;
/// use lineage_regions::chunker::split_chunks;
///
/// let chunks = split_chunks("# Intro\nfirst\nsecond\n\nthird", &TrackerConfig::default());
/// assert_eq!(chunks.len(), 3);
/// assert_eq!(chunks[0].text(), "# Intro");
/// assert_eq!(chunks[1].text(), "first\nsecond");
/// assert_eq!((chunks[1].start, chunks[1].end), (1, 3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Lines of the chunk, without trailing newlines.
    pub lines: Vec<String>,
    /// Index of the first line in the source text.
    pub start: usize,
    /// One past the index of the last line.
    pub end: usize,
}

impl Chunk {
    /// A single-line chunk standing in for content that could not be read.
    pub fn placeholder(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            start: 0,
            end: 1,
        }
    }

    /// Lines joined by `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Cut `text` into chunks according to the tracker's granularity.
///
/// In paragraph mode blank lines end a chunk and every heading line (one
/// starting with the configured marker) forms a chunk of its own. In line
/// mode every non-blank line is a chunk. Blank lines never belong to a chunk.
pub fn split_chunks(text: &str, config: &TrackerConfig) -> Vec<Chunk> {
    match config.granularity {
        Granularity::Paragraph => split_paragraphs(text, &config.heading_marker),
        Granularity::Line => split_lines(text),
    }
}

fn split_paragraphs(text: &str, heading_marker: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut start = 0;

    for (i, line) in text.lines().enumerate() {
        let is_blank = line.trim().is_empty();
        let is_heading = !is_blank && line.starts_with(heading_marker);

        if is_blank || is_heading {
            if !current.is_empty() {
                chunks.push(Chunk {
                    lines: std::mem::take(&mut current),
                    start,
                    end: i,
                });
            }
            if is_heading {
                chunks.push(Chunk {
                    lines: vec![line.to_string()],
                    start: i,
                    end: i + 1,
                });
            }
            continue;
        }

        if current.is_empty() {
            start = i;
        }
        current.push(line.to_string());
    }

    if !current.is_empty() {
        let end = start + current.len();
        chunks.push(Chunk {
            lines: current,
            start,
            end,
        });
    }

    chunks
}

fn split_lines(text: &str) -> Vec<Chunk> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| Chunk {
            lines: vec![line.to_string()],
            start: i,
            end: i + 1,
        })
        .collect()
}
