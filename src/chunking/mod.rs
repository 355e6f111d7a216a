
use std::time::{Duration, Instant};

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{KbError, Result};

/// Separator priority list for the recursive strategy.
const RECURSIVE_SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", ", ", " ", ""];

/// Separator priority list for the markdown strategy. Header markers come
/// first so header boundaries are the preferred split points.
const MARKDOWN_SEPARATORS: [&str; 9] = [
    "\n## ", "\n### ", "\n#### ", "\n\n", "\n", ". ", ", ", " ", "",
];

/// Default minimum average chunk size used by the hybrid strategy when
/// deciding whether the semantic pass produced fragments too small to keep.
const HYBRID_MIN_AVERAGE: usize = 100;

/// Strategy used to segment document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Fixed,
    Sentence,
    Paragraph,
    Semantic,
    Recursive,
    Markdown,
    Hybrid,
}

impl std::fmt::Display for ChunkStrategy {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ChunkStrategy::Fixed => write!(f, "fixed"),
            ChunkStrategy::Sentence => write!(f, "sentence"),
            ChunkStrategy::Paragraph => write!(f, "paragraph"),
            ChunkStrategy::Semantic => write!(f, "semantic"),
            ChunkStrategy::Recursive => write!(f, "recursive"),
            ChunkStrategy::Markdown => write!(f, "markdown"),
            ChunkStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Content category inferred from a chunk's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Heading,
    Paragraph,
    List,
    Table,
    Code,
    Quote,
    Unknown,
}

impl std::fmt::Display for ContentType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ContentType::Heading => write!(f, "heading"),
            ContentType::Paragraph => write!(f, "paragraph"),
            ContentType::List => write!(f, "list"),
            ContentType::Table => write!(f, "table"),
            ContentType::Code => write!(f, "code"),
            ContentType::Quote => write!(f, "quote"),
            ContentType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Configuration for text chunking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Strategy used to segment the text
    pub strategy: ChunkStrategy,
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters; must be < `chunk_size`
    pub chunk_overlap: usize,
    /// Chunks smaller than this may be filtered or trigger strategy fallback
    pub min_chunk_size: Option<usize>,
    /// Hard upper bound on chunk size in characters
    pub max_chunk_size: Option<usize>,
    /// Override separator list for the recursive strategy
    pub separators: Option<Vec<String>>,
    /// Trim leading/trailing whitespace from each chunk
    pub trim_whitespace: bool,
    /// Drop chunks that are empty or whitespace-only
    pub remove_empty: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Recursive,
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: None,
            max_chunk_size: None,
            separators: None,
            trim_whitespace: false,
            remove_empty: true,
        }
    }
}

/// Positional and provenance metadata carried by every chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub document_name: String,
    /// Character offset of the chunk in the source, when found verbatim
    pub start_index: Option<usize>,
    /// Character offset one past the end of the chunk in the source
    pub end_index: Option<usize>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content_type: ContentType,
}

/// A bounded slice of document text, the unit embedded and indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub content: String,
    /// Estimated token count (roughly chars / 4)
    pub token_estimate: usize,
    pub char_count: usize,
    pub metadata: ChunkMetadata,
}

/// Result of chunking one document
#[derive(Debug, Clone)]
pub struct ChunkingReport {
    pub chunks: Vec<TextChunk>,
    pub original_length: usize,
    pub chunked_length: usize,
    pub processing_time: Duration,
    pub strategy: ChunkStrategy,
    /// The effective configuration the chunks were produced with
    pub config: ChunkingConfig,
}

/// Estimate token count from character length (roughly 4 chars per token)
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Split document text into chunks according to the configured strategy.
///
/// Pure function of the input text and config aside from wall-clock timing.
/// Empty input yields zero chunks; content shorter than `chunk_size` yields
/// exactly one chunk.
#[inline]
pub fn chunk_text(
    content: &str,
    document_id: &str,
    document_name: &str,
    config: &ChunkingConfig,
) -> Result<ChunkingReport> {
    validate_config(config)?;

    let started = Instant::now();
    let original_length = content.chars().count();

    let pieces = if content.is_empty() {
        Vec::new()
    } else {
        match config.strategy {
            ChunkStrategy::Fixed => chunk_fixed(content, config),
            ChunkStrategy::Sentence => chunk_sentences(content, config)?,
            ChunkStrategy::Paragraph => chunk_paragraphs(content, config)?,
            ChunkStrategy::Recursive => chunk_recursive(content, config, &recursive_separators(config)),
            ChunkStrategy::Markdown => chunk_recursive(content, config, &markdown_separators()),
            ChunkStrategy::Semantic => chunk_semantic(content, config)?,
            ChunkStrategy::Hybrid => chunk_hybrid(content, config)?,
        }
    };

    let chunks = finalize_chunks(pieces, content, document_id, document_name, config);
    let chunked_length = chunks.iter().map(|c| c.char_count).sum();

    debug!(
        "Chunked document '{}' ({} chars) into {} chunks using {} strategy",
        document_name,
        original_length,
        chunks.len(),
        config.strategy
    );

    Ok(ChunkingReport {
        chunks,
        original_length,
        chunked_length,
        processing_time: started.elapsed(),
        strategy: config.strategy,
        config: config.clone(),
    })
}

fn validate_config(config: &ChunkingConfig) -> Result<()> {
    if config.chunk_size == 0 {
        return Err(KbError::Config("chunk_size must be greater than zero".to_string()));
    }
    if config.chunk_overlap >= config.chunk_size {
        return Err(KbError::Config(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            config.chunk_overlap, config.chunk_size
        )));
    }
    Ok(())
}

fn recursive_separators(config: &ChunkingConfig) -> Vec<String> {
    config.separators.clone().unwrap_or_else(|| {
        RECURSIVE_SEPARATORS.iter().map(|s| (*s).to_string()).collect()
    })
}

fn markdown_separators() -> Vec<String> {
    MARKDOWN_SEPARATORS.iter().map(|s| (*s).to_string()).collect()
}

/// Number of characters in a string
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Slice a string by character offsets
fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Trailing `n` characters of a string
fn tail_chars(s: &str, n: usize) -> String {
    let len = char_len(s);
    char_slice(s, len.saturating_sub(n), len)
}

/// Fixed-size sliding window advancing by `chunk_size - chunk_overlap`.
/// The last partial window is included as-is.
fn chunk_fixed(content: &str, config: &ChunkingConfig) -> Vec<String> {
    let len = char_len(content);
    let step = config.chunk_size - config.chunk_overlap;
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < len {
        let end = (start + config.chunk_size).min(len);
        pieces.push(char_slice(content, start, end));
        if end == len {
            break;
        }
        start += step;
    }

    pieces
}

/// Split text on sentence-terminal punctuation followed by whitespace and a
/// capital letter. The terminal punctuation stays with the preceding sentence.
fn split_sentences(text: &str) -> Result<Vec<String>> {
    let boundary = Regex::new(r"(?<=[.!?])\s+(?=[A-Z])")
        .map_err(|e| KbError::Parse(format!("Invalid sentence boundary pattern: {}", e)))?;

    let mut sentences = Vec::new();
    let mut last = 0;
    for found in boundary.find_iter(text) {
        let m = found.map_err(|e| KbError::Parse(format!("Sentence boundary scan failed: {}", e)))?;
        if m.start() > last {
            sentences.push(text[last..m.start()].to_string());
        }
        last = m.end();
    }
    if last < text.len() {
        sentences.push(text[last..].to_string());
    }

    Ok(sentences)
}

/// Greedily pack sentences into chunks of at most `chunk_size` characters.
/// When a chunk is sealed, the next chunk is seeded with a trailing fraction
/// of its sentences proportional to `chunk_overlap / chunk_size`. The final
/// chunk is always emitted even when shorter than `min_chunk_size`.
fn chunk_sentences(content: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    let sentences = split_sentences(content)?;
    if sentences.is_empty() {
        return Ok(Vec::new());
    }

    let mut pieces = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0;

    for sentence in sentences {
        let sentence_len = char_len(&sentence) + usize::from(!current.is_empty());

        if !current.is_empty() && current_len + sentence_len > config.chunk_size {
            let sealed = current.join(" ");
            // Seed the overlap buffer with trailing sentences proportional to
            // the configured overlap ratio.
            let keep = current.len() * config.chunk_overlap / config.chunk_size;
            let carried: Vec<String> = current[current.len() - keep..].to_vec();
            pieces.push(sealed);
            current = carried;
            current_len = current.iter().map(|s| char_len(s)).sum::<usize>()
                + current.len().saturating_sub(1);
        }

        current_len += char_len(&sentence) + usize::from(!current.is_empty());
        current.push(sentence);
    }

    if !current.is_empty() {
        pieces.push(current.join(" "));
    }

    Ok(pieces)
}

/// Split on blank-line boundaries, packing paragraphs up to `chunk_size`.
/// Oversized paragraphs fall back to sentence chunking. Overlap is a trailing
/// character slice of the previous chunk prepended to the next.
fn chunk_paragraphs(content: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for paragraph in content.split("\n\n") {
        if paragraph.trim().is_empty() {
            continue;
        }

        let paragraph_len = char_len(paragraph);

        if paragraph_len > config.chunk_size {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(chunk_sentences(paragraph, config)?);
            continue;
        }

        if !current.is_empty() && char_len(&current) + 2 + paragraph_len > config.chunk_size {
            pieces.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    Ok(apply_overlap_prefix(pieces, config.chunk_overlap))
}

/// Prepend a trailing character slice of each chunk onto its successor.
fn apply_overlap_prefix(pieces: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || pieces.len() < 2 {
        return pieces;
    }

    let mut out = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 {
            out.push(piece.clone());
        } else {
            let prefix = tail_chars(&pieces[i - 1], overlap);
            out.push(format!("{}{}", prefix, piece));
        }
    }
    out
}

/// Where a separator attaches when splitting while keeping it.
enum Attach {
    /// Separator ends the preceding part (paragraph and sentence breaks)
    Left,
    /// Separator begins the following part (markdown header markers)
    Right,
}

fn separator_attachment(sep: &str) -> Attach {
    if sep.starts_with('\n') && sep.trim_start().starts_with('#') {
        Attach::Right
    } else {
        Attach::Left
    }
}

/// Split `text` on `sep`, keeping the separator attached to one side.
fn split_keep_separator(text: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        return vec![text.to_string()];
    }

    let attach = separator_attachment(sep);
    let mut parts = Vec::new();
    let mut last = 0;

    for (pos, _) in text.match_indices(sep) {
        match attach {
            Attach::Left => {
                let end = pos + sep.len();
                parts.push(text[last..end].to_string());
                last = end;
            }
            Attach::Right => {
                if pos > last {
                    parts.push(text[last..pos].to_string());
                }
                last = pos;
            }
        }
    }
    if last < text.len() {
        parts.push(text[last..].to_string());
    }

    parts.retain(|p| !p.is_empty());
    parts
}

/// Recursive separator-priority splitting with an explicit worklist.
///
/// For the first separator that actually splits the text, parts are greedily
/// packed up to `chunk_size`; a part still too large recurses into the
/// remaining, finer separator list. The absolute fallback is fixed-size
/// character slicing. Overlap and min-size filtering are applied only when
/// more than one chunk results, so single short inputs pass through intact.
fn chunk_recursive(content: &str, config: &ChunkingConfig, separators: &[String]) -> Vec<String> {
    let pieces = recursive_split(content, config, separators);

    if pieces.len() < 2 {
        return pieces;
    }

    let mut pieces = apply_overlap_prefix(pieces, config.chunk_overlap);
    if let Some(min) = config.min_chunk_size {
        pieces.retain(|p| char_len(p) >= min);
    }
    pieces
}

fn recursive_split(content: &str, config: &ChunkingConfig, separators: &[String]) -> Vec<String> {
    // Worklist of (text, separator-list offset); bounded because each level
    // either shrinks the text or consumes a separator.
    let mut pieces = Vec::new();
    let mut work = vec![(content.to_string(), 0)];

    while let Some((text, sep_idx)) = work.pop() {
        if char_len(&text) <= config.chunk_size {
            pieces.push((text, usize::MAX));
            continue;
        }

        let mut split_found = false;
        for (offset, sep) in separators.iter().enumerate().skip(sep_idx) {
            if sep.is_empty() {
                break;
            }
            let parts = split_keep_separator(&text, sep);
            if parts.len() < 2 {
                continue;
            }

            // Greedily pack parts up to chunk_size; oversized parts recurse
            // into the finer separators.
            let mut packed: Vec<(String, usize)> = Vec::new();
            let mut current = String::new();
            for part in parts {
                if char_len(&part) > config.chunk_size {
                    if !current.is_empty() {
                        packed.push((std::mem::take(&mut current), usize::MAX));
                    }
                    packed.push((part, offset + 1));
                    continue;
                }
                if !current.is_empty()
                    && char_len(&current) + char_len(&part) > config.chunk_size
                {
                    packed.push((std::mem::take(&mut current), usize::MAX));
                }
                current.push_str(&part);
            }
            if !current.is_empty() {
                packed.push((current, usize::MAX));
            }

            // Preserve document order under the LIFO worklist.
            for item in packed.into_iter().rev() {
                if item.1 == usize::MAX {
                    work.push((item.0, separators.len()));
                } else {
                    work.push(item);
                }
            }
            split_found = true;
            break;
        }

        if !split_found {
            if sep_idx >= separators.len() || char_len(&text) <= config.chunk_size {
                pieces.push((text, usize::MAX));
            } else {
                // No separator splits this text: fixed-size character slicing.
                let mut start = 0;
                let len = char_len(&text);
                let mut slices = Vec::new();
                while start < len {
                    let end = (start + config.chunk_size).min(len);
                    slices.push(char_slice(&text, start, end));
                    start = end;
                }
                for slice in slices.into_iter().rev() {
                    work.push((slice, separators.len()));
                }
            }
        }
    }

    pieces.into_iter().map(|(text, _)| text).collect()
}

/// A markdown section: optional header line plus the body below it.
struct MarkdownSection {
    header: Option<String>,
    body: String,
}

fn split_markdown_sections(content: &str) -> Vec<MarkdownSection> {
    let mut sections = Vec::new();
    let mut header: Option<String> = None;
    let mut body = String::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        let is_header = (1..=6).contains(&hashes)
            && trimmed.chars().nth(hashes).is_some_and(|c| c == ' ');

        if is_header {
            if header.is_some() || !body.trim().is_empty() {
                sections.push(MarkdownSection {
                    header: header.take(),
                    body: std::mem::take(&mut body),
                });
            }
            header = Some(line.to_string());
            body.clear();
        } else {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        }
    }

    if header.is_some() || !body.trim().is_empty() {
        sections.push(MarkdownSection { header, body });
    }

    sections
}

/// Header-aware chunking: sections that fit become one chunk with the header
/// prefixed; oversized sections fall back to paragraph chunking with the
/// header re-prefixed only onto the section's first chunk. Overlap is applied
/// as a post-pass trailing-character prefix on every chunk but the first.
fn chunk_semantic(content: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    let sections = split_markdown_sections(content);
    let mut pieces = Vec::new();

    for section in sections {
        let joined = match &section.header {
            Some(header) if section.body.trim().is_empty() => header.clone(),
            Some(header) => format!("{}\n{}", header, section.body),
            None => section.body.clone(),
        };

        if char_len(&joined) <= config.chunk_size {
            pieces.push(joined);
            continue;
        }

        // Oversized section: paragraph-chunk the body without its own overlap
        // pass, since overlap is applied once over the whole result below.
        let body_config = ChunkingConfig {
            chunk_overlap: 0,
            ..config.clone()
        };
        let body_pieces = chunk_paragraphs(&section.body, &body_config)?;
        for (i, body_piece) in body_pieces.into_iter().enumerate() {
            if i == 0 {
                if let Some(header) = &section.header {
                    pieces.push(format!("{}\n{}", header, body_piece));
                    continue;
                }
            }
            pieces.push(body_piece);
        }
    }

    Ok(apply_overlap_prefix(pieces, config.chunk_overlap))
}

/// Semantic chunking with a quality gate: when the average chunk size falls
/// below the minimum, the semantic result is discarded in favor of recursive.
fn chunk_hybrid(content: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    let semantic = chunk_semantic(content, config)?;
    let min = config.min_chunk_size.unwrap_or(HYBRID_MIN_AVERAGE);

    if !semantic.is_empty() {
        let average = semantic.iter().map(|p| char_len(p)).sum::<usize>() / semantic.len();
        if average >= min {
            return Ok(semantic);
        }
        debug!(
            "Hybrid strategy: semantic average {} below minimum {}, falling back to recursive",
            average, min
        );
    }

    Ok(chunk_recursive(content, config, &recursive_separators(config)))
}

/// Pattern-based content type detection.
pub(crate) fn detect_content_type(content: &str) -> ContentType {
    let trimmed = content.trim();
    let Some(first_line) = trimmed.lines().next() else {
        return ContentType::Unknown;
    };
    let first = first_line.trim_start();

    if first.starts_with('#') {
        return ContentType::Heading;
    }
    if first.starts_with("- ")
        || first.starts_with("* ")
        || first
            .split_once('.')
            .is_some_and(|(n, rest)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && rest.starts_with(' '))
    {
        return ContentType::List;
    }
    if trimmed.contains("```")
        || (trimmed.lines().count() > 1 && trimmed.lines().all(|l| l.is_empty() || l.starts_with("    ")))
    {
        return ContentType::Code;
    }
    if first.starts_with('>') {
        return ContentType::Quote;
    }
    if first.starts_with('|') && first.matches('|').count() >= 2 {
        return ContentType::Table;
    }

    ContentType::Paragraph
}

/// Apply whitespace/empty policies, locate chunks in the source, and attach
/// metadata. `start_index`/`end_index` are set only when the chunk content is
/// found verbatim in the source (overlap-prefixed chunks may not be).
fn finalize_chunks(
    pieces: Vec<String>,
    source: &str,
    document_id: &str,
    document_name: &str,
    config: &ChunkingConfig,
) -> Vec<TextChunk> {
    let mut contents: Vec<String> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let content = if config.trim_whitespace {
            piece.trim().to_string()
        } else {
            piece
        };
        if config.remove_empty && content.trim().is_empty() {
            continue;
        }
        contents.push(content);
    }

    let total = contents.len();
    let mut cursor = 0;
    let mut chunks = Vec::with_capacity(total);

    for (chunk_index, content) in contents.into_iter().enumerate() {
        let (start_index, end_index) = match source[cursor..].find(&content) {
            Some(offset) => {
                let byte_start = cursor + offset;
                let char_start = source[..byte_start].chars().count();
                let length = char_len(&content);
                // Advance past the start only, so overlapping windows still match.
                cursor = byte_start + content.chars().next().map_or(0, char::len_utf8);
                (Some(char_start), Some(char_start + length))
            }
            None => (None, None),
        };

        let content_type = detect_content_type(&content);
        let char_count = char_len(&content);

        chunks.push(TextChunk {
            id: Uuid::new_v4().to_string(),
            token_estimate: estimate_token_count(&content),
            char_count,
            metadata: ChunkMetadata {
                document_id: document_id.to_string(),
                document_name: document_name.to_string(),
                start_index,
                end_index,
                chunk_index,
                total_chunks: total,
                content_type,
            },
            content,
        });
    }

    chunks
}
