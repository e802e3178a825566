//! Subject grammar and wildcard pattern matching.
//!
//! Subjects are dot-segmented strings (`orders.eu.created`). Subscription
//! patterns may additionally use two wildcard tokens: `*` matches exactly
//! one segment at its position, and a final `>` matches one or more
//! trailing segments.

/// Segment delimiter for subjects and patterns.
pub const DELIMITER: char = '.';

/// Wildcard token matching exactly one subject segment.
pub const SINGLE_WILDCARD: &str = "*";

/// Wildcard token matching one or more trailing subject segments.
/// Only meaningful as the final pattern segment.
pub const TAIL_WILDCARD: &str = ">";

/// Check whether a subscription pattern matches a concrete subject.
///
/// Segment counts must align exactly, except that a final `>` consumes any
/// non-empty tail. A `>` anywhere else has no wildcard meaning and is
/// compared literally; matching never fails, it just returns false.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut subject_segs = subject.split(DELIMITER);
    let mut pattern_segs = pattern.split(DELIMITER).peekable();

    while let Some(token) = pattern_segs.next() {
        if token == TAIL_WILDCARD && pattern_segs.peek().is_none() {
            // One-or-more remaining subject segments.
            return subject_segs.next().is_some();
        }
        match subject_segs.next() {
            Some(seg) if token == SINGLE_WILDCARD || token == seg => continue,
            _ => return false,
        }
    }

    subject_segs.next().is_none()
}

/// True when `s` is a well-formed concrete subject: at least one segment,
/// no empty segments, no wildcard tokens.
pub fn is_valid_subject(s: &str) -> bool {
    !s.is_empty()
        && s.split(DELIMITER)
            .all(|seg| !seg.is_empty() && seg != SINGLE_WILDCARD && seg != TAIL_WILDCARD)
}

/// True when `s` is a well-formed subscription pattern: non-empty segments,
/// with `>` allowed only in final position.
pub fn is_valid_pattern(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let mut segs = s.split(DELIMITER).peekable();
    while let Some(seg) = segs.next() {
        if seg.is_empty() {
            return false;
        }
        if seg == TAIL_WILDCARD && segs.peek().is_some() {
            return false;
        }
    }
    true
}
