use std::collections::{HashMap, HashSet};

/// Running headers/footers only count when they repeat on this many pages.
const MIN_EDGE_REPEATS: usize = 3;
const MAX_EDGE_LINE_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationStats {
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub dehyphenation_merges: usize,
}

/// Drops the first/last non-empty line of each page when that line repeats
/// across pages (running headers, footers, disclaimers).
pub fn remove_repeated_edge_lines(pages: &mut [String], stats: &mut NormalizationStats) {
    let header_candidates = detect_repeated_edge_lines(pages, true);
    let footer_candidates = detect_repeated_edge_lines(pages, false);

    for page in pages.iter_mut() {
        let mut lines = page
            .lines()
            .map(|line| line.to_string())
            .collect::<Vec<String>>();

        if let Some(index) = first_nonempty_line_index(&lines) {
            let candidate = normalize_edge_line(&lines[index]);
            if !candidate.is_empty() && header_candidates.contains(&candidate) {
                lines.remove(index);
                stats.header_lines_removed += 1;
            }
        }

        if let Some(index) = last_nonempty_line_index(&lines) {
            let candidate = normalize_edge_line(&lines[index]);
            if !candidate.is_empty() && footer_candidates.contains(&candidate) {
                lines.remove(index);
                stats.footer_lines_removed += 1;
            }
        }

        *page = lines.join("\n");
    }
}

/// Joins `insur-` + `ance` style breaks between consecutive numbered lines.
/// The merged line keeps the number of its first half.
pub fn merge_hyphenated_lines(
    lines: Vec<(usize, String)>,
    stats: &mut NormalizationStats,
) -> Vec<(usize, String)> {
    let mut merged = Vec::<(usize, String)>::with_capacity(lines.len());
    let mut iter = lines.into_iter().peekable();

    while let Some((line_number, current)) = iter.next() {
        let joins_next = iter
            .peek()
            .map(|(_, next)| should_merge_hyphenated_pair(&current, next))
            .unwrap_or(false);

        if joins_next {
            if let Some((_, next)) = iter.next() {
                let joined = format!(
                    "{}{}",
                    current.trim_end().trim_end_matches('-'),
                    next.trim_start()
                );
                merged.push((line_number, joined));
                stats.dehyphenation_merges += 1;
                continue;
            }
        }

        merged.push((line_number, current));
    }

    merged
}

fn detect_repeated_edge_lines(pages: &[String], header: bool) -> HashSet<String> {
    let mut counts = HashMap::<String, usize>::new();
    for page in pages {
        let lines = page.lines().map(str::trim).collect::<Vec<&str>>();
        let candidate = if header {
            lines.iter().copied().find(|line| !line.is_empty())
        } else {
            lines.iter().rev().copied().find(|line| !line.is_empty())
        };

        let Some(candidate) = candidate else {
            continue;
        };

        let normalized = normalize_edge_line(candidate);
        if normalized.is_empty() || normalized.len() > MAX_EDGE_LINE_CHARS {
            continue;
        }
        *counts.entry(normalized).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(candidate, count)| (count >= MIN_EDGE_REPEATS).then_some(candidate))
        .collect()
}

fn normalize_edge_line(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn first_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().position(|line| !line.trim().is_empty())
}

fn last_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().rposition(|line| !line.trim().is_empty())
}

fn should_merge_hyphenated_pair(current: &str, next: &str) -> bool {
    let left = current.trim_end();
    if !left.ends_with('-') {
        return false;
    }

    let right = next.trim_start();
    let starts_with_lowercase = right
        .chars()
        .next()
        .map(|character| character.is_lowercase())
        .unwrap_or(false);
    if !starts_with_lowercase {
        return false;
    }

    left.trim_end_matches('-')
        .chars()
        .last()
        .map(|character| character.is_alphabetic())
        .unwrap_or(false)
}
