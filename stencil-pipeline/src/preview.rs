//! Paged views over large generated content.

use serde::Serialize;

/// Lines per page used by the preview command unless overridden.
pub const DEFAULT_LINES_PER_PAGE: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    /// 1-based line number of the first line on this page.
    pub first_line: usize,
    pub text: String,
}

/// Split `content` into pages of at most `lines_per_page` lines.
///
/// Empty content yields a single empty page.
pub fn page(content: &str, lines_per_page: usize) -> Vec<Page> {
    let per_page = lines_per_page.max(1);
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if lines.is_empty() {
        return vec![Page {
            number: 1,
            first_line: 1,
            text: String::new(),
        }];
    }
    lines
        .chunks(per_page)
        .enumerate()
        .map(|(i, chunk)| Page {
            number: i + 1,
            first_line: i * per_page + 1,
            text: chunk.concat(),
        })
        .collect()
}

/// Page `number` (1-based) of `content`, if it exists.
pub fn page_of(content: &str, lines_per_page: usize, number: usize) -> Option<Page> {
    if number == 0 {
        return None;
    }
    page(content, lines_per_page).into_iter().nth(number - 1)
}
