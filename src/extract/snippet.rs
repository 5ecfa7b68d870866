//! Line-based context and snippet windows

/// Up to `count` lines before `start_line` and after `end_line` (1-based).
pub fn surrounding_lines(
    lines: &[&str],
    start_line: usize,
    end_line: usize,
    count: usize,
) -> (Vec<String>, Vec<String>) {
    let start_idx = start_line.saturating_sub(1).min(lines.len());
    let end_idx = end_line.min(lines.len());

    let before = lines[start_idx.saturating_sub(count)..start_idx]
        .iter()
        .map(|l| l.to_string())
        .collect();
    let after = lines[end_idx..(end_idx + count).min(lines.len())]
        .iter()
        .map(|l| l.to_string())
        .collect();
    (before, after)
}

/// Snippet used when no tree regeneration is available.
///
/// One line of margin on each side; for markup, widened by up to two more
/// lines until an opening `<` (above) and a closing `>` (below) is included.
pub fn line_window(content: &str, start_line: usize, end_line: usize, markup: bool) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let last = lines.len() - 1;
    let start_idx = start_line.saturating_sub(1).min(last);
    let end_idx = end_line.saturating_sub(1).clamp(start_idx, last);

    let mut from = start_idx.saturating_sub(1);
    let mut to = (end_idx + 1).min(last);

    if markup {
        let floor = start_idx.saturating_sub(3);
        while from > floor && !lines[from].contains('<') {
            from -= 1;
        }
        let ceiling = (end_idx + 3).min(last);
        while to < ceiling && !lines[to].contains('>') {
            to += 1;
        }
    }

    lines[from..=to].join("\n")
}
