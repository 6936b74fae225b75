//! Fixed-column word wrap for session log entries.

/// Wrap `text` to at most `columns` characters per line, breaking on
/// whitespace. Words longer than a full line are hard-split. A column
/// count of 0 disables wrapping. Existing line breaks are preserved.
pub fn wrap_text(text: &str, columns: usize) -> Vec<String> {
    if columns == 0 {
        return text.lines().map(str::to_string).collect();
    }

    let mut wrapped = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            wrapped.push(String::new());
            continue;
        }
        wrap_line(line, columns, &mut wrapped);
    }
    if wrapped.is_empty() && !text.is_empty() {
        wrapped.push(String::new());
    }
    wrapped
}

fn wrap_line(line: &str, columns: usize, out: &mut Vec<String>) {
    let mut current = String::new();

    for word in line.split_whitespace() {
        let mut word = word;
        // Oversized words get hard-split at the column boundary.
        while word.chars().count() > columns {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let split_at = word
                .char_indices()
                .nth(columns)
                .map(|(idx, _)| idx)
                .unwrap_or(word.len());
            out.push(word[..split_at].to_string());
            word = &word[split_at..];
        }
        if word.is_empty() {
            continue;
        }

        let needed = word.chars().count() + if current.is_empty() { 0 } else { 1 };
        if current.chars().count() + needed > columns && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        out.push(current);
    }
}
