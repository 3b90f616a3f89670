use super::{Annotation, SourceLocation};

/// Splits a doc-comment block into annotation tuples.
///
/// Comment decoration (`/**`, `*/`, leading `*`, `//`, `///`) is stripped. A line that
/// starts with `@` opens a new annotation; a non-blank line that does not continues
/// the previous annotation's arguments. Free text before the first annotation and after
/// a blank line is ignored.
pub fn tokenize(block: &str) -> Vec<Annotation> {
    let mut annotations: Vec<Annotation> = Vec::new();
    let mut continuing = false;

    for (index, raw) in block.lines().enumerate() {
        let (content, offset) = strip_decoration(raw);
        if content.is_empty() {
            continuing = false;
            continue;
        }

        if let Some(rest) = content.strip_prefix('@') {
            let (name, args) = match rest.find(char::is_whitespace) {
                Some(split) => (&rest[..split], rest[split..].trim()),
                None => (rest, ""),
            };
            if name.is_empty() {
                continuing = false;
                continue;
            }
            annotations.push(Annotation::new(
                name,
                args,
                SourceLocation::new(index + 1, offset + 1),
            ));
            continuing = true;
        } else if continuing {
            if let Some(last) = annotations.last_mut() {
                if !last.args.is_empty() {
                    last.args.push(' ');
                }
                last.args.push_str(content);
            }
        }
    }

    annotations
}

/// Returns the line content without comment decoration, plus the byte offset of that
/// content within the raw line.
fn strip_decoration(raw: &str) -> (&str, usize) {
    let mut start = raw.len() - raw.trim_start().len();
    let mut content = raw.trim_start();

    for prefix in ["/**", "/*", "///", "//", "*"] {
        if let Some(rest) = content.strip_prefix(prefix) {
            // `*/` on its own line closes the block.
            if prefix == "*" && rest.starts_with('/') {
                return ("", start);
            }
            start += prefix.len();
            content = rest;
            break;
        }
    }

    let content = content.trim_end();
    let content = content.strip_suffix("*/").unwrap_or(content);
    let trimmed = content.trim_start();
    start += content.len() - trimmed.len();
    (trimmed.trim_end(), start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comment_decoration() {
        let block = "/**\n * @flowWeaver nodeType\n * @input value {NUMBER}\n */";
        let annotations = tokenize(block);
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].name, "flowWeaver");
        assert_eq!(annotations[0].args, "nodeType");
        assert_eq!(annotations[1].args, "value {NUMBER}");
        assert_eq!(annotations[1].location, SourceLocation::new(3, 4));
    }

    #[test]
    fn continuation_lines_extend_previous_annotation() {
        let block = "/**\n * @description first part\n *   second part\n *\n * stray text\n */";
        let annotations = tokenize(block);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].args, "first part second part");
    }

    #[test]
    fn line_comments_are_accepted() {
        let annotations = tokenize("// @flowWeaver workflow\n/// @strictTypes");
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[1].name, "strictTypes");
        assert_eq!(annotations[1].args, "");
    }

    #[test]
    fn single_line_block() {
        let annotations = tokenize("/** @flowWeaver nodeType */");
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].args, "nodeType");
    }
}
