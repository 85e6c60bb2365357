// Output section composition shared by remote adapters and the capture shim

/// Join labelled sections as `"Label:\n" + text`, trimmed, blank ones omitted,
/// separated by a blank line. Order is preserved.
pub fn compose(sections: &[(&str, &str)]) -> String {
    sections
        .iter()
        .filter_map(|(label, text)| {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(format!("{}:\n{}", label, text))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_then_run_sections() {
        let text = compose(&[
            ("Compilation", "warning: unused variable\n"),
            ("Error", ""),
            ("Output", "hello\n"),
        ]);
        assert_eq!(text, "Compilation:\nwarning: unused variable\n\nOutput:\nhello");
    }

    #[test]
    fn test_all_blank_is_empty() {
        assert_eq!(compose(&[("Output", "  "), ("Error", "\n")]), "");
    }
}
