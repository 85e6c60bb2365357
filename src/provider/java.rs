// Best-effort Java snippet transform applied by the Piston adapter.
// Pattern match on the class keyword only; nested or generic declarations are not parsed.

use crate::provider::PreparedSource;
use regex::Regex;
use std::sync::LazyLock;

static PUBLIC_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"public\s+class\s+(\w+)").expect("valid public class pattern"));

static ANY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bclass\s+(\w+)").expect("valid class pattern"));

const DEFAULT_CLASS: &str = "Main";

/// Make a bare snippet or a package-private class runnable as a single file.
pub fn prepare(source: &str) -> PreparedSource {
    let trimmed = source.trim();

    let content = if trimmed.contains("public class") {
        trimmed.to_string()
    } else if ANY_CLASS.is_match(trimmed) {
        ANY_CLASS.replace(trimmed, "public class $1").into_owned()
    } else {
        wrap_in_main(trimmed)
    };

    let class_name = PUBLIC_CLASS
        .captures(&content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_CLASS);

    PreparedSource {
        file_name: format!("{}.java", class_name),
        content,
    }
}

fn wrap_in_main(body: &str) -> String {
    let indented = body
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("        {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "public class {} {{\n    public static void main(String[] args) {{\n{}\n    }}\n}}",
        DEFAULT_CLASS, indented
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_class_untouched() {
        let src = "public class Hello {\n    public static void main(String[] a) {}\n}";
        let prepared = prepare(src);
        assert_eq!(prepared.content, src);
        assert_eq!(prepared.file_name, "Hello.java");
    }

    #[test]
    fn test_package_private_class_made_public() {
        let src = "class Foo {\n    public static void main(String[] a) {}\n}";
        let prepared = prepare(src);
        assert!(prepared.content.starts_with("public class Foo {"));
        assert_eq!(prepared.file_name, "Foo.java");
    }

    #[test]
    fn test_only_first_class_is_promoted() {
        let src = "class A {}\nclass B {}";
        let prepared = prepare(src);
        assert_eq!(prepared.content, "public class A {}\nclass B {}");
    }

    #[test]
    fn test_bare_snippet_wrapped_in_main() {
        let prepared = prepare("System.out.println(\"hi\");\n\nint x = 1;");
        assert_eq!(
            prepared.content,
            "public class Main {\n    public static void main(String[] args) {\n        System.out.println(\"hi\");\n\n        int x = 1;\n    }\n}"
        );
        assert_eq!(prepared.file_name, "Main.java");
    }

    #[test]
    fn test_identifier_containing_class_is_not_a_declaration() {
        let prepared = prepare("String subclass = \"x\";\nSystem.out.println(subclass);");
        assert!(prepared.content.starts_with("public class Main {"));
    }
}
