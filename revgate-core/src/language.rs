//! File-extension language detection.

/// Tag returned for any extension not in the table.
pub const UNKNOWN: &str = "unknown";

const EXTENSIONS: &[(&str, &str)] = &[
    ("java", "java"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("py", "python"),
    ("go", "go"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("scala", "scala"),
    ("sc", "scala"),
    ("rb", "ruby"),
    ("php", "php"),
    ("cs", "csharp"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("c", "c"),
    ("h", "c"),
    ("rs", "rust"),
    ("swift", "swift"),
    ("sql", "sql"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("yml", "yaml"),
    ("yaml", "yaml"),
    ("xml", "xml"),
    ("json", "json"),
];

/// Maps `path` to a language tag by its (lower-cased) extension.
pub fn detect(path: &str) -> &'static str {
    let Some((_, ext)) = path.rsplit_once('.') else {
        return UNKNOWN;
    };
    // "dir.d/Makefile" has a dot but no extension.
    if ext.contains('/') || ext.contains('\\') {
        return UNKNOWN;
    }
    let ext = ext.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
        .unwrap_or(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_extensions() {
        assert_eq!(detect("src/Main.java"), "java");
        assert_eq!(detect("web/App.tsx"), "typescript");
        assert_eq!(detect("lib/util.js"), "javascript");
        assert_eq!(detect("include/foo.h"), "c");
        assert_eq!(detect("src/lib.rs"), "rust");
        assert_eq!(detect("deploy/values.yml"), "yaml");
    }

    #[test]
    fn extension_match_ignores_case() {
        assert_eq!(detect("LEGACY/MAIN.JAVA"), "java");
        assert_eq!(detect("script.Py"), "python");
    }

    #[test]
    fn unknown_extensions_and_bare_names() {
        assert_eq!(detect("README"), UNKNOWN);
        assert_eq!(detect("notes.txt"), UNKNOWN);
        assert_eq!(detect("conf.d/Makefile"), UNKNOWN);
        assert_eq!(detect(""), UNKNOWN);
    }

    #[test]
    fn only_the_last_extension_counts() {
        assert_eq!(detect("dist/app.min.js"), "javascript");
        assert_eq!(detect("dist/app.js.map"), UNKNOWN);
    }
}
