use super::*;

use once_cell::sync::Lazy;
use regex::Regex;

const DEFAULT_CLASS: &str = "Solution";

pub static DESCRIPTOR: LanguageDescriptor = LanguageDescriptor {
    id: LanguageId::Java,
    source_file_name: "Solution.java",
    compile: Some(Template {
        program: "javac",
        args: &["-encoding", "UTF-8", "-d", "{out}", "{src}"],
    }),
    run: Template {
        program: "java",
        args: &["-cp", "{out}", "{main}"],
    },
};

static PUBLIC_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bpublic\s+(?:(?:final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .unwrap()
});

static CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap());

static MAIN_METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bstatic\s+(?:(?:public|final|synchronized)\s+)*void\s+main\s*\(\s*(?:final\s+)?String\b")
        .unwrap()
});

fn public_class(code: &str) -> Option<&str> {
    PUBLIC_CLASS
        .captures(code)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// The class declared closest before the first `static void main(String...)`.
fn class_with_main(code: &str) -> Option<&str> {
    let main_at = MAIN_METHOD.find(code)?.start();
    CLASS
        .captures_iter(&code[..main_at])
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Class that names the source file. javac requires it to match the public class.
pub fn source_class(code: &str) -> &str {
    public_class(code)
        .or_else(|| class_with_main(code))
        .unwrap_or(DEFAULT_CLASS)
}

/// Class handed to `java` as the entry point.
pub fn main_class(code: &str) -> &str {
    class_with_main(code)
        .or_else(|| public_class(code))
        .unwrap_or(DEFAULT_CLASS)
}
